// ABOUTME: Shared setup for commands that touch the state store.
// ABOUTME: Loads configuration, opens the store, and builds the engine and managers.

use std::sync::Arc;

use stateward::audit::RunMetadata;
use stateward::config::Config;
use stateward::deploy::{BackupManager, Engine, LockManager};
use stateward::discovery::{UnitFilter, load_units};
use stateward::error::{Error, Result};
use stateward::iac::CommandTool;
use stateward::policy::CommandGate;
use stateward::store::LocalStore;
use stateward::types::{DeploymentUnit, HolderId};

/// Configuration plus the store it points at.
pub struct Workspace {
    pub config: Config,
    pub store: Arc<LocalStore>,
    pub holder: HolderId,
}

impl Workspace {
    /// Discover the config in the working directory and apply `destination`.
    pub fn open(destination: Option<&str>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let config = Config::discover(&cwd)?;
        let config = match destination {
            Some(dest) => config.for_destination(dest)?,
            None => config,
        };
        config.validate()?;
        for warning in config.warnings() {
            tracing::warn!("{warning}");
        }

        let store = Arc::new(LocalStore::new(config.store.root.clone()));
        Ok(Self {
            config,
            store,
            holder: HolderId::for_current_process(),
        })
    }

    /// Units from the configured units file that pass `filter`.
    pub fn units(&self, filter: &UnitFilter) -> Result<Vec<DeploymentUnit>> {
        let units = filter.apply(load_units(&self.config.units_file)?);
        if units.is_empty() {
            return Err(Error::NoUnits);
        }
        Ok(units)
    }

    pub fn metadata(&self, trigger: Option<String>) -> Result<RunMetadata> {
        let trigger = match trigger {
            Some(trigger) => trigger,
            None => self.config.audit.trigger.resolve()?,
        };
        Ok(RunMetadata::new(trigger, self.holder.clone()))
    }

    pub fn engine(&self, metadata: RunMetadata) -> Result<Engine> {
        let tool = Arc::new(CommandTool::new(self.config.tool.program.clone()));
        let mut builder = Engine::builder(self.store.clone(), self.store.clone(), tool, metadata)
            .settings(self.config.engine_settings()?);
        if let Some(policy) = &self.config.policy {
            let gate = CommandGate::new(policy.command.clone()).with_timeout(policy.timeout);
            builder = builder.policy(Arc::new(gate));
        }
        if self.config.audit.enabled {
            builder = builder.audit(self.config.audit.prefix.clone());
        }
        Ok(builder.build())
    }

    pub fn locks(&self) -> LockManager {
        LockManager::new(self.store.clone()).with_timeout(self.config.execution.store_timeout)
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(self.store.clone()).with_timeout(self.config.execution.store_timeout)
    }
}

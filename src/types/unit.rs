// ABOUTME: Deployment unit descriptor identifying one shard of infrastructure state.
// ABOUTME: Immutable once built; consumed read-only by every orchestration component.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use super::{AccountId, ProjectName, Region, ServiceCategory};

/// One account/region/project/service-set combination with its own lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentUnit {
    account: AccountId,
    region: Region,
    project: ProjectName,
    #[serde(default)]
    services: BTreeSet<ServiceCategory>,
    source: PathBuf,
}

impl DeploymentUnit {
    pub fn new(
        account: AccountId,
        region: Region,
        project: ProjectName,
        services: impl IntoIterator<Item = ServiceCategory>,
        source: impl Into<PathBuf>,
    ) -> Self {
        Self {
            account,
            region,
            project,
            services: services.into_iter().collect(),
            source: source.into(),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn project(&self) -> &ProjectName {
        &self.project
    }

    /// Detected services in their canonical order.
    pub fn services(&self) -> &BTreeSet<ServiceCategory> {
        &self.services
    }

    /// Configuration file this unit was discovered from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Directory the IaC tool runs in.
    pub fn working_dir(&self) -> &Path {
        if self.source.is_dir() {
            return &self.source;
        }
        match self.source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// Sorted service path names, the order used inside shard keys.
    ///
    /// Path names are unique per category, so this has one entry per service.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.iter().map(|s| s.path_name()).collect();
        names.sort_unstable();
        names
    }

    /// Human-readable name: `account/region/project`.
    pub fn name(&self) -> String {
        format!("{}/{}/{}", self.account, self.region, self.project)
    }
}

impl fmt::Display for DeploymentUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        let names = self.service_names();
        if !names.is_empty() {
            write!(f, " [{}]", names.join(","))?;
        }
        Ok(())
    }
}

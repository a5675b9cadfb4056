// ABOUTME: Loads deployment units from a YAML units file.
// ABOUTME: Validates descriptors, applies command-line filters, and drops duplicates.

use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::types::{AccountId, DeploymentUnit, ProjectName, Region, ServiceCategory};

/// Top-level document of a units file.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitsFile {
    #[serde(default)]
    pub units: Vec<RawUnit>,
}

/// A unit as written by a human, before validation.
#[derive(Debug, Clone, Deserialize)]
pub struct RawUnit {
    pub account: AccountField,
    pub region: String,
    pub project: String,
    #[serde(default)]
    pub services: Vec<String>,
    /// Configuration file or directory, relative to the units file.
    pub source: PathBuf,
}

/// YAML reads an unquoted account number as an integer.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AccountField {
    Number(u64),
    Text(String),
}

impl AccountField {
    fn as_string(&self) -> String {
        match self {
            // Account numbers keep their leading zeros only when quoted.
            AccountField::Number(n) => format!("{n:012}"),
            AccountField::Text(s) => s.clone(),
        }
    }
}

impl RawUnit {
    fn into_unit(self, base: &Path) -> std::result::Result<DeploymentUnit, String> {
        let account = AccountId::new(&self.account.as_string()).map_err(|e| e.to_string())?;
        let region = Region::new(&self.region).map_err(|e| e.to_string())?;
        let project = ProjectName::new(&self.project).map_err(|e| e.to_string())?;
        let services = self.services.iter().map(|label| ServiceCategory::classify(label));
        let source = if self.source.is_absolute() {
            self.source
        } else {
            base.join(self.source)
        };
        Ok(DeploymentUnit::new(account, region, project, services, source))
    }
}

impl UnitsFile {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Validated units with sources resolved against `base`. Identical descriptors appear once.
    pub fn into_units(self, file: &Path, base: &Path) -> Result<Vec<DeploymentUnit>> {
        let mut seen = HashSet::new();
        let mut units = Vec::with_capacity(self.units.len());
        for (index, raw) in self.units.into_iter().enumerate() {
            let unit = raw.into_unit(base).map_err(|message| Error::InvalidUnit {
                file: file.to_path_buf(),
                message: format!("unit #{}: {}", index + 1, message),
            })?;
            if seen.insert(unit.clone()) {
                units.push(unit);
            } else {
                tracing::debug!(unit = %unit, "dropping duplicate unit");
            }
        }
        Ok(units)
    }
}

/// Load, validate, and deduplicate the units listed in `path`.
pub fn load_units(path: &Path) -> Result<Vec<DeploymentUnit>> {
    let base = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    UnitsFile::load(path)?.into_units(path, base)
}

/// Command-line selection of units. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct UnitFilter {
    pub account: Option<String>,
    pub region: Option<String>,
    pub project: Option<String>,
    /// Matches units containing any of these services.
    pub services: Vec<String>,
}

impl UnitFilter {
    pub fn is_empty(&self) -> bool {
        self.account.is_none()
            && self.region.is_none()
            && self.project.is_none()
            && self.services.is_empty()
    }

    pub fn matches(&self, unit: &DeploymentUnit) -> bool {
        if let Some(account) = &self.account
            && unit.account().as_str() != account
        {
            return false;
        }
        if let Some(region) = &self.region
            && unit.region().as_str() != region
        {
            return false;
        }
        if let Some(project) = &self.project
            && unit.project().as_str() != project
        {
            return false;
        }
        if !self.services.is_empty() {
            let wanted: HashSet<ServiceCategory> = self
                .services
                .iter()
                .map(|label| ServiceCategory::classify(label))
                .collect();
            if !unit.services().iter().any(|s| wanted.contains(s)) {
                return false;
            }
        }
        true
    }

    pub fn apply(&self, units: Vec<DeploymentUnit>) -> Vec<DeploymentUnit> {
        units.into_iter().filter(|u| self.matches(u)).collect()
    }
}

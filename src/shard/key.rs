// ABOUTME: Deterministic shard key generation for deployment units.
// ABOUTME: Maps each unit to the storage key holding its persisted infrastructure state.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{DeploymentUnit, SegmentError, validate_segment};

/// Version of the key layout. Bumped only with a migration path from the previous one.
pub const KEY_SCHEME_VERSION: u32 = 2;

/// Last segment of every shard key.
pub const STATE_SEGMENT: &str = "state";

const GENERAL_SELECTOR: &str = "general";
const COMBINED_SELECTOR: &str = "combined";
const MULTI_SELECTOR: &str = "multi";
const SERVICE_JOIN: &str = "+";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShardKeyError {
    #[error("shard key must end with '/{STATE_SEGMENT}': {0}")]
    MissingStateSegment(String),

    #[error("shard key has too few segments: {0}")]
    TooShort(String),

    #[error("invalid shard key segment: {0}")]
    Segment(#[from] SegmentError),
}

/// Storage key holding one unit's state snapshot.
///
/// Layout: `{selector}/{account}/{region}/{project}[/{resource}]/state`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(String);

impl ShardKey {
    /// The unit's primary state key. Pure: the same descriptor always yields the same key.
    pub fn generate(unit: &DeploymentUnit) -> Self {
        let names = unit.service_names();
        match names.as_slice() {
            [] => Self::layout(GENERAL_SELECTOR, unit, None),
            [single] => Self::layout(single, unit, None),
            many => Self::layout(COMBINED_SELECTOR, unit, Some(&many.join(SERVICE_JOIN))),
        }
    }

    /// Secondary key for one resource of a unit.
    ///
    /// Multi-service units move under the `multi` selector so that the service
    /// set and the resource each keep their own segment.
    pub fn for_resource(unit: &DeploymentUnit, resource: &str) -> Result<Self, ShardKeyError> {
        validate_segment("resource", resource)?;
        let names = unit.service_names();
        let key = match names.as_slice() {
            [] => Self::layout(GENERAL_SELECTOR, unit, Some(resource)),
            [single] => Self::layout(single, unit, Some(resource)),
            many => {
                let services = many.join(SERVICE_JOIN);
                Self::layout(
                    MULTI_SELECTOR,
                    unit,
                    Some(&format!("{services}/{resource}")),
                )
            }
        };
        Ok(key)
    }

    /// Keys the same account/region/project may have used under another
    /// service set or the previous layout. Never includes the current key.
    pub fn legacy_candidates(unit: &DeploymentUnit) -> Vec<ShardKey> {
        let current = Self::generate(unit);
        let mut candidates = vec![Self::layout(GENERAL_SELECTOR, unit, None)];
        for name in unit.service_names() {
            candidates.push(Self::layout(name, unit, None));
        }
        // Version 1 stored every multi-service unit under one unqualified key.
        candidates.push(Self::layout(COMBINED_SELECTOR, unit, None));

        let mut seen = std::collections::BTreeSet::new();
        candidates.retain(|key| *key != current && seen.insert(key.clone()));
        candidates
    }

    /// Parse a key given by an operator, e.g. on the command line.
    pub fn parse(value: &str) -> Result<Self, ShardKeyError> {
        let value = value.trim().trim_matches('/');
        let Some(stem) = value.strip_suffix(STATE_SEGMENT) else {
            return Err(ShardKeyError::MissingStateSegment(value.to_string()));
        };
        let Some(stem) = stem.strip_suffix('/') else {
            return Err(ShardKeyError::MissingStateSegment(value.to_string()));
        };

        let segments: Vec<&str> = stem.split('/').collect();
        if segments.len() < 4 {
            return Err(ShardKeyError::TooShort(value.to_string()));
        }
        for segment in &segments {
            // Combined service lists join path-safe names with '+'.
            for part in segment.split(SERVICE_JOIN) {
                validate_segment("shard key", part)?;
            }
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The key without its trailing `/state` segment.
    pub fn stem(&self) -> &str {
        self.0
            .strip_suffix(STATE_SEGMENT)
            .and_then(|s| s.strip_suffix('/'))
            .unwrap_or(&self.0)
    }

    /// First segment: a service path name, `general`, `combined` or `multi`.
    pub fn selector(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    fn layout(selector: &str, unit: &DeploymentUnit, resource: Option<&str>) -> Self {
        let mut key = format!(
            "{}/{}/{}/{}",
            selector,
            unit.account(),
            unit.region(),
            unit.project()
        );
        if let Some(resource) = resource {
            key.push('/');
            key.push_str(resource);
        }
        key.push('/');
        key.push_str(STATE_SEGMENT);
        Self(key)
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShardKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

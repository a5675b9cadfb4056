// ABOUTME: Validated path segments used to build shard keys.
// ABOUTME: Account, region, and project names must be safe to embed in a storage key.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

/// Longest segment accepted in a shard key.
pub const MAX_SEGMENT_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SegmentError {
    #[error("{0} cannot be empty")]
    Empty(&'static str),

    #[error("{0} exceeds maximum length of {MAX_SEGMENT_LEN} characters")]
    TooLong(&'static str),

    #[error("{0} cannot be '.' or '..'")]
    Relative(&'static str),

    #[error("invalid character in {field}: '{ch}'")]
    InvalidChar { field: &'static str, ch: char },

    #[error("account identifier must contain only digits or lowercase letters and hyphens: '{0}'")]
    InvalidAccount(String),
}

/// Check a single key segment: ASCII alphanumerics plus `-`, `_` and `.`.
pub fn validate(field: &'static str, value: &str) -> Result<(), SegmentError> {
    if value.is_empty() {
        return Err(SegmentError::Empty(field));
    }

    if value.len() > MAX_SEGMENT_LEN {
        return Err(SegmentError::TooLong(field));
    }

    if value == "." || value == ".." {
        return Err(SegmentError::Relative(field));
    }

    for ch in value.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '-' && ch != '_' && ch != '.' {
            return Err(SegmentError::InvalidChar { field, ch });
        }
    }

    Ok(())
}

macro_rules! segment_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: &str) -> Result<Self, SegmentError> {
                let value = value.trim();
                Self::check(value)?;
                Ok(Self(value.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                self.0.serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let value = String::deserialize(deserializer)?;
                Self::new(&value).map_err(serde::de::Error::custom)
            }
        }

        impl std::str::FromStr for $name {
            type Err = SegmentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

segment_type!(
    /// Cloud account, subscription, or tenant identifier.
    AccountId
);

segment_type!(
    /// Deployment region, e.g. `us-east-1` or `europe-west4`.
    Region
);

segment_type!(
    /// Logical project name inside an account.
    ProjectName
);

impl AccountId {
    fn check(value: &str) -> Result<(), SegmentError> {
        validate("account", value)?;
        // Numeric ids (AWS) or lowercase slugs (GCP projects, Azure aliases).
        let numeric = value.chars().all(|c| c.is_ascii_digit());
        let slug = value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if numeric || slug {
            Ok(())
        } else {
            Err(SegmentError::InvalidAccount(value.to_string()))
        }
    }
}

impl Region {
    fn check(value: &str) -> Result<(), SegmentError> {
        validate("region", value)
    }
}

impl ProjectName {
    fn check(value: &str) -> Result<(), SegmentError> {
        validate("project", value)
    }
}

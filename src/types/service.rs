// ABOUTME: Closed enumeration of infrastructure service categories.
// ABOUTME: Classifies free-form labels and provider aliases into known categories.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Infrastructure service category detected in a unit's configuration.
///
/// Unknown labels are kept as `Unrecognized` with a path-safe name so that a
/// unit using them still gets a stable, distinct shard key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ServiceCategory {
    Storage,
    KeyManagement,
    Identity,
    Compute,
    Networking,
    Database,
    Messaging,
    Monitoring,
    Unrecognized(UnknownService),
}

/// Path-safe name of a service no category claims.
///
/// Only [`ServiceCategory::classify`] builds one, so the name is never a
/// category alias nor a reserved key selector.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnknownService(String);

impl UnknownService {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnknownService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ServiceCategory {
    /// Map a label (category name or provider alias) onto a category.
    ///
    /// Labels are lowercased and reduced to path-safe characters before matching.
    pub fn classify(label: &str) -> Self {
        let name = sanitize(&label.trim().to_ascii_lowercase());
        match name.as_str() {
            "storage" | "s3" | "gcs" | "blob" | "bucket" | "object-storage" | "efs" => {
                ServiceCategory::Storage
            }
            "kms" | "key-management" | "keyvault" | "key-vault" | "secrets" | "secretsmanager" => {
                ServiceCategory::KeyManagement
            }
            "iam" | "identity" | "sso" | "entra" | "rbac" => ServiceCategory::Identity,
            "compute" | "ec2" | "lambda" | "ecs" | "eks" | "gce" | "gke" | "vm" | "functions" => {
                ServiceCategory::Compute
            }
            "network" | "networking" | "vpc" | "vnet" | "dns" | "route53" | "cdn"
            | "cloudfront" | "elb" | "alb" => ServiceCategory::Networking,
            "database" | "rds" | "dynamodb" | "aurora" | "cloudsql" | "cosmosdb" | "spanner" => {
                ServiceCategory::Database
            }
            "messaging" | "sqs" | "sns" | "pubsub" | "eventbridge" | "kinesis" | "servicebus" => {
                ServiceCategory::Messaging
            }
            "monitoring" | "cloudwatch" | "logging" | "alerts" | "observability" => {
                ServiceCategory::Monitoring
            }
            _ if RESERVED_SELECTORS.contains(&name.as_str()) => {
                // Keep unknown services from colliding with the fixed key selectors.
                ServiceCategory::Unrecognized(UnknownService(format!("svc-{name}")))
            }
            _ => ServiceCategory::Unrecognized(UnknownService(name)),
        }
    }

    /// Stable name used inside shard keys. Distinct categories never share one.
    pub fn path_name(&self) -> &str {
        match self {
            ServiceCategory::Storage => "storage",
            ServiceCategory::KeyManagement => "kms",
            ServiceCategory::Identity => "iam",
            ServiceCategory::Compute => "compute",
            ServiceCategory::Networking => "network",
            ServiceCategory::Database => "database",
            ServiceCategory::Messaging => "messaging",
            ServiceCategory::Monitoring => "monitoring",
            ServiceCategory::Unrecognized(name) => name.as_str(),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, ServiceCategory::Unrecognized(_))
    }
}

/// Reduce a label to characters that are safe in a key segment.
fn sanitize(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('-');
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Shard key selectors that are not service names.
const RESERVED_SELECTORS: &[&str] = &["general", "combined", "multi", "backups", "audit"];

impl fmt::Display for ServiceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path_name())
    }
}

impl Serialize for ServiceCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.path_name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServiceCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(Self::classify(&label))
    }
}

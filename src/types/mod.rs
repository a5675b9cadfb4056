// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Deployment units, service categories, actions, and phantom-typed ids.

mod action;
mod id;
mod segment;
mod service;
mod unit;

pub use action::Action;
pub use id::{BackupId, CorrelationId, HolderId, Id};
pub use segment::{
    AccountId, MAX_SEGMENT_LEN, ProjectName, Region, SegmentError, validate as validate_segment,
};
pub use service::{ServiceCategory, UnknownService};
pub use unit::DeploymentUnit;

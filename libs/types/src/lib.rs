//! # lhorc-types
//!
//! Data model shared by every lhorc agent in a cluster.
//!
//! ## Records
//!
//! - Hosts (`HostInfo`) are published once per machine and read by any peer
//!   that needs to resolve an address.
//! - Volumes (`VolumeInfo`) own their replica set; a replica flagged unhealthy
//!   keeps its entry and gains a `bad_timestamp`.
//! - Instances (`InstanceInfo`) are never persisted on their own; they are
//!   derived from a live container inspection.
//! - Schedule requests (`ScheduleRequest`) describe one lifecycle action and
//!   carry an action-specific payload (`ActionPayload`).

mod error;
mod host;
mod instance;
mod schedule;
mod volume;

pub use error::PayloadError;
pub use host::{HostInfo, SettingsInfo, DEFAULT_BACKUP_TARGET};
pub use instance::{ControllerInfo, InstanceInfo, InstanceType};
pub use schedule::*;
pub use volume::{ReplicaInfo, VolumeInfo};

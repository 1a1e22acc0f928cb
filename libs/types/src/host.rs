//! Host and cluster-wide settings records.

use serde::{Deserialize, Serialize};

/// Backup target reported when no settings were ever stored.
pub const DEFAULT_BACKUP_TARGET: &str = "vfs:///var/lib/longhorn/backups/default";

/// A cluster member. Identity is the UUID, which survives agent restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub uuid: String,
    pub name: String,
    /// `ip:port` of the agent API on this host.
    pub address: String,
}

/// Global settings shared by all hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsInfo {
    pub backup_target: String,
    pub longhorn_image: String,
}

impl SettingsInfo {
    /// Settings used when none are persisted. Never written back on its own.
    pub fn with_default_target(longhorn_image: impl Into<String>) -> Self {
        Self {
            backup_target: DEFAULT_BACKUP_TARGET.to_string(),
            longhorn_image: longhorn_image.into(),
        }
    }
}

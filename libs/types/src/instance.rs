//! Instance records derived from running containers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Role of an instance within a volume.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceType {
    Controller,
    Replica,
    #[default]
    None,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Controller => "controller",
            Self::Replica => "replica",
            Self::None => "none",
        }
    }
}

impl fmt::Display for InstanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a container as last inspected on its host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub instance_type: InstanceType,
    pub name: String,
    pub host_id: String,
    pub address: String,
    pub running: bool,
}

impl InstanceInfo {
    /// Minimal record for an instance that can no longer be inspected.
    pub fn removed(id: impl Into<String>, instance_type: InstanceType) -> Self {
        Self {
            id: id.into(),
            instance_type,
            ..Default::default()
        }
    }
}

/// The frontend process of a volume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfo {
    #[serde(flatten)]
    pub instance: InstanceInfo,
}

impl From<InstanceInfo> for ControllerInfo {
    fn from(instance: InstanceInfo) -> Self {
        Self { instance }
    }
}

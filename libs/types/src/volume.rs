//! Volume records and their replica sets.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instance::InstanceInfo;

/// One copy of a volume's data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaInfo {
    #[serde(flatten)]
    pub instance: InstanceInfo,

    /// Set once when the replica is flagged unhealthy; never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bad_timestamp: Option<DateTime<Utc>>,
}

impl ReplicaInfo {
    pub fn is_bad(&self) -> bool {
        self.bad_timestamp.is_some()
    }
}

impl From<InstanceInfo> for ReplicaInfo {
    fn from(instance: InstanceInfo) -> Self {
        Self {
            instance,
            bad_timestamp: None,
        }
    }
}

/// A block volume. The name is the unique key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeInfo {
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    pub longhorn_image: String,
    #[serde(default)]
    pub replicas: BTreeMap<String, ReplicaInfo>,
}

impl VolumeInfo {
    /// Find a replica entry by the replica's own name, which may differ
    /// from the map key.
    pub fn replica_key(&self, replica_name: &str) -> Option<&str> {
        self.replicas
            .iter()
            .find(|(_, r)| r.instance.name == replica_name)
            .map(|(k, _)| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(name: &str, address: &str) -> ReplicaInfo {
        InstanceInfo {
            name: name.to_string(),
            address: address.to_string(),
            ..Default::default()
        }
        .into()
    }

    #[test]
    fn test_replica_key_matches_on_name() {
        let mut volume = VolumeInfo {
            name: "vol1".to_string(),
            size: 1024,
            ..Default::default()
        };
        volume
            .replicas
            .insert("slot-a".to_string(), replica("r1", "10.0.0.5"));

        assert_eq!(volume.replica_key("r1"), Some("slot-a"));
        assert_eq!(volume.replica_key("slot-a"), None);
    }

    #[test]
    fn test_volume_json_preserves_bad_timestamp() {
        let mut volume = VolumeInfo {
            name: "vol1".to_string(),
            size: 1024,
            longhorn_image: "longhornio/engine:v1".to_string(),
            ..Default::default()
        };
        let mut bad = replica("r1", "10.0.0.5");
        bad.bad_timestamp = Some(Utc::now());
        volume.replicas.insert("r1".to_string(), bad);
        volume
            .replicas
            .insert("r2".to_string(), replica("r2", "10.0.0.7"));

        let json = serde_json::to_string(&volume).unwrap();
        let parsed: VolumeInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, volume);
        assert!(parsed.replicas["r1"].is_bad());
        assert!(!parsed.replicas["r2"].is_bad());
    }

    #[test]
    fn test_volume_without_replicas_field() {
        let parsed: VolumeInfo =
            serde_json::from_str(r#"{"name":"v","size":0,"longhorn_image":"img"}"#).unwrap();
        assert!(parsed.replicas.is_empty());
    }
}

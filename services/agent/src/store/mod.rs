//! Metadata store for hosts, volumes and settings.
//!
//! - `KvBackend`: raw key/value capability with per-key modification indexes
//! - `MemoryBackend`: in-process backend for tests and single-node development
//! - `EtcdBackend`: etcd v2 keys API over HTTP
//! - `MetadataStore`: typed, namespaced facade used by the engine

mod etcd;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use lhorc_types::{HostInfo, SettingsInfo, VolumeInfo};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

pub use etcd::EtcdBackend;
pub use memory::MemoryBackend;

/// Errors from metadata store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend error {status}: {message}")]
    Backend { status: u16, message: String },

    #[error("write conflict on {0}")]
    Conflict(String),

    #[error("no reachable endpoint: {0}")]
    Unavailable(String),
}

/// A stored value and the index of its last modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub value: String,
    pub index: u64,
}

/// Raw key/value capability.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Read a key. `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError>;

    /// Direct children of a directory key, in key order.
    async fn list(&self, dir: &str) -> Result<Vec<(String, KvEntry)>, StoreError>;

    /// Unconditional write.
    async fn set(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Write only if the key does not exist yet.
    async fn create(&self, key: &str, value: &str) -> Result<u64, StoreError>;

    /// Write only if the key was last modified at `index`.
    async fn compare_and_set(&self, key: &str, value: &str, index: u64)
        -> Result<u64, StoreError>;

    /// Delete a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;
}

/// Read-modify-write attempts before giving up on a contended key.
const MAX_CAS_ATTEMPTS: usize = 5;

/// Typed access to the records of one cluster namespace.
#[derive(Clone)]
pub struct MetadataStore {
    backend: Arc<dyn KvBackend>,
    prefix: String,
}

impl MetadataStore {
    pub fn new(backend: Arc<dyn KvBackend>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        Self { backend, prefix }
    }

    /// Store backed by an in-process map.
    pub fn in_memory(prefix: impl Into<String>) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), prefix)
    }

    fn hosts_dir(&self) -> String {
        format!("{}/hosts", self.prefix)
    }

    pub(crate) fn host_key(&self, uuid: &str) -> String {
        format!("{}/hosts/{}", self.prefix, uuid)
    }

    fn volumes_dir(&self) -> String {
        format!("{}/volumes", self.prefix)
    }

    pub(crate) fn volume_key(&self, name: &str) -> String {
        format!("{}/volumes/{}", self.prefix, name)
    }

    pub(crate) fn settings_key(&self) -> String {
        format!("{}/settings", self.prefix)
    }

    // -------------------------------------------------------------------------
    // Hosts
    // -------------------------------------------------------------------------

    pub async fn set_host(&self, host: &HostInfo) -> Result<(), StoreError> {
        self.put(&self.host_key(&host.uuid), host).await
    }

    pub async fn get_host(&self, uuid: &str) -> Result<Option<HostInfo>, StoreError> {
        self.fetch(&self.host_key(uuid)).await.map(|v| v.map(|(h, _)| h))
    }

    pub async fn list_hosts(&self) -> Result<Vec<HostInfo>, StoreError> {
        self.fetch_all(&self.hosts_dir()).await
    }

    // -------------------------------------------------------------------------
    // Volumes
    // -------------------------------------------------------------------------

    /// Persist a new volume. Fails with `Conflict` if the name is taken.
    pub async fn create_volume(&self, volume: &VolumeInfo) -> Result<(), StoreError> {
        let key = self.volume_key(&volume.name);
        let value = serde_json::to_string(volume)?;
        self.backend.create(&key, &value).await?;
        debug!(key = %key, "Volume created");
        Ok(())
    }

    pub async fn set_volume(&self, volume: &VolumeInfo) -> Result<(), StoreError> {
        self.put(&self.volume_key(&volume.name), volume).await
    }

    pub async fn get_volume(&self, name: &str) -> Result<Option<VolumeInfo>, StoreError> {
        self.fetch(&self.volume_key(name)).await.map(|v| v.map(|(vol, _)| vol))
    }

    pub async fn list_volumes(&self) -> Result<Vec<VolumeInfo>, StoreError> {
        self.fetch_all(&self.volumes_dir()).await
    }

    /// Delete a volume. Returns whether it existed.
    pub async fn delete_volume(&self, name: &str) -> Result<bool, StoreError> {
        self.backend.delete(&self.volume_key(name)).await
    }

    /// Apply `mutate` to the stored volume with optimistic concurrency,
    /// retrying when another writer got there first.
    ///
    /// Returns `None` if the volume does not exist.
    pub async fn update_volume_with<F>(
        &self,
        name: &str,
        mut mutate: F,
    ) -> Result<Option<VolumeInfo>, StoreError>
    where
        F: FnMut(&mut VolumeInfo) + Send,
    {
        let key = self.volume_key(name);
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let Some((mut volume, index)) = self.fetch::<VolumeInfo>(&key).await? else {
                return Ok(None);
            };
            mutate(&mut volume);
            let value = serde_json::to_string(&volume)?;
            match self.backend.compare_and_set(&key, &value, index).await {
                Ok(_) => return Ok(Some(volume)),
                Err(StoreError::Conflict(_)) if attempt < MAX_CAS_ATTEMPTS => {
                    debug!(key = %key, attempt, "Concurrent volume update, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::Conflict(key))
    }

    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------

    pub async fn get_settings(&self) -> Result<Option<SettingsInfo>, StoreError> {
        self.fetch(&self.settings_key()).await.map(|v| v.map(|(s, _)| s))
    }

    pub async fn set_settings(&self, settings: &SettingsInfo) -> Result<(), StoreError> {
        self.put(&self.settings_key(), settings).await
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn put<T: Serialize>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        let value = serde_json::to_string(record)?;
        self.backend.set(key, &value).await?;
        Ok(())
    }

    async fn fetch<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, u64)>, StoreError> {
        match self.backend.get(key).await? {
            Some(entry) => Ok(Some((serde_json::from_str(&entry.value)?, entry.index))),
            None => Ok(None),
        }
    }

    async fn fetch_all<T: DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>, StoreError> {
        self.backend
            .list(dir)
            .await?
            .into_iter()
            .map(|(_, entry)| serde_json::from_str(&entry.value).map_err(StoreError::from))
            .collect()
    }
}

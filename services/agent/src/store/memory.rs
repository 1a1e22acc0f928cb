//! In-process key/value backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KvBackend, KvEntry, StoreError};

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, KvEntry>,
    index: u64,
}

impl Inner {
    fn write(&mut self, key: &str, value: &str) -> u64 {
        self.index += 1;
        self.entries.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                index: self.index,
            },
        );
        self.index
    }
}

/// Map-backed store with etcd-like modification indexes.
#[derive(Default)]
pub struct MemoryBackend {
    inner: RwLock<Inner>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<KvEntry>, StoreError> {
        Ok(self.inner.read().await.entries.get(key).cloned())
    }

    async fn list(&self, dir: &str) -> Result<Vec<(String, KvEntry)>, StoreError> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| !k[prefix.len()..].contains('/'))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        Ok(self.inner.write().await.write(key, value))
    }

    async fn create(&self, key: &str, value: &str) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.entries.contains_key(key) {
            return Err(StoreError::Conflict(key.to_string()));
        }
        Ok(inner.write(key, value))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        value: &str,
        index: u64,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.entries.get(key).map(|e| e.index) != Some(index) {
            return Err(StoreError::Conflict(key.to_string()));
        }
        Ok(inner.write(key, value))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.entries.remove(key).is_some())
    }
}

//! Minimal key-value contract shared by both schema adapters

use std::collections::BTreeMap;

use async_trait::async_trait;
use error_stack::Report;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::domain::errors::StoreError;

/// A flat, ordered key-value namespace such as etcd.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Report<StoreError>>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Report<StoreError>>;

    /// Store `value` only if `key` is absent. Returns whether it was written.
    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, Report<StoreError>>;

    /// Delete a single key; deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<(), Report<StoreError>>;
}

pub(crate) fn decode_json<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, Report<StoreError>> {
    serde_json::from_slice(bytes).map_err(|e| {
        Report::new(StoreError::Decode {
            key: key.to_string(),
            message: e.to_string(),
        })
    })
}

pub(crate) fn encode_json<T: Serialize>(key: &str, value: &T) -> Result<Vec<u8>, Report<StoreError>> {
    serde_json::to_vec(value).map_err(|e| {
        Report::new(StoreError::Decode {
            key: key.to_string(),
            message: format!("failed to encode record: {e}"),
        })
    })
}

/// In-process [`KvStore`] backed by a sorted map.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Keys currently stored, in order
    pub async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Report<StoreError>> {
        let entries = self.entries.read().await;
        Ok(entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Report<StoreError>> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, Report<StoreError>> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), Report<StoreError>> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[async_trait]
impl<K: KvStore + ?Sized> KvStore for std::sync::Arc<K> {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>> {
        (**self).get(key).await
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Report<StoreError>> {
        (**self).get_prefix(prefix).await
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Report<StoreError>> {
        (**self).put(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, Report<StoreError>> {
        (**self).put_if_absent(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), Report<StoreError>> {
        (**self).delete(key).await
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    #[test(tokio::test)]
    async fn prefix_scan_stops_at_prefix_boundary() {
        let kv = MemoryKv::new();
        for key in ["/a/1", "/a/2", "/ab/1", "/b/1", "/a"] {
            kv.put(key, key.as_bytes().to_vec()).await.unwrap();
        }

        let keys: Vec<_> = kv
            .get_prefix("/a/")
            .await
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();

        assert_eq!(keys, vec!["/a/1".to_string(), "/a/2".to_string()]);
    }

    #[test(tokio::test)]
    async fn put_if_absent_does_not_overwrite() {
        let kv = MemoryKv::new();

        assert!(kv.put_if_absent("/k", b"first".to_vec()).await.unwrap());
        assert!(!kv.put_if_absent("/k", b"second".to_vec()).await.unwrap());

        assert_eq!(kv.get("/k").await.unwrap(), Some(b"first".to_vec()));
    }

    #[test(tokio::test)]
    async fn deleting_missing_key_succeeds() {
        let kv = MemoryKv::new();

        kv.delete("/missing").await.expect("delete should succeed");

        assert!(kv.is_empty().await);
    }
}

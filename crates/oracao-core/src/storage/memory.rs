use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{validate_cache_name, CacheStorage, CachedData, CachedResponse};
use crate::error::Result;
use crate::models::Response;

/// In-process cache storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<BTreeMap<String, HashMap<String, CachedResponse>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> Result<()> {
        validate_cache_name(name)?;
        self.buckets
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.buckets.read().await.keys().cloned().collect())
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        let removed = self.buckets.write().await.remove(name).is_some();
        if removed {
            debug!(cache = name, "Deleted memory cache bucket");
        }
        Ok(removed)
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
        Ok(self
            .buckets
            .read()
            .await
            .get(name)
            .and_then(|bucket| bucket.get(key))
            .cloned())
    }

    async fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
        validate_cache_name(name)?;
        self.buckets
            .write()
            .await
            .entry(name.to_string())
            .or_default()
            .insert(key.to_string(), CachedData::new(response.clone()));
        Ok(())
    }

    async fn entries(&self, name: &str) -> Result<Vec<(String, CachedResponse)>> {
        let buckets = self.buckets.read().await;
        let mut entries: Vec<_> = buckets
            .get(name)
            .map(|bucket| bucket.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_and_keys() {
        let storage = MemoryStorage::new();
        assert!(storage.keys().await.unwrap().is_empty());

        storage.open("oracao-cache-v1").await.unwrap();
        storage.open("oracao-cache-v1").await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["oracao-cache-v1"]);
    }

    #[tokio::test]
    async fn test_put_then_match_returns_same_bytes() {
        let storage = MemoryStorage::new();
        let body: Vec<u8> = (0..=255).collect();
        let response = Response::new(200, body.clone()).with_header("Content-Type", "image/png");

        storage
            .put("oracao-cache-v1", "http://localhost:8080/icons/icon-192.png", &response)
            .await
            .unwrap();

        let cached = storage
            .match_entry("oracao-cache-v1", "http://localhost:8080/icons/icon-192.png")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.data.body, body);
        assert_eq!(cached.data.header("content-type"), Some("image/png"));
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let storage = MemoryStorage::new();
        storage
            .put("oracao-cache-v1", "http://localhost:8080/", &Response::new(200, "old"))
            .await
            .unwrap();

        assert!(storage
            .match_entry("oracao-cache-v2", "http://localhost:8080/")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let storage = MemoryStorage::new();
        storage.open("oracao-cache-v1").await.unwrap();
        assert!(storage.delete("oracao-cache-v1").await.unwrap());
        assert!(!storage.delete("oracao-cache-v1").await.unwrap());
        assert!(storage.keys().await.unwrap().is_empty());
    }
}

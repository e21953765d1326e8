use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{validate_cache_name, CacheStorage, CachedData, CachedResponse};
use crate::error::{Result, WorkerError};
use crate::models::Response;

type Bucket = BTreeMap<String, CachedResponse>;

/// Cache storage persisted as one JSON file per bucket.
///
/// Writes load the bucket, modify it and replace the file through a rename,
/// all under one lock, so concurrent puts never lose each other's entries.
#[derive(Debug)]
pub struct DiskStorage {
    cache_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl DiskStorage {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            write_lock: Mutex::new(()),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn bucket_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    async fn load(&self, name: &str) -> Result<Option<Bucket>> {
        validate_cache_name(name)?;
        let path = self.bucket_path(name);
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let bucket = serde_json::from_slice(&contents).map_err(|e| {
            WorkerError::Storage(format!("Failed to parse cache bucket {}: {}", name, e))
        })?;
        Ok(Some(bucket))
    }

    async fn save(&self, name: &str, bucket: &Bucket) -> Result<()> {
        fs::create_dir_all(&self.cache_dir).await?;
        let path = self.bucket_path(name);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_vec(bucket)?;
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn open(&self, name: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.load(name).await?.is_none() {
            self.save(name, &Bucket::new()).await?;
            debug!(cache = name, dir = ?self.cache_dir, "Created cache bucket");
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut dir = match fs::read_dir(&self.cache_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if validate_cache_name(stem).is_ok() {
                    names.push(stem.to_string());
                } else {
                    warn!(?path, "Ignoring file with invalid cache name");
                }
            }
        }
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool> {
        validate_cache_name(name)?;
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(self.bucket_path(name)).await {
            Ok(()) => {
                debug!(cache = name, "Deleted cache bucket");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CachedResponse>> {
        Ok(self
            .load(name)
            .await?
            .and_then(|mut bucket| bucket.remove(key)))
    }

    async fn put(&self, name: &str, key: &str, response: &Response) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut bucket = self.load(name).await?.unwrap_or_default();
        bucket.insert(key.to_string(), CachedData::new(response.clone()));
        self.save(name, &bucket).await
    }

    async fn entries(&self, name: &str) -> Result<Vec<(String, CachedResponse)>> {
        Ok(self
            .load(name)
            .await?
            .map(|bucket| bucket.into_iter().collect())
            .unwrap_or_default())
    }
}

//! Cache storage for offline responses.
//!
//! Responses are grouped in named buckets, one bucket per cache generation
//! (`oracao-cache-<version>`). Inside a bucket entries are keyed by request
//! URL. Two implementations:
//! - `MemoryStorage`: in-process, used by tests and short-lived hosts
//! - `DiskStorage`: one JSON file per bucket under the cache directory

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WorkerError};
use crate::models::Response;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Negative ages come from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

pub type CachedResponse = CachedData<Response>;

/// Named buckets of request → response entries.
///
/// `put` on a single key and `delete` of a whole bucket are atomic; callers
/// need no further locking.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Create the bucket if it does not exist.
    async fn open(&self, name: &str) -> Result<()>;

    /// Names of all existing buckets.
    async fn keys(&self) -> Result<Vec<String>>;

    /// Delete a bucket and all its entries. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> Result<bool>;

    /// Look up one entry.
    async fn match_entry(&self, name: &str, key: &str) -> Result<Option<CachedResponse>>;

    /// Store (or overwrite) one entry, creating the bucket if needed.
    async fn put(&self, name: &str, key: &str, response: &Response) -> Result<()>;

    /// All entries of a bucket, ordered by key.
    async fn entries(&self, name: &str) -> Result<Vec<(String, CachedResponse)>>;
}

/// Bucket names become file names, so keep them to a safe alphabet.
pub fn validate_cache_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(WorkerError::InvalidCacheName(name.to_string()))
    }
}

//! In-process LRU cache with per-entry expiry.

use std::num::NonZeroUsize;
use std::time::Duration;

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{CacheError, CacheStore};

struct CacheEntry {
    /// Serialized JSON, so a hit always yields a fresh copy.
    payload: String,
    expires_at: Instant,
}

/// Bounded LRU of serialized records. Expired entries read as misses.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock().await;
        let payload = match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => entry.payload.clone(),
            Some(_) => {
                entries.pop(key);
                return Ok(None);
            }
            None => return Ok(None),
        };
        drop(entries);
        Ok(Some(serde_json::from_str(&payload)?))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError> {
        let entry = CacheEntry {
            payload: serde_json::to_string(value)?,
            expires_at: Instant::now() + ttl,
        };
        self.entries.lock().await.put(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.pop(key);
        Ok(())
    }
}

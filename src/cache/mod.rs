//! # Cache Adapter
//!
//! Key-value get/set/delete with TTL. The cache is never authoritative:
//! callers re-check access on every hit and treat cache failures as misses.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::tenancy::DeadlineExceeded;

pub mod memory;

pub use memory::MemoryCache;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache call timed out")]
    Timeout,
    #[error("cached value could not be encoded or decoded: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

impl From<DeadlineExceeded> for CacheError {
    fn from(_: DeadlineExceeded) -> Self {
        CacheError::Timeout
    }
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

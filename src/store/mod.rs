pub mod fs;
pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A single object as returned by a storage listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Read-only object storage. Listing is prefix-based: `list` returns every
/// object whose key starts with `prefix`, which gives the implicit-wildcard
/// semantics report prefixes are configured with.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
}

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;

use super::{ObjectRef, ObjectStore};

/// In-memory object store. Used by tests and by fixtures that stage a bucket
/// without touching disk.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeMap<String, (Vec<u8>, DateTime<Utc>)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>, last_modified: DateTime<Utc>) {
        self.objects
            .lock()
            .expect("store lock poisoned")
            .insert(key.to_string(), (bytes, last_modified));
    }

    pub fn remove(&self, key: &str) {
        self.objects.lock().expect("store lock poisoned").remove(key);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>> {
        let objects = self.objects.lock().expect("store lock poisoned");
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, (bytes, last_modified))| ObjectRef {
                key: key.clone(),
                size: bytes.len() as u64,
                last_modified: *last_modified,
            })
            .collect())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock().expect("store lock poisoned");
        objects
            .get(key)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| anyhow!("no such object: {}", key))
    }
}

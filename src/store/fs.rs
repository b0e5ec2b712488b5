use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glob::glob;
use std::path::{Path, PathBuf};

use super::{ObjectRef, ObjectStore};

/// Object store backed by a staged directory: every file under `root` is an
/// object whose key is its `/`-separated path relative to `root`.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating store root {:?}", root))?;
        Ok(Self { root })
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectRef>> {
        let pattern = format!("{}/**/*", self.root.display());
        let mut out = Vec::new();
        for entry in glob(&pattern).context("building listing glob")? {
            let path = match entry {
                Ok(p) => p,
                Err(_) => continue,
            };
            if !path.is_file() {
                continue;
            }
            let Some(key) = self.key_for(&path) else {
                continue;
            };
            if !key.starts_with(prefix) {
                continue;
            }
            let meta = std::fs::metadata(&path)
                .with_context(|| format!("reading metadata for {:?}", path))?;
            let last_modified: DateTime<Utc> = meta
                .modified()
                .with_context(|| format!("reading mtime for {:?}", path))?
                .into();
            out.push(ObjectRef {
                key,
                size: meta.len(),
                last_modified,
            });
        }
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.root.join(key);
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading object {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_by_prefix_and_reads_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FsObjectStore::new(dir.path())?;
        std::fs::create_dir_all(dir.path().join("reports/cur/20240101-20240201"))?;
        std::fs::write(
            dir.path().join("reports/cur/20240101-20240201/chunk.csv"),
            b"a,b\n1,2\n",
        )?;
        std::fs::write(dir.path().join("unrelated.txt"), b"x")?;

        let listed = store.list("reports/cur").await?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "reports/cur/20240101-20240201/chunk.csv");
        assert_eq!(listed[0].size, 8);

        let bytes = store.get(&listed[0].key).await?;
        assert_eq!(bytes, b"a,b\n1,2\n");
        Ok(())
    }
}

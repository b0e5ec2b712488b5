use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;
use tracing::info;

use crate::load::UnifiedTable;

/// How the destination ingests the run's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Replace the destination table.
    Full,
    /// Upsert by primary key.
    Incremental,
}

/// Destination seam: receives the finalized table plus explicit primary-key
/// and load-mode instructions. The database behind it is not this crate's
/// concern.
#[async_trait]
pub trait TableWriter: Send + Sync {
    async fn write(
        &self,
        table: &UnifiedTable,
        primary_key: &[String],
        mode: LoadMode,
    ) -> Result<()>;
}

#[derive(Serialize)]
struct LoadManifest<'a> {
    columns: &'a [crate::load::ColumnDef],
    primary_key: &'a [String],
    incremental: bool,
    rows: u64,
}

/// File destination: the unified CSV lands next to a JSON load manifest
/// describing columns, primary key, and load mode.
pub struct CsvTableWriter {
    out_dir: PathBuf,
    table_name: String,
}

impl CsvTableWriter {
    pub fn new(out_dir: impl Into<PathBuf>, table_name: impl Into<String>) -> Self {
        Self {
            out_dir: out_dir.into(),
            table_name: table_name.into(),
        }
    }

    pub fn table_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.csv", self.table_name))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.manifest.json", self.table_name))
    }
}

#[async_trait]
impl TableWriter for CsvTableWriter {
    async fn write(
        &self,
        table: &UnifiedTable,
        primary_key: &[String],
        mode: LoadMode,
    ) -> Result<()> {
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("creating output directory {:?}", self.out_dir))?;

        let dest = self.table_path();
        // Rename when source and destination share a filesystem, copy
        // otherwise.
        if std::fs::rename(&table.path, &dest).is_err() {
            std::fs::copy(&table.path, &dest)
                .with_context(|| format!("copying table to {:?}", dest))?;
            let _ = std::fs::remove_file(&table.path);
        }

        let manifest = LoadManifest {
            columns: &table.columns,
            primary_key,
            incremental: mode == LoadMode::Incremental,
            rows: table.row_count,
        };
        let raw = serde_json::to_string_pretty(&manifest).context("serializing load manifest")?;
        std::fs::write(self.manifest_path(), raw)
            .with_context(|| format!("writing load manifest for {}", self.table_name))?;

        info!(table = %self.table_name, rows = table.row_count, mode = ?mode, "destination written");
        Ok(())
    }
}

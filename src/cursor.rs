use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::manifest::ReportFormat;

/// Marker of the latest fully committed billing period. Read once at run
/// start, written once after a successful run; absent on first run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCursor {
    pub period_label: String,
    pub period_end: NaiveDate,
    pub assembly_id: String,
    pub last_modified: DateTime<Utc>,
    pub format: ReportFormat,
    /// Normalized column names of the last successful run. Seeds the unified
    /// schema on incremental runs so historically seen columns stay
    /// null-filled instead of disappearing.
    #[serde(default)]
    pub columns: Vec<String>,
}

/// JSON-file-backed cursor persistence.
pub struct CursorStore {
    path: PathBuf,
}

impl CursorStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Result<Option<RunCursor>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading cursor file {:?}", self.path))?;
        let cursor: RunCursor = serde_json::from_str(&raw)
            .with_context(|| format!("parsing cursor file {:?}", self.path))?;
        Ok(Some(cursor))
    }

    pub fn save(&self, cursor: &RunCursor) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating cursor directory {:?}", parent))?;
        }
        let raw = serde_json::to_string_pretty(cursor).context("serializing cursor")?;
        std::fs::write(&self.path, raw)
            .with_context(|| format!("writing cursor file {:?}", self.path))?;
        info!(period = %cursor.period_label, assembly = %cursor.assembly_id, "cursor saved");
        Ok(())
    }
}

impl CursorStore {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

//! One ingestion run end to end: list the report prefix, detect the layout,
//! resolve and select manifests, extract their data files, load the unified
//! table, hand it to the destination, and commit the cursor.

use anyhow::Result;
use chrono::Utc;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::Config;
use crate::cursor::{CursorStore, RunCursor};
use crate::detect::detect_version;
use crate::error::{IngestError, SkipReport};
use crate::extract::Extractor;
use crate::load::{load_unified, UnifiedSchema};
use crate::manifest::{FormatHandler, ReportManifest};
use crate::normalize::NormalizationMap;
use crate::select::select_manifests;
use crate::store::ObjectStore;
use crate::writer::{LoadMode, TableWriter};

/// What one run accomplished. `cursor` is the state in effect when the run
/// ended; unchanged from the loaded one when there was nothing to do.
#[derive(Debug)]
pub struct RunSummary {
    pub manifests_processed: usize,
    pub rows_loaded: u64,
    pub skipped: Vec<SkipReport>,
    pub cursor: Option<RunCursor>,
}

pub struct Pipeline {
    config: Config,
    store: Arc<dyn ObjectStore>,
    writer: Arc<dyn TableWriter>,
    cursor_store: CursorStore,
    scratch_root: PathBuf,
}

impl Pipeline {
    pub fn new(
        config: Config,
        store: Arc<dyn ObjectStore>,
        writer: Arc<dyn TableWriter>,
        cursor_store: CursorStore,
        scratch_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            store,
            writer,
            cursor_store,
            scratch_root: scratch_root.into(),
        }
    }

    /// Execute one run. The cursor is written only after the destination
    /// accepted the table, so a failed run leaves the previous cursor intact
    /// and the next run repeats the same work.
    #[instrument(level = "info", skip(self))]
    pub async fn run(&self) -> Result<RunSummary> {
        self.config.validate()?;
        let window = self.config.window(Utc::now().date_naive())?;
        let cursor = self.cursor_store.load()?;

        let prefix = self.config.report_prefix();
        let objects = self.store.list(&prefix).await?;
        if objects.is_empty() {
            info!(%prefix, "no objects under report prefix, nothing to process");
            return Ok(RunSummary {
                manifests_processed: 0,
                rows_loaded: 0,
                skipped: Vec::new(),
                cursor,
            });
        }

        let format = detect_version(&objects)
            .format()
            .ok_or(IngestError::UnknownLayout(objects.len()))?;
        let handler = FormatHandler::for_format(format);
        let manifests = handler
            .retrieve_manifests(self.store.as_ref(), &objects, &self.config.report_name())
            .await?;

        let selected =
            select_manifests(manifests, &window, cursor.as_ref(), self.config.since_last);
        if selected.is_empty() {
            info!("no new billing periods to process");
            return Ok(RunSummary {
                manifests_processed: 0,
                rows_loaded: 0,
                skipped: Vec::new(),
                cursor,
            });
        }

        let extractor = Extractor::new(
            Arc::clone(&self.store),
            &self.scratch_root,
            self.config.extract_workers,
        )?;

        // The cursor may only advance through the contiguous prefix of
        // committed periods: a failed period must stay below the cursor
        // bound so a later run can pick it up again.
        let mut skipped = Vec::new();
        let mut extractions = Vec::new();
        let mut processed = Vec::new();
        let mut commit_blocked = false;
        let mut committable: Option<&ReportManifest> = None;
        for manifest in &selected {
            match extractor.extract(manifest).await {
                Ok(mut extraction) => {
                    skipped.append(&mut extraction.skipped);
                    if extraction.files.is_empty() {
                        warn!(period = %manifest.period.label, "manifest yielded no usable files");
                        skipped.push(SkipReport::new(
                            manifest.period.label.clone(),
                            "manifest yielded no usable data files",
                        ));
                        commit_blocked = true;
                    } else {
                        extractions.push(extraction);
                        processed.push(manifest);
                        if !commit_blocked {
                            committable = Some(manifest);
                        }
                    }
                }
                Err(err) => {
                    warn!(period = %manifest.period.label, %err, "manifest extraction failed");
                    skipped.push(SkipReport::new(manifest.period.label.clone(), err.to_string()));
                    commit_blocked = true;
                }
            }
        }
        if extractions.is_empty() {
            for skip in &skipped {
                warn!(subject = %skip.subject, reason = %skip.reason, "skipped");
            }
            return Err(IngestError::NothingProcessed.into());
        }

        // Union of every header seen this run, frozen before naming.
        let mut schema = UnifiedSchema::new();
        for extraction in &extractions {
            for file in &extraction.files {
                schema.observe_all(&file.columns_as_seen)?;
            }
        }
        schema.freeze();
        let names = NormalizationMap::build(&schema);

        let historical: Vec<String> = match (&cursor, self.config.since_last) {
            (Some(c), true) => c.columns.clone(),
            _ => Vec::new(),
        };

        if self.config.load_mode() == LoadMode::Incremental {
            let available: HashSet<&str> = names
                .final_names()
                .chain(historical.iter().map(String::as_str))
                .collect();
            for key in &self.config.pkey {
                if !available.contains(key.as_str()) {
                    return Err(IngestError::Config(format!(
                        "primary-key column {key:?} is not present in the unified schema"
                    ))
                    .into());
                }
            }
        }

        // Scratch directories must outlive the load, so the files move out of
        // the extractions while the extractions themselves stay in scope.
        let mut all_files = Vec::new();
        for extraction in &mut extractions {
            all_files.append(&mut extraction.files);
        }

        let table = load_unified(
            &all_files,
            &schema,
            &names,
            &historical,
            &self.scratch_root.join("unified.csv"),
        )?;
        drop(extractions);

        self.writer
            .write(&table, &self.config.pkey, self.config.load_mode())
            .await
            .map_err(|err| IngestError::Destination(err.to_string()))?;

        let cursor = match committable {
            Some(latest) => {
                let new_cursor = RunCursor {
                    period_label: latest.period.label.clone(),
                    period_end: latest.period.end,
                    assembly_id: latest.assembly_id.clone(),
                    last_modified: latest.last_modified,
                    format,
                    columns: table.columns.iter().map(|c| c.name.clone()).collect(),
                };
                self.cursor_store.save(&new_cursor)?;
                Some(new_cursor)
            }
            None => {
                warn!("earliest selected period failed; cursor not advanced");
                cursor
            }
        };

        info!(
            manifests = processed.len(),
            rows = table.row_count,
            skipped = skipped.len(),
            "run committed"
        );
        Ok(RunSummary {
            manifests_processed: processed.len(),
            rows_loaded: table.row_count,
            skipped,
            cursor,
        })
    }
}

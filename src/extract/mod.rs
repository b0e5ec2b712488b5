//! Archive extraction: fetch every data file a manifest references,
//! decompress it into a per-manifest scratch directory, and capture each
//! extracted file's header row for the schema union.

pub mod gzip;
pub mod zip;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tracing::{info, instrument, warn};

use crate::error::SkipReport;
use crate::manifest::{Packing, ReportManifest};
use crate::store::ObjectStore;

/// One decompressed CSV, owned by the extractor until the loader consumes
/// it. The scratch directory backing `local_path` is removed when the
/// originating [`ManifestExtraction`] drops, so cleanup holds on every path.
#[derive(Debug)]
pub struct ExtractedFile {
    pub local_path: PathBuf,
    pub source_key: String,
    pub period_label: String,
    pub columns_as_seen: Vec<String>,
}

/// Everything one manifest yielded: surviving files, per-file skips, and the
/// scratch directory keeping them alive.
#[derive(Debug)]
pub struct ManifestExtraction {
    pub period_label: String,
    pub files: Vec<ExtractedFile>,
    pub skipped: Vec<SkipReport>,
    _scratch: TempDir,
}

struct FetchOutcome {
    paths: Vec<PathBuf>,
    member_skips: Vec<(String, String)>,
}

/// Downloads and decompresses manifest data files with a bounded worker
/// pool. Extraction work may finish out of order; results are collected in
/// data-file order so reruns are deterministic.
pub struct Extractor {
    store: Arc<dyn ObjectStore>,
    scratch_root: PathBuf,
    workers: usize,
}

impl Extractor {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        scratch_root: impl Into<PathBuf>,
        workers: usize,
    ) -> Result<Self> {
        let scratch_root = scratch_root.into();
        std::fs::create_dir_all(&scratch_root)
            .with_context(|| format!("creating scratch root {:?}", scratch_root))?;
        Ok(Self {
            store,
            scratch_root,
            workers: workers.max(1),
        })
    }

    /// Extract one manifest. Idempotent given unchanged source objects: the
    /// same bytes yield the same columns and rows. A corrupt data file is a
    /// per-file skip; the caller decides what an empty result means.
    #[instrument(level = "info", skip(self, manifest), fields(period = %manifest.period.label))]
    pub async fn extract(&self, manifest: &ReportManifest) -> Result<ManifestExtraction> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("{}-", manifest.period.label.replace('/', "-")))
            .tempdir_in(&self.scratch_root)
            .context("creating manifest scratch directory")?;
        let dir = scratch.path().to_path_buf();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut handles = Vec::with_capacity(manifest.data_files.len());
        for (idx, data_file) in manifest.data_files.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let semaphore = Arc::clone(&semaphore);
            let key = data_file.key.clone();
            let packing = data_file.packing();
            let dir = dir.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await?;
                fetch_one(store.as_ref(), &key, packing, &dir, idx).await
            }));
        }

        let mut files = Vec::new();
        let mut skipped = Vec::new();
        for (handle, data_file) in handles.into_iter().zip(&manifest.data_files) {
            match handle.await.context("extraction worker panicked")? {
                Ok(outcome) => {
                    for (member, reason) in outcome.member_skips {
                        warn!(key = %data_file.key, %member, %reason, "skipping archive member");
                        skipped.push(SkipReport::new(
                            format!("{}!{member}", data_file.key),
                            reason,
                        ));
                    }
                    for path in outcome.paths {
                        match read_header(&path) {
                            Ok(columns) if !columns.is_empty() => files.push(ExtractedFile {
                                local_path: path,
                                source_key: data_file.key.clone(),
                                period_label: manifest.period.label.clone(),
                                columns_as_seen: columns,
                            }),
                            Ok(_) => {
                                warn!(key = %data_file.key, "extracted file has no header row");
                                skipped.push(SkipReport::new(
                                    data_file.key.clone(),
                                    "extracted file has no header row",
                                ));
                                let _ = std::fs::remove_file(&path);
                            }
                            Err(err) => {
                                warn!(key = %data_file.key, %err, "unreadable extracted file");
                                skipped
                                    .push(SkipReport::new(data_file.key.clone(), err.to_string()));
                                let _ = std::fs::remove_file(&path);
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(key = %data_file.key, %err, "data file failed, skipping");
                    skipped.push(SkipReport::new(data_file.key.clone(), err.to_string()));
                }
            }
        }

        info!(
            files = files.len(),
            skipped = skipped.len(),
            "manifest extraction finished"
        );
        Ok(ManifestExtraction {
            period_label: manifest.period.label.clone(),
            files,
            skipped,
            _scratch: scratch,
        })
    }
}

async fn fetch_one(
    store: &dyn ObjectStore,
    key: &str,
    packing: Packing,
    dir: &Path,
    idx: usize,
) -> Result<FetchOutcome> {
    let bytes = store.get(key).await?;
    let basename = key.rsplit('/').next().unwrap_or(key).to_string();

    match packing {
        Packing::Zip => {
            let dir = dir.to_path_buf();
            let stem = format!("{idx:03}");
            let outcome =
                tokio::task::spawn_blocking(move || zip::extract_zip_members(&bytes, &dir, &stem))
                    .await
                    .context("zip extraction task panicked")??;
            Ok(FetchOutcome {
                paths: outcome.files,
                member_skips: outcome.skipped,
            })
        }
        Packing::Gzip => {
            let dest = dir.join(format!("{idx:03}_{}", basename.trim_end_matches(".gz")));
            let target = dest.clone();
            tokio::task::spawn_blocking(move || gzip::gunzip_to(&bytes, &target))
                .await
                .context("gzip extraction task panicked")??;
            Ok(FetchOutcome {
                paths: vec![dest],
                member_skips: Vec::new(),
            })
        }
        Packing::Plain => {
            let dest = dir.join(format!("{idx:03}_{basename}"));
            tokio::fs::write(&dest, &bytes)
                .await
                .with_context(|| format!("writing {:?}", dest))?;
            Ok(FetchOutcome {
                paths: vec![dest],
                member_skips: Vec::new(),
            })
        }
    }
}

/// Capture `column_names_as_seen` from the file's first row.
fn read_header(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {:?}", path))?;
    let headers = reader
        .headers()
        .with_context(|| format!("reading header row of {:?}", path))?;
    Ok(headers.iter().map(str::to_string).collect())
}

use anyhow::Result;
use cur_ingest::{
    config::Config,
    cursor::CursorStore,
    pipeline::Pipeline,
    store::fs::FsObjectStore,
    writer::CsvTableWriter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // ─── 1) init logging ─────────────────────────────────────────────
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt::Subscriber::builder()
        .with_env_filter(env)
        .with_span_events(fmt::format::FmtSpan::CLOSE)
        .init();
    info!("startup");

    std::panic::set_hook(Box::new(|info| {
        eprintln!("panic: {:?}", info);
    }));

    // ─── 2) load config ──────────────────────────────────────────────
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::from_yaml_file(Path::new(&config_path))?;
    info!(config = %config_path, report = %config.report_name(), "configured");

    // ─── 3) wire up storage, destination, and state ──────────────────
    let data_dir = PathBuf::from(&config.data_dir);
    let store = Arc::new(FsObjectStore::new(
        data_dir.join(&config.aws_parameters.s3_bucket),
    )?);
    let writer = Arc::new(CsvTableWriter::new(
        data_dir.join("out"),
        config.report_name(),
    ));
    let cursor_store = CursorStore::new(data_dir.join("state.json"));
    let scratch_root = data_dir.join("tmp");

    // ─── 4) run the pipeline once ────────────────────────────────────
    let pipeline = Pipeline::new(config, store, writer, cursor_store, scratch_root);
    let summary = pipeline.run().await?;

    for skip in &summary.skipped {
        warn!(subject = %skip.subject, reason = %skip.reason, "skipped during run");
    }
    if let Some(cursor) = &summary.cursor {
        info!(period = %cursor.period_label, assembly = %cursor.assembly_id, "cursor");
    }
    info!(
        manifests = summary.manifests_processed,
        rows = summary.rows_loaded,
        "all done"
    );
    Ok(())
}

//! Date-range selection: bound resolved manifests by the configured window
//! and the persisted cursor, and collapse superseded revisions so each
//! billing period reaches extraction at most once.

use chrono::NaiveDate;
use std::collections::HashMap;
use tracing::{debug, info};

use crate::config::DateWindow;
use crate::cursor::RunCursor;
use crate::manifest::ReportManifest;

/// Keep manifests whose billing period ends inside the effective window,
/// drop the one the cursor already committed, and keep only the latest
/// revision per period. Output is ordered by period start.
pub fn select_manifests(
    manifests: Vec<ReportManifest>,
    window: &DateWindow,
    cursor: Option<&RunCursor>,
    since_last: bool,
) -> Vec<ReportManifest> {
    let total = manifests.len();

    // The cursor marks "processed up to here" and dominates a configured
    // minimum; in since_last mode the upper bound is open.
    let since = match (since_last, cursor) {
        (true, Some(c)) => window.since.max(c.period_end),
        _ => window.since,
    };
    let until = if since_last {
        NaiveDate::MAX
    } else {
        window.until
    };

    let mut selected: Vec<ReportManifest> = manifests
        .into_iter()
        .filter(|m| {
            if m.period.end < since || m.period.end > until {
                debug!(period = %m.period.label, "outside date window");
                return false;
            }
            if let Some(c) = cursor {
                if c.period_label == m.period.label && c.assembly_id == m.assembly_id {
                    debug!(period = %m.period.label, assembly = %m.assembly_id, "already processed");
                    return false;
                }
            }
            true
        })
        .collect();

    selected = dedupe_latest_revision(selected);
    selected.sort_by(|a, b| a.period.start.cmp(&b.period.start));

    info!(total, selected = selected.len(), "manifests selected for extraction");
    selected
}

/// When one billing period shows up with several assembly ids, the newest
/// revision wins: later modification time, then lexicographically greater
/// assembly id as the tie break.
fn dedupe_latest_revision(manifests: Vec<ReportManifest>) -> Vec<ReportManifest> {
    let mut by_period: HashMap<String, ReportManifest> = HashMap::new();
    for manifest in manifests {
        match by_period.get(&manifest.period.label) {
            Some(kept)
                if (kept.last_modified, &kept.assembly_id)
                    >= (manifest.last_modified, &manifest.assembly_id) =>
            {
                debug!(
                    period = %manifest.period.label,
                    superseded = %manifest.assembly_id,
                    by = %kept.assembly_id,
                    "discarding superseded manifest revision"
                );
            }
            _ => {
                by_period.insert(manifest.period.label.clone(), manifest);
            }
        }
    }
    by_period.into_values().collect()
}

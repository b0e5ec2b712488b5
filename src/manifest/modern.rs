//! CUR 2.0 resolver: manifests live under `metadata/BILLING_PERIOD=<token>/`
//! and carry absolute `s3://` locators in `dataFiles`.

use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

use super::{BillingPeriod, DataFile, ManifestDoc, ReportFormat, ReportManifest};
use crate::store::{ObjectRef, ObjectStore};

static PERIOD_SEGMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"BILLING_PERIOD=([^/]+)").expect("period pattern should parse"));

pub async fn retrieve_manifests(
    store: &dyn ObjectStore,
    objects: &[ObjectRef],
    report_name: &str,
) -> Result<Vec<ReportManifest>> {
    let manifest_name = format!("{report_name}-Manifest.json");
    let mut manifests = Vec::new();

    for object in objects {
        let key = &object.key;
        if !key.contains("metadata/BILLING_PERIOD=") || !key.ends_with(&manifest_name) {
            continue;
        }

        let Some(token) = PERIOD_SEGMENT
            .captures(key)
            .map(|caps| caps[1].to_string())
        else {
            warn!(%key, "could not extract billing period token, skipping");
            continue;
        };
        let Some(period) = BillingPeriod::from_period_token(&token) else {
            warn!(%key, %token, "unrecognized billing period token, skipping");
            continue;
        };

        let raw = match store.get(key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%key, %err, "failed to fetch manifest, skipping period");
                continue;
            }
        };
        let doc: ManifestDoc = match serde_json::from_slice(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(%key, %err, "unparseable manifest JSON, skipping period");
                continue;
            }
        };

        let report_folder = extract_report_folder(key, &token, &manifest_name);
        let data_files = resolve_data_files(&doc, &report_folder, &token, objects);
        let assembly_id = doc.assembly_id(ReportFormat::Modern, &period.label);

        manifests.push(ReportManifest {
            period,
            format: ReportFormat::Modern,
            assembly_id,
            last_modified: object.last_modified,
            data_files,
        });
    }

    info!(count = manifests.len(), "resolved modern manifests");
    Ok(manifests)
}

/// Strip `/metadata/BILLING_PERIOD=<token>/<manifest>` from the key to get
/// the report's base folder.
fn extract_report_folder(manifest_key: &str, token: &str, manifest_name: &str) -> String {
    let suffix = format!("/metadata/BILLING_PERIOD={token}/{manifest_name}");
    if let Some(base) = manifest_key.strip_suffix(&suffix) {
        return base.to_string();
    }
    // Fallback: everything before the metadata segment.
    match manifest_key.find("/metadata/") {
        Some(idx) => manifest_key[..idx].to_string(),
        None => String::new(),
    }
}

/// Data files come from `dataFiles` (absolute `s3://bucket/key` locators),
/// falling back to `reportKeys` resolved against the report folder, falling
/// back to whatever the listing shows under the period's data partition.
fn resolve_data_files(
    doc: &ManifestDoc,
    report_folder: &str,
    token: &str,
    objects: &[ObjectRef],
) -> Vec<DataFile> {
    let entries = if !doc.data_files.is_empty() {
        &doc.data_files
    } else {
        &doc.report_keys
    };

    if entries.is_empty() {
        let partition = if report_folder.is_empty() {
            format!("data/BILLING_PERIOD={token}/")
        } else {
            format!("{report_folder}/data/BILLING_PERIOD={token}/")
        };
        return objects
            .iter()
            .filter(|o| {
                o.key.starts_with(&partition)
                    && (o.key.ends_with(".csv.gz") || o.key.ends_with(".csv"))
            })
            .map(|o| DataFile::new(o.key.clone()))
            .collect();
    }

    entries
        .iter()
        .map(|entry| {
            if let Some(rest) = entry.strip_prefix("s3://") {
                // Drop the bucket segment; keys in this pipeline are already
                // scoped to one bucket.
                match rest.split_once('/') {
                    Some((_bucket, key)) => DataFile::new(key),
                    None => DataFile::new(rest),
                }
            } else if report_folder.is_empty() {
                DataFile::new(entry.clone())
            } else {
                DataFile::new(format!("{report_folder}/{entry}"))
            }
        })
        .collect()
}

//! CUR 1.0 resolver: manifests sit at the root of `YYYYMMDD-YYYYMMDD` period
//! folders and reference their data files through `reportKeys`.

use anyhow::Result;
use tracing::{debug, info, warn};

use super::{BillingPeriod, DataFile, ManifestDoc, ReportFormat, ReportManifest};
use crate::store::{ObjectRef, ObjectStore};

pub async fn retrieve_manifests(
    store: &dyn ObjectStore,
    objects: &[ObjectRef],
    report_name: &str,
) -> Result<Vec<ReportManifest>> {
    let manifest_name = format!("{report_name}-Manifest.json");
    let mut manifests = Vec::new();

    for object in objects {
        let parts: Vec<&str> = object.key.split('/').collect();
        let Some((&object_name, folders)) = parts.split_last() else {
            continue;
        };
        if object_name != manifest_name {
            continue;
        }

        // Period folder is the parent, or the grandparent for layouts with an
        // assembly subfolder between the period and the manifest.
        let period = folders
            .last()
            .and_then(|f| BillingPeriod::from_folder_name(f))
            .or_else(|| {
                folders
                    .len()
                    .checked_sub(2)
                    .and_then(|i| BillingPeriod::from_folder_name(folders[i]))
            });
        let Some(period) = period else {
            debug!(key = %object.key, "manifest outside a period folder, ignoring");
            continue;
        };

        let raw = match store.get(&object.key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(key = %object.key, %err, "failed to fetch manifest, skipping period");
                continue;
            }
        };
        let doc: ManifestDoc = match serde_json::from_slice(&raw) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(key = %object.key, %err, "unparseable manifest JSON, skipping period");
                continue;
            }
        };

        let report_folder = object
            .key
            .strip_suffix(&format!("/{manifest_name}"))
            .unwrap_or("");
        let data_files = resolve_report_keys(&doc.report_keys, report_folder);
        let assembly_id = doc.assembly_id(ReportFormat::Legacy, &period.label);

        manifests.push(ReportManifest {
            period,
            format: ReportFormat::Legacy,
            assembly_id,
            last_modified: object.last_modified,
            data_files,
        });
    }

    info!(count = manifests.len(), "resolved legacy manifests");
    Ok(manifests)
}

/// `reportKeys` are full keys, except under the doubled-slash path syntax
/// where the trailing two segments must be re-anchored onto the manifest's
/// own folder.
fn resolve_report_keys(report_keys: &[String], report_folder: &str) -> Vec<DataFile> {
    report_keys
        .iter()
        .filter(|key| {
            key.ends_with(".zip") || key.ends_with(".csv") || key.ends_with(".csv.gz")
        })
        .map(|key| {
            if report_folder.contains("//") {
                let parts: Vec<&str> = key.split('/').collect();
                if parts.len() >= 2 {
                    let tail = &parts[parts.len() - 2..];
                    return DataFile::new(format!("{report_folder}/{}", tail.join("/")));
                }
            }
            DataFile::new(key.clone())
        })
        .collect()
}

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::manifest::ReportFormat;
use crate::store::ObjectRef;

/// `YYYYMMDD-YYYYMMDD` date-range folder token used by CUR 1.0 layouts.
static DATE_RANGE_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{8}-\d{8}").expect("date range pattern should parse"));

/// Outcome of layout classification. `Unknown` means no usable signal was
/// present; the pipeline treats it as fatal rather than guessing a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectedVersion {
    Legacy,
    Modern,
    Unknown,
}

impl DetectedVersion {
    pub fn format(self) -> Option<ReportFormat> {
        match self {
            DetectedVersion::Legacy => Some(ReportFormat::Legacy),
            DetectedVersion::Modern => Some(ReportFormat::Modern),
            DetectedVersion::Unknown => None,
        }
    }
}

/// Classify the report layout from listed object keys.
///
/// A `BILLING_PERIOD=` partition segment anywhere is decisive for the modern
/// layout and is checked first. Date-range folder tokens signal the legacy
/// layout. Two weaker signals follow: a `/metadata/` segment (modern) and a
/// `.csv.zip` suffix (legacy). Pure over the listing, no side effects.
pub fn detect_version(objects: &[ObjectRef]) -> DetectedVersion {
    if objects.is_empty() {
        return DetectedVersion::Unknown;
    }

    if let Some(hit) = objects.iter().find(|o| o.key.contains("BILLING_PERIOD=")) {
        info!(key = %hit.key, "detected modern layout (BILLING_PERIOD= partitioning)");
        return DetectedVersion::Modern;
    }

    if let Some(hit) = objects.iter().find(|o| DATE_RANGE_TOKEN.is_match(&o.key)) {
        info!(key = %hit.key, "detected legacy layout (date-range folders)");
        return DetectedVersion::Legacy;
    }

    if let Some(hit) = objects.iter().find(|o| o.key.contains("/metadata/")) {
        info!(key = %hit.key, "detected modern layout (metadata folder)");
        return DetectedVersion::Modern;
    }

    if let Some(hit) = objects.iter().find(|o| o.key.ends_with(".csv.zip")) {
        info!(key = %hit.key, "detected legacy layout (csv.zip archives)");
        return DetectedVersion::Legacy;
    }

    debug!(objects = objects.len(), "no layout signal in listing");
    DetectedVersion::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn obj(key: &str) -> ObjectRef {
        ObjectRef {
            key: key.to_string(),
            size: 1,
            last_modified: Utc::now(),
        }
    }

    #[test]
    fn billing_period_marker_wins_over_date_folders() {
        let objects = vec![
            obj("cur/20240101-20240201/cur-Manifest.json"),
            obj("cur/metadata/BILLING_PERIOD=2024-01/cur-Manifest.json"),
        ];
        assert_eq!(detect_version(&objects), DetectedVersion::Modern);
    }

    #[test]
    fn date_range_folders_signal_legacy() {
        let objects = vec![
            obj("cur/20240101-20240201/cur-Manifest.json"),
            obj("cur/20240101-20240201/abc123/cur-1.csv.zip"),
        ];
        assert_eq!(detect_version(&objects), DetectedVersion::Legacy);
    }

    #[test]
    fn metadata_folder_signals_modern() {
        let objects = vec![obj("cur/metadata/cur-Manifest.json")];
        assert_eq!(detect_version(&objects), DetectedVersion::Modern);
    }

    #[test]
    fn zip_suffix_signals_legacy() {
        let objects = vec![obj("cur/assembly/cur-1.csv.zip")];
        assert_eq!(detect_version(&objects), DetectedVersion::Legacy);
    }

    #[test]
    fn no_signal_is_unknown() {
        assert_eq!(detect_version(&[]), DetectedVersion::Unknown);
        assert_eq!(
            detect_version(&[obj("cur/readme.txt")]),
            DetectedVersion::Unknown
        );
    }
}

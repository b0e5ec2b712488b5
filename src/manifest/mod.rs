pub mod legacy;
pub mod modern;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::store::{ObjectRef, ObjectStore};

/// The two incompatible CUR layouts. Selected once by the version detector;
/// everything downstream routes through [`FormatHandler`] and never branches
/// on the format again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Legacy,
    Modern,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Legacy => "legacy",
            ReportFormat::Modern => "modern",
        }
    }
}

static MONTH_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}$").expect("month pattern should parse"));
static DAY_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("day pattern should parse"));
static YEAR_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}$").expect("year pattern should parse"));
static WEEK_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})W(\d{2})$").expect("week pattern should parse"));

/// The date range one manifest covers, with the raw token it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingPeriod {
    /// Original token: `YYYYMMDD-YYYYMMDD` folder name (legacy) or a
    /// `BILLING_PERIOD=` value (modern).
    pub label: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingPeriod {
    /// Parse a legacy `YYYYMMDD-YYYYMMDD` folder name. `None` for anything
    /// else; most folders under a report prefix are not period folders.
    pub fn from_folder_name(folder: &str) -> Option<Self> {
        let (start_raw, end_raw) = folder.split_once('-')?;
        let start = NaiveDate::parse_from_str(start_raw, "%Y%m%d").ok()?;
        let end = NaiveDate::parse_from_str(end_raw, "%Y%m%d").ok()?;
        Some(Self {
            label: folder.to_string(),
            start,
            end,
        })
    }

    /// Parse a modern `BILLING_PERIOD=` token: monthly `YYYY-MM`, daily
    /// `YYYY-MM-DD`, yearly `YYYY`, or ISO-week `YYYYWnn`.
    pub fn from_period_token(token: &str) -> Option<Self> {
        let (start, end) = if DAY_TOKEN.is_match(token) {
            let day = NaiveDate::parse_from_str(token, "%Y-%m-%d").ok()?;
            (day, day)
        } else if MONTH_TOKEN.is_match(token) {
            let (year_raw, month_raw) = token.split_once('-')?;
            let year: i32 = year_raw.parse().ok()?;
            let month: u32 = month_raw.parse().ok()?;
            let start = NaiveDate::from_ymd_opt(year, month, 1)?;
            (start, last_day_of_month(year, month)?)
        } else if YEAR_TOKEN.is_match(token) {
            let year: i32 = token.parse().ok()?;
            (
                NaiveDate::from_ymd_opt(year, 1, 1)?,
                NaiveDate::from_ymd_opt(year, 12, 31)?,
            )
        } else if let Some(caps) = WEEK_TOKEN.captures(token) {
            let year: i32 = caps[1].parse().ok()?;
            let week: u32 = caps[2].parse().ok()?;
            (
                NaiveDate::from_isoywd_opt(year, week, Weekday::Mon)?,
                NaiveDate::from_isoywd_opt(year, week, Weekday::Sun)?,
            )
        } else {
            return None;
        };

        Some(Self {
            label: token.to_string(),
            start,
            end,
        })
    }
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    first_of_next.pred_opt()
}

/// How a data file is packed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packing {
    Plain,
    Zip,
    Gzip,
}

/// One data file referenced by a manifest, already resolved to a full key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFile {
    pub key: String,
}

impl DataFile {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn packing(&self) -> Packing {
        if self.key.ends_with(".zip") {
            Packing::Zip
        } else if self.key.ends_with(".gz") {
            Packing::Gzip
        } else {
            Packing::Plain
        }
    }
}

/// One billing period's manifest, resolved and enriched from the listing.
/// Never mutated after resolution; a later revision of the same period shows
/// up as a second manifest with a different assembly id.
#[derive(Debug, Clone)]
pub struct ReportManifest {
    pub period: BillingPeriod,
    pub format: ReportFormat,
    pub assembly_id: String,
    pub last_modified: DateTime<Utc>,
    pub data_files: Vec<DataFile>,
}

/// Manifest JSON as AWS writes it. Only the fields the pipeline consumes;
/// everything else is ignored.
#[derive(Debug, Deserialize)]
pub struct ManifestDoc {
    #[serde(default, rename = "assemblyId")]
    pub assembly_id: Option<String>,
    #[serde(default, rename = "reportId")]
    pub report_id: Option<String>,
    #[serde(default, rename = "reportKeys")]
    pub report_keys: Vec<String>,
    #[serde(default, rename = "dataFiles")]
    pub data_files: Vec<String>,
}

impl ManifestDoc {
    /// The manifest's revision identity: `assemblyId`, falling back to
    /// `reportId`, falling back to a synthesized per-period id.
    pub fn assembly_id(&self, format: ReportFormat, period_label: &str) -> String {
        self.assembly_id
            .clone()
            .or_else(|| self.report_id.clone())
            .unwrap_or_else(|| {
                format!(
                    "{}-{}",
                    match format {
                        ReportFormat::Legacy => "cur1",
                        ReportFormat::Modern => "cur2",
                    },
                    period_label
                )
            })
    }
}

/// Format-specific manifest resolution behind one call surface. The tagged
/// variant stands in for the class hierarchy the layouts might suggest.
#[derive(Debug, Clone, Copy)]
pub enum FormatHandler {
    Legacy,
    Modern,
}

impl FormatHandler {
    pub fn for_format(format: ReportFormat) -> Self {
        match format {
            ReportFormat::Legacy => FormatHandler::Legacy,
            ReportFormat::Modern => FormatHandler::Modern,
        }
    }

    /// Turn listed objects into resolved manifests, ordered by period start.
    /// Manifest JSON that fails to fetch or parse is a per-manifest warning,
    /// not a run failure.
    pub async fn retrieve_manifests(
        &self,
        store: &dyn ObjectStore,
        objects: &[ObjectRef],
        report_name: &str,
    ) -> Result<Vec<ReportManifest>> {
        let mut manifests = match self {
            FormatHandler::Legacy => {
                legacy::retrieve_manifests(store, objects, report_name).await?
            }
            FormatHandler::Modern => {
                modern::retrieve_manifests(store, objects, report_name).await?
            }
        };
        manifests.sort_by(|a, b| {
            (a.period.start, a.last_modified).cmp(&(b.period.start, b.last_modified))
        });
        Ok(manifests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_legacy_folder_periods() {
        let p = BillingPeriod::from_folder_name("20240101-20240201").unwrap();
        assert_eq!(p.start, NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(p.end, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert!(BillingPeriod::from_folder_name("metadata").is_none());
        assert!(BillingPeriod::from_folder_name("2024-01").is_none());
    }

    #[test]
    fn parses_modern_period_tokens() {
        let month = BillingPeriod::from_period_token("2024-02").unwrap();
        assert_eq!(month.start, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(month.end, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let day = BillingPeriod::from_period_token("2024-03-15").unwrap();
        assert_eq!(day.start, day.end);

        let year = BillingPeriod::from_period_token("2024").unwrap();
        assert_eq!(year.end, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());

        let week = BillingPeriod::from_period_token("2025W03").unwrap();
        assert_eq!(week.start, NaiveDate::from_isoywd_opt(2025, 3, Weekday::Mon).unwrap());
        assert_eq!(week.end, NaiveDate::from_isoywd_opt(2025, 3, Weekday::Sun).unwrap());

        assert!(BillingPeriod::from_period_token("not-a-period").is_none());
    }

    #[test]
    fn assembly_id_fallback_chain() {
        let doc: ManifestDoc = serde_json::from_str(r#"{"reportId": "r-1"}"#).unwrap();
        assert_eq!(doc.assembly_id(ReportFormat::Legacy, "x"), "r-1");

        let doc: ManifestDoc = serde_json::from_str("{}").unwrap();
        assert_eq!(doc.assembly_id(ReportFormat::Modern, "2024-01"), "cur2-2024-01");

        let doc: ManifestDoc =
            serde_json::from_str(r#"{"assemblyId": "a-9", "reportId": "r-1"}"#).unwrap();
        assert_eq!(doc.assembly_id(ReportFormat::Legacy, "x"), "a-9");
    }

    #[test]
    fn packing_from_suffix() {
        assert_eq!(DataFile::new("a/b.csv.zip").packing(), Packing::Zip);
        assert_eq!(DataFile::new("a/b.csv.gz").packing(), Packing::Gzip);
        assert_eq!(DataFile::new("a/b.csv").packing(), Packing::Plain);
    }
}

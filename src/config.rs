use anyhow::{Context, Result};
use chrono::{Days, Months, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::Path;

use crate::error::IngestError;
use crate::writer::LoadMode;

static RELATIVE_EXPR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)\s+(day|days|week|weeks|month|months)\s+ago$")
        .expect("relative date pattern should parse")
});

/// AWS connection parameters. Opaque to the pipeline core; they exist to be
/// handed to whatever object-store implementation is wired in.
#[derive(Debug, Clone, Deserialize)]
pub struct AwsParameters {
    pub api_key_id: String,
    #[serde(alias = "#api_key_secret")]
    pub api_key_secret: String,
    pub s3_bucket: String,
    #[serde(default = "default_region")]
    pub aws_region: String,
}

fn default_region() -> String {
    "eu-central-1".to_string()
}

fn default_max_date() -> String {
    "now".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    num_cpus::get()
}

fn default_data_dir() -> String {
    "data".to_string()
}

/// Run configuration, loaded from a YAML file and validated before the
/// pipeline touches storage.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub aws_parameters: AwsParameters,
    pub report_path_prefix: String,
    #[serde(default)]
    pub min_date_since: Option<String>,
    #[serde(default = "default_max_date")]
    pub max_date: String,
    #[serde(default = "default_true")]
    pub since_last: bool,
    /// 0 = full load, 1 = incremental upsert.
    #[serde(default)]
    pub incremental_output: u8,
    /// Primary-key columns, matched against *normalized* column names.
    #[serde(default)]
    pub pkey: Vec<String>,
    #[serde(default = "default_workers")]
    pub extract_workers: usize,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

/// Resolved absolute date window, closed on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub since: NaiveDate,
    pub until: NaiveDate,
}

impl Config {
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {:?}", path))?;
        let config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| IngestError::Config(format!("config file {:?}: {e}", path)))?;
        config.validate()?;
        Ok(config)
    }

    /// Everything checkable without touching storage. Fatal on failure, per
    /// the configuration-error class.
    pub fn validate(&self) -> Result<()> {
        if self.report_path_prefix.trim_matches(['/', '*']).is_empty() {
            return Err(IngestError::Config("report_path_prefix is required".into()).into());
        }
        if self.incremental_output > 1 {
            return Err(
                IngestError::Config("incremental_output must be 0 or 1".into()).into(),
            );
        }
        if self.load_mode() == LoadMode::Incremental && self.pkey.is_empty() {
            return Err(IngestError::Config(
                "incremental output requires a primary key (pkey)".into(),
            )
            .into());
        }
        if self.extract_workers == 0 {
            return Err(IngestError::Config("extract_workers must be at least 1".into()).into());
        }
        // Date expressions must resolve before any extraction work begins.
        let _ = self.window(chrono::Utc::now().date_naive())?;
        Ok(())
    }

    /// Resolve both bounds against `today`. An absent or empty bound is
    /// unbounded on that side.
    pub fn window(&self, today: NaiveDate) -> Result<DateWindow> {
        let since = match self.min_date_since.as_deref() {
            None | Some("") => NaiveDate::MIN,
            Some(expr) => resolve_date_expr(expr, today)
                .map_err(|e| IngestError::Config(format!("min_date_since: {e}")))?,
        };
        let until = match self.max_date.as_str() {
            "" => NaiveDate::MAX,
            expr => resolve_date_expr(expr, today)
                .map_err(|e| IngestError::Config(format!("max_date: {e}")))?,
        };
        Ok(DateWindow { since, until })
    }

    /// Prefix as used for listing: trailing slash and wildcard stripped,
    /// matching stays starts-with.
    pub fn report_prefix(&self) -> String {
        self.report_path_prefix
            .trim_end_matches('*')
            .trim_end_matches('/')
            .to_string()
    }

    /// Last path segment of the prefix names the report (and its manifests).
    pub fn report_name(&self) -> String {
        let prefix = self.report_prefix();
        prefix.rsplit('/').next().unwrap_or(&prefix).to_string()
    }

    pub fn load_mode(&self) -> LoadMode {
        if self.incremental_output == 1 {
            LoadMode::Incremental
        } else {
            LoadMode::Full
        }
    }
}

/// Resolve a calendar date or a relative expression (`now`, `today`,
/// `yesterday`, `N days|weeks|months ago`) against `today`.
pub fn resolve_date_expr(expr: &str, today: NaiveDate) -> Result<NaiveDate> {
    let expr = expr.trim();
    match expr {
        "now" | "today" => return Ok(today),
        "yesterday" => {
            return today
                .checked_sub_days(Days::new(1))
                .context("date underflow resolving 'yesterday'")
        }
        _ => {}
    }

    if let Some(caps) = RELATIVE_EXPR.captures(&expr.to_lowercase()) {
        let amount: u64 = caps[1].parse().context("relative amount out of range")?;
        let resolved = match &caps[2] {
            "day" | "days" => today.checked_sub_days(Days::new(amount)),
            "week" | "weeks" => today.checked_sub_days(Days::new(amount * 7)),
            _ => today.checked_sub_months(Months::new(amount as u32)),
        };
        return resolved.with_context(|| format!("date underflow resolving '{expr}'"));
    }

    NaiveDate::parse_from_str(expr, "%Y-%m-%d")
        .with_context(|| format!("'{expr}' is neither YYYY-MM-DD nor a relative expression"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        serde_yaml::from_str(
            r#"
aws_parameters:
  api_key_id: AKIA
  '#api_key_secret': secret
  s3_bucket: billing
report_path_prefix: reports/cur/
"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_applied() {
        let config = base_config();
        assert_eq!(config.max_date, "now");
        assert!(config.since_last);
        assert_eq!(config.incremental_output, 0);
        assert_eq!(config.load_mode(), LoadMode::Full);
        assert_eq!(config.aws_parameters.aws_region, "eu-central-1");
    }

    #[test]
    fn prefix_cleanup_and_report_name() {
        let mut config = base_config();
        config.report_path_prefix = "reports/cur/*".to_string();
        assert_eq!(config.report_prefix(), "reports/cur");
        assert_eq!(config.report_name(), "cur");
    }

    #[test]
    fn resolves_relative_expressions() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();
        assert_eq!(resolve_date_expr("now", today).unwrap(), today);
        assert_eq!(resolve_date_expr("today", today).unwrap(), today);
        assert_eq!(
            resolve_date_expr("yesterday", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
        );
        assert_eq!(
            resolve_date_expr("7 days ago", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
        );
        assert_eq!(
            resolve_date_expr("2 weeks ago", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(
            resolve_date_expr("2 months ago", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()
        );
        assert_eq!(
            resolve_date_expr("2024-01-01", today).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert!(resolve_date_expr("next tuesday", today).is_err());
    }

    #[test]
    fn unresolvable_bound_is_a_config_error() {
        let mut config = base_config();
        config.min_date_since = Some("whenever".to_string());
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Config(_))
        ));
    }

    #[test]
    fn incremental_without_pkey_is_rejected() {
        let mut config = base_config();
        config.incremental_output = 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IngestError>(),
            Some(IngestError::Config(_))
        ));

        config.pkey = vec!["identity__LineItemId".to_string()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn empty_bounds_are_unbounded() {
        let mut config = base_config();
        config.min_date_since = Some(String::new());
        config.max_date = String::new();
        let window = config.window(NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()).unwrap();
        assert_eq!(window.since, NaiveDate::MIN);
        assert_eq!(window.until, NaiveDate::MAX);
    }
}

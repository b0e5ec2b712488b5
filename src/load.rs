//! Schema-unifying bulk load: union the column sets of every extracted file,
//! then stream all rows against the frozen union, null-filling the gaps.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{info, instrument, warn};

use crate::extract::ExtractedFile;
use crate::normalize::NormalizationMap;

/// Running union of raw column names across all files of a run. First-seen
/// order is preserved and membership is exact: case variants of a name stay
/// separate columns here, and the normalizer decides how their final names
/// disambiguate. Grows monotonically, then freezes before normalization.
#[derive(Debug, Default)]
pub struct UnifiedSchema {
    columns: Vec<String>,
    seen: HashSet<String>,
    frozen: bool,
}

impl UnifiedSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, raw_name: &str) -> Result<()> {
        if self.frozen {
            bail!("unified schema is frozen; column {raw_name:?} arrived too late");
        }
        if self.seen.insert(raw_name.to_string()) {
            self.columns.push(raw_name.to_string());
        }
        Ok(())
    }

    pub fn observe_all<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) -> Result<()> {
        for name in names {
            self.observe(name)?;
        }
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Narrowest type that held every value seen for a column. Widens one way:
/// Integer → Float → Text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    Float,
    Text,
}

impl ColumnType {
    fn of_value(value: &str) -> Self {
        if value.parse::<i64>().is_ok() {
            ColumnType::Integer
        } else if value.parse::<f64>().is_ok() {
            ColumnType::Float
        } else {
            ColumnType::Text
        }
    }

    fn widen(self, other: Self) -> Self {
        use ColumnType::*;
        match (self, other) {
            (Integer, Integer) => Integer,
            (Text, _) | (_, Text) => Text,
            _ => Float,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
}

/// The materialized unified relation: one CSV file with the normalized
/// header, plus the inferred per-column types.
#[derive(Debug)]
pub struct UnifiedTable {
    pub path: PathBuf,
    pub columns: Vec<ColumnDef>,
    pub row_count: u64,
}

/// Stream every extracted file against the frozen schema into one CSV at
/// `out_path`. Columns a file lacks come out empty (null); the output header
/// uses the normalized names. `historical_columns` are final names from
/// previous runs: they lead the output in their persisted order and stay
/// null-filled when nothing in this run maps onto them, so a column once
/// seen never disappears. Extracted files are removed after they are
/// consumed, load outcome notwithstanding.
#[instrument(level = "info", skip_all, fields(files = files.len(), columns = schema.len()))]
pub fn load_unified(
    files: &[ExtractedFile],
    schema: &UnifiedSchema,
    names: &NormalizationMap,
    historical_columns: &[String],
    out_path: &Path,
) -> Result<UnifiedTable> {
    if !schema.is_frozen() {
        bail!("unified schema must be frozen before loading");
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory {:?}", parent))?;
    }
    let mut writer =
        csv::Writer::from_path(out_path).with_context(|| format!("creating {:?}", out_path))?;

    // Output columns: historical first (persisted order), then whatever this
    // run's normalization added.
    let mut output_names: Vec<String> = historical_columns.to_vec();
    let mut slot_by_final: HashMap<String, usize> = output_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.clone(), i))
        .collect();
    for final_name in names.final_names() {
        if !slot_by_final.contains_key(final_name) {
            slot_by_final.insert(final_name.to_string(), output_names.len());
            output_names.push(final_name.to_string());
        }
    }
    writer.write_record(&output_names).context("writing header")?;

    // Raw schema column -> slot in the output row.
    let mut raw_slots: HashMap<&str, usize> = HashMap::with_capacity(schema.len());
    for raw in schema.columns() {
        let final_name = names.resolve(raw)?;
        let slot = slot_by_final
            .get(final_name)
            .copied()
            .with_context(|| format!("no output slot for column {final_name:?}"))?;
        raw_slots.insert(raw.as_str(), slot);
    }

    let mut types: Vec<Option<ColumnType>> = vec![None; output_names.len()];
    let mut row_count: u64 = 0;
    let result = (|| -> Result<()> {
        for file in files {
            let loaded =
                load_one_file(file, &raw_slots, output_names.len(), &mut types, &mut writer)?;
            row_count += loaded;
            info!(file = %file.local_path.display(), rows = loaded, "loaded");
        }
        writer.flush().context("flushing unified output")?;
        Ok(())
    })();

    // The scratch files are spent either way.
    for file in files {
        if let Err(err) = std::fs::remove_file(&file.local_path) {
            warn!(file = %file.local_path.display(), %err, "failed to remove extracted file");
        }
    }
    result?;

    let columns = output_names
        .iter()
        .zip(&types)
        .map(|(name, ty)| ColumnDef {
            name: name.clone(),
            ty: ty.unwrap_or(ColumnType::Text),
        })
        .collect();

    info!(rows = row_count, path = %out_path.display(), "unified table materialized");
    Ok(UnifiedTable {
        path: out_path.to_path_buf(),
        columns,
        row_count,
    })
}

fn load_one_file(
    file: &ExtractedFile,
    raw_slots: &HashMap<&str, usize>,
    width: usize,
    types: &mut [Option<ColumnType>],
    writer: &mut csv::Writer<std::fs::File>,
) -> Result<u64> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(&file.local_path)
        .with_context(|| format!("opening {:?}", file.local_path))?;

    // Map each source column position to its slot in the output row. A
    // header repeated within one file maps only its first position; later
    // positions would otherwise append into the same cell.
    let mut assigned: HashSet<usize> = HashSet::new();
    let slots: Vec<Option<usize>> = file
        .columns_as_seen
        .iter()
        .map(|name| {
            raw_slots
                .get(name.as_str())
                .copied()
                .filter(|slot| assigned.insert(*slot))
        })
        .collect();
    let mut row: Vec<String> = vec![String::new(); width];
    let mut count: u64 = 0;

    for record in reader.records() {
        let record =
            record.with_context(|| format!("reading row from {:?}", file.local_path))?;
        row.iter_mut().for_each(String::clear);
        for (pos, value) in record.iter().enumerate() {
            let Some(Some(slot)) = slots.get(pos) else {
                continue;
            };
            if !value.is_empty() {
                let observed = ColumnType::of_value(value);
                types[*slot] = Some(match types[*slot] {
                    Some(current) => current.widen(observed),
                    None => observed,
                });
            }
            row[*slot].push_str(value);
        }
        writer
            .write_record(&row)
            .with_context(|| format!("writing row from {:?}", file.local_path))?;
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::NormalizationMap;
    use std::fs;

    fn extracted(dir: &Path, name: &str, content: &str) -> ExtractedFile {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        let mut reader = csv::Reader::from_path(&path).unwrap();
        let columns = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        ExtractedFile {
            local_path: path,
            source_key: name.to_string(),
            period_label: "2024-01".to_string(),
            columns_as_seen: columns,
        }
    }

    fn unified_with_history(
        files: &[ExtractedFile],
        historical: &[String],
        dir: &Path,
    ) -> UnifiedTable {
        let mut schema = UnifiedSchema::new();
        for f in files {
            schema.observe_all(&f.columns_as_seen).unwrap();
        }
        schema.freeze();
        let names = NormalizationMap::build(&schema);
        load_unified(files, &schema, &names, historical, &dir.join("unified.csv")).unwrap()
    }

    fn unified(files: &[ExtractedFile], dir: &Path) -> UnifiedTable {
        unified_with_history(files, &[], dir)
    }

    #[test]
    fn unions_columns_and_null_fills() {
        let dir = tempfile::tempdir().unwrap();
        let a = extracted(dir.path(), "a.csv", "bill/InvoiceId,cost\ninv-1,1.5\n");
        let b = extracted(dir.path(), "b.csv", "cost,usageType\n2.0,BoxUsage\n");
        let table = unified(&[a, b], dir.path());

        assert_eq!(table.row_count, 2);
        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["bill__InvoiceId", "cost", "usageType"]);

        let content = fs::read_to_string(&table.path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "bill__InvoiceId,cost,usageType");
        assert_eq!(lines.next().unwrap(), "inv-1,1.5,");
        assert_eq!(lines.next().unwrap(), ",2.0,BoxUsage");
    }

    #[test]
    fn row_count_is_sum_of_per_file_counts() {
        let dir = tempfile::tempdir().unwrap();
        let a = extracted(dir.path(), "a.csv", "x\n1\n2\n3\n");
        let b = extracted(dir.path(), "b.csv", "y\nq\n");
        let table = unified(&[a, b], dir.path());
        assert_eq!(table.row_count, 4);
    }

    #[test]
    fn types_widen_and_fall_back_to_text() {
        let dir = tempfile::tempdir().unwrap();
        let a = extracted(dir.path(), "a.csv", "n,m,s\n1,2,x\n");
        let b = extracted(dir.path(), "b.csv", "n,m,s\n2.5,oops,y\n");
        let table = unified(&[a, b], dir.path());

        assert_eq!(table.columns[0].ty, ColumnType::Float);
        assert_eq!(table.columns[1].ty, ColumnType::Text);
        assert_eq!(table.columns[2].ty, ColumnType::Text);
    }

    #[test]
    fn extracted_files_are_removed_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let a = extracted(dir.path(), "a.csv", "x\n1\n");
        let path = a.local_path.clone();
        let _ = unified(&[a], dir.path());
        assert!(!path.exists());
    }

    #[test]
    fn observe_after_freeze_is_rejected() {
        let mut schema = UnifiedSchema::new();
        schema.observe("a").unwrap();
        schema.freeze();
        assert!(schema.observe("b").is_err());
    }

    #[test]
    fn exact_duplicates_union_once_but_case_variants_stay_separate() {
        let mut schema = UnifiedSchema::new();
        schema.observe("UsageType").unwrap();
        schema.observe("UsageType").unwrap();
        schema.observe("usagetype").unwrap();
        assert_eq!(
            schema.columns(),
            &["UsageType".to_string(), "usagetype".to_string()]
        );
    }

    #[test]
    fn repeated_header_within_one_file_keeps_the_first_value() {
        let dir = tempfile::tempdir().unwrap();
        let a = extracted(dir.path(), "a.csv", "x,x,y\n1,2,3\n");
        let table = unified(&[a], dir.path());

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["x", "y"]);

        let content = fs::read_to_string(&table.path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "x,y");
        assert_eq!(lines.next().unwrap(), "1,3");
    }

    #[test]
    fn historical_columns_lead_the_output_and_stay_null() {
        let dir = tempfile::tempdir().unwrap();
        let a = extracted(dir.path(), "a.csv", "bill/InvoiceId,fresh\ninv-1,x\n");
        let historical = vec!["old_col".to_string(), "bill__InvoiceId".to_string()];
        let table = unified_with_history(&[a], &historical, dir.path());

        let names: Vec<&str> = table.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["old_col", "bill__InvoiceId", "fresh"]);

        let content = fs::read_to_string(&table.path).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next().unwrap(), "old_col,bill__InvoiceId,fresh");
        // The current run's bill/InvoiceId maps onto the historical column;
        // old_col has no source this run and stays null.
        assert_eq!(lines.next().unwrap(), ",inv-1,x");
    }
}

//! Deterministic column-name normalization: storage-safe identifiers,
//! collision-free across the whole run, computed once after the unified
//! schema freezes.

use anyhow::{anyhow, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};

use crate::load::UnifiedSchema;

static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("unsafe-chars pattern should parse"));

/// Bijective raw → final column-name mapping for one run. Both formats go
/// through the same pipeline; modern flat names simply come out unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizationMap {
    entries: Vec<(String, String)>,
    by_raw: HashMap<String, usize>,
}

impl NormalizationMap {
    /// Build the mapping over a frozen schema, in schema order.
    ///
    /// Per raw name: the legacy `category/member` separator becomes `__`,
    /// every other unsafe character becomes `_`, and exact duplicates of an
    /// already-assigned final name take `_1`, `_2`… suffixes whose counter
    /// is shared across the case-fold bucket. A name that differs from an
    /// assigned one only by case keeps its own spelling; the case-fold
    /// bucket exists so repeat collisions keep numbering in first-seen
    /// order.
    pub fn build(schema: &UnifiedSchema) -> Self {
        let mut entries = Vec::with_capacity(schema.len());
        let mut by_raw = HashMap::with_capacity(schema.len());
        let mut used: HashSet<String> = HashSet::new();
        let mut bucket_counters: HashMap<String, u32> = HashMap::new();

        for raw in schema.columns() {
            let base = sanitize(raw);
            let final_name = if used.insert(base.clone()) {
                base
            } else {
                let counter = bucket_counters.entry(base.to_lowercase()).or_insert(0);
                loop {
                    *counter += 1;
                    let candidate = format!("{base}_{counter}");
                    if used.insert(candidate.clone()) {
                        break candidate;
                    }
                }
            };
            by_raw.insert(raw.clone(), entries.len());
            entries.push((raw.clone(), final_name));
        }

        Self { entries, by_raw }
    }

    pub fn resolve(&self, raw: &str) -> Result<&str> {
        self.by_raw
            .get(raw)
            .map(|&i| self.entries[i].1.as_str())
            .ok_or_else(|| anyhow!("column {raw:?} is not part of this run's schema"))
    }

    pub fn final_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, f)| f.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(r, f)| (r.as_str(), f.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn sanitize(raw: &str) -> String {
    let with_category_sep = raw.replace('/', "__");
    UNSAFE_CHARS
        .replace_all(&with_category_sep, "_")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(names: &[&str]) -> UnifiedSchema {
        let mut schema = UnifiedSchema::new();
        for name in names {
            schema.observe(name).unwrap();
        }
        schema.freeze();
        schema
    }

    fn finals(names: &[&str]) -> Vec<String> {
        NormalizationMap::build(&schema(names))
            .final_names()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn legacy_category_names_flatten() {
        assert_eq!(
            finals(&["bill/InvoiceId", "lineItem/UsageAmount"]),
            vec!["bill__InvoiceId", "lineItem__UsageAmount"]
        );
    }

    #[test]
    fn case_variants_keep_their_spelling_and_repeats_get_suffixes() {
        assert_eq!(
            finals(&[
                "bill/InvoiceId",
                "resourceTags/user:owner",
                "resourceTags/user:Owner",
                "resourceTags/user;owner",
            ]),
            vec![
                "bill__InvoiceId",
                "resourceTags__user_owner",
                "resourceTags__user_Owner",
                "resourceTags__user_owner_1",
            ]
        );
    }

    #[test]
    fn suffix_counter_is_scoped_per_bucket() {
        assert_eq!(
            finals(&["a b", "a_b", "c d", "c_d"]),
            vec!["a_b", "a_b_1", "c_d", "c_d_1"]
        );
    }

    #[test]
    fn modern_flat_names_pass_through() {
        assert_eq!(
            finals(&["line_item_usage_amount", "bill_invoice_id"]),
            vec!["line_item_usage_amount", "bill_invoice_id"]
        );
    }

    #[test]
    fn deterministic_over_the_same_schema() {
        let s = schema(&["x/y", "x_y", "X/Y"]);
        let first = NormalizationMap::build(&s);
        let second = NormalizationMap::build(&s);
        assert_eq!(first, second);
    }

    #[test]
    fn final_names_are_distinct() {
        let map = NormalizationMap::build(&schema(&["x/y", "x_y", "x;y", "x y"]));
        let names: Vec<&str> = map.final_names().collect();
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(names.len(), unique.len());
    }

    #[test]
    fn resolve_is_total_over_the_schema() {
        let map = NormalizationMap::build(&schema(&["a/b"]));
        assert_eq!(map.resolve("a/b").unwrap(), "a__b");
        assert!(map.resolve("missing").is_err());
    }
}

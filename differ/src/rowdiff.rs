//! PK-indexed row diff (§4.4): the core of C4.

use std::collections::{BTreeMap, HashSet};

use recorder_kernel::fingerprint::{auto_parallel_settings, rowhash, schema_diff};
use recorder_kernel::table::Table;
use serde::{Deserialize, Serialize};

use crate::cache::RowHashCache;
use crate::config::{DiffConfig, DiffDetailMode};
use crate::error::DiffError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffHash {
    pub algo: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub removed: usize,
    pub changed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffNotes {
    pub order_sensitive: bool,
    pub sample_rows: usize,
    pub hash_cols_mode: String,
    pub schema_changed: bool,
    pub cols_only_in_left: Vec<String>,
    pub cols_only_in_right: Vec<String>,
    pub treat_schema_add_remove_as_change: bool,
    pub chunk_rows: usize,
    pub hash_group_size: usize,
    pub parallel_groups: usize,
}

/// The row-diff payload (§4.4 "Output"), byte-identical under the
/// canonical encoder across repeated calls on byte-equal inputs (§8
/// determinism).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowDiff {
    pub version: String,
    pub mode: String,
    pub hash: DiffHash,
    pub primary_key: Vec<String>,
    pub cols_hashed: Vec<String>,
    pub added_keys: Vec<String>,
    pub removed_keys: Vec<String>,
    pub changed_keys: Vec<String>,
    pub summary_only: bool,
    pub summary: DiffSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_hint: Option<String>,
    pub diff_mode: String,
    pub notes: DiffNotes,
}

/// Extra, rarely-changed knobs threaded through [`diff_rowhash`] that don't
/// belong on the always-present [`DiffConfig`] call surface: a total-keys
/// hint used for the churn ratio and the schema-add-remove-as-change
/// override (both named explicitly in §4.4).
#[derive(Debug, Clone, Default)]
pub struct DiffOptions {
    pub total_keys_hint: Option<usize>,
    pub treat_schema_add_remove_as_change: bool,
}

fn pk_text(table: &Table, pk: &[String], row: usize) -> String {
    if pk.len() == 1 {
        table
            .column(&pk[0])
            .and_then(|c| c.values.get(row))
            .map(|c| c.canonical_text())
            .unwrap_or_default()
    } else {
        pk.iter()
            .map(|name| {
                table
                    .column(name)
                    .and_then(|c| c.values.get(row))
                    .map(|c| c.canonical_text())
                    .unwrap_or_default()
            })
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// A new table containing rows `[start, end)` of every column (`Table` has
/// no built-in offset slice, only `head`).
fn row_slice(table: &Table, start: usize, end: usize) -> Table {
    use recorder_kernel::table::Column;
    Table::new(
        table
            .columns()
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                dtype: c.dtype.clone(),
                values: c.values[start..end].to_vec(),
            })
            .collect(),
    )
}

/// Build a `PK text -> row hash` map for `table`, failing on duplicate PK
/// values within this side (up to 5 samples reported, §4.4).
fn build_map(
    table: &Table,
    pk: &[String],
    cols_hashed: &[String],
    keys_only: bool,
    cache: Option<&mut RowHashCache>,
    group_size: usize,
    workers: usize,
    side: &str,
) -> Result<BTreeMap<String, u64>, DiffError> {
    let n = table.n_rows();
    let hashes: Vec<u64> = if keys_only || cols_hashed.is_empty() {
        vec![0u64; n]
    } else if let Some(cache) = cache {
        cache.get_or_compute(table, cols_hashed, group_size, workers)
    } else {
        rowhash(table, cols_hashed, group_size, workers)
    };

    let mut map = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut dup_samples = Vec::new();
    for row in 0..n {
        let key = pk_text(table, pk, row);
        if !seen.insert(key.clone()) {
            if dup_samples.len() < 5 && !dup_samples.contains(&key) {
                dup_samples.push(key.clone());
            }
            continue;
        }
        map.insert(key, hashes.get(row).copied().unwrap_or(0));
    }
    if !dup_samples.is_empty() {
        dup_samples.sort();
        return Err(DiffError::PkDuplicate { side: side.to_string(), samples: dup_samples });
    }
    Ok(map)
}

/// Build a `PK text -> row hash` map iterating `table` in `chunk_rows`-sized
/// chunks, duplicate detection cumulative across chunks (§4.4 "Chunked
/// variant").
fn build_map_chunked(
    table: &Table,
    pk: &[String],
    cols_hashed: &[String],
    keys_only: bool,
    chunk_rows: usize,
    group_size: usize,
    workers: usize,
    side: &str,
) -> Result<BTreeMap<String, u64>, DiffError> {
    let n = table.n_rows();
    let step = if chunk_rows == 0 { n.max(1) } else { chunk_rows };
    let mut map = BTreeMap::new();
    let mut seen = HashSet::new();
    let mut dup_samples: Vec<String> = Vec::new();
    let mut start = 0;
    while start < n {
        let end = (start + step).min(n);
        let chunk = row_slice(table, start, end);
        let chunk_hashes: Vec<u64> = if keys_only || cols_hashed.is_empty() {
            vec![0u64; end - start]
        } else {
            rowhash(&chunk, cols_hashed, group_size, workers)
        };
        for (offset, row) in (start..end).enumerate() {
            let key = pk_text(table, pk, row);
            if !seen.insert(key.clone()) {
                if dup_samples.len() < 5 && !dup_samples.contains(&key) {
                    dup_samples.push(key.clone());
                }
                continue;
            }
            map.insert(key, chunk_hashes.get(offset).copied().unwrap_or(0));
        }
        start = end;
    }
    if !dup_samples.is_empty() {
        dup_samples.sort();
        return Err(DiffError::PkDuplicate { side: side.to_string(), samples: dup_samples });
    }
    Ok(map)
}

/// Run the PK-indexed row diff of `a` against `b` (§4.4).
///
/// `cache_a`/`cache_b` are independent handles, one per side. A
/// [`RowHashCache`] is keyed only by `(cols, group_size)` with no table
/// identity (§9), so sharing a single handle across both sides would let
/// side B's lookup hit the entry side A just stored whenever the two
/// tables have the same row count — silently handing B side A's row
/// hashes. Each side must own its own cache.
///
/// # Errors
/// Returns [`DiffError::PkMissing`] if a declared/inferred primary key
/// column is absent from either table, or [`DiffError::PkDuplicate`] if a
/// primary key value repeats within one side.
pub fn diff_rowhash(
    a: &Table,
    b: &Table,
    config: &DiffConfig,
    options: &DiffOptions,
    cache_a: Option<&mut RowHashCache>,
    cache_b: Option<&mut RowHashCache>,
) -> Result<RowDiff, DiffError> {
    let a_cols = a.column_names();
    let b_cols = b.column_names();

    let pk = match &config.primary_key {
        Some(pk) => pk.clone(),
        None if a_cols.iter().any(|c| c == "id") && b_cols.iter().any(|c| c == "id") => {
            vec!["id".to_string()]
        }
        None => vec![a_cols.first().cloned().unwrap_or_default()],
    };

    let missing: Vec<String> = pk
        .iter()
        .filter(|c| !a_cols.contains(c) || !b_cols.contains(c))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DiffError::PkMissing {
            detail: format!("primary key columns missing from one or both tables: {missing:?}"),
        });
    }

    let a_set: HashSet<&String> = a_cols.iter().collect();
    let b_set: HashSet<&String> = b_cols.iter().collect();
    let cols_only_in_left: Vec<String> = a_cols.iter().filter(|c| !b_set.contains(c)).cloned().collect();
    let cols_only_in_right: Vec<String> = b_cols.iter().filter(|c| !a_set.contains(c)).cloned().collect();
    let common_cols: Vec<String> = a_cols.iter().filter(|c| b_set.contains(c)).cloned().collect();

    let pk_set: HashSet<&String> = pk.iter().collect();
    let cols_hashed: Vec<String> = common_cols.into_iter().filter(|c| !pk_set.contains(c)).collect();

    let keys_only = matches!(config.diff_mode, DiffDetailMode::KeysOnly);

    let (group_size, workers) = {
        let settings = auto_parallel_settings(
            cols_hashed.len(),
            if config.hash_group_size > 0 { Some(config.hash_group_size) } else { None },
            if config.parallel_groups > 0 { Some(config.parallel_groups) } else { None },
            config.auto_parallel_wide,
            config.auto_parallel_threshold_cols,
        );
        match settings {
            Some(resolved) => (resolved.group_size, resolved.workers),
            None => (config.hash_group_size, config.parallel_groups.max(1)),
        }
    };

    let (a_view, b_view) = if config.sample_rows > 0 {
        (a.head(config.sample_rows), b.head(config.sample_rows))
    } else {
        (a.clone(), b.clone())
    };

    let (a_map, b_map) = if config.chunk_rows > 0 {
        (
            build_map_chunked(&a_view, &pk, &cols_hashed, keys_only, config.chunk_rows, group_size, workers, "a")?,
            build_map_chunked(&b_view, &pk, &cols_hashed, keys_only, config.chunk_rows, group_size, workers, "b")?,
        )
    } else {
        (
            build_map(&a_view, &pk, &cols_hashed, keys_only, cache_a, group_size, workers, "a")?,
            build_map(&b_view, &pk, &cols_hashed, keys_only, cache_b, group_size, workers, "b")?,
        )
    };

    let a_keys: HashSet<&String> = a_map.keys().collect();
    let b_keys: HashSet<&String> = b_map.keys().collect();

    let mut added_keys: Vec<String> = b_keys.iter().filter(|k| !a_keys.contains(**k)).map(|k| (*k).clone()).collect();
    let mut removed_keys: Vec<String> = a_keys.iter().filter(|k| !b_keys.contains(**k)).map(|k| (*k).clone()).collect();
    added_keys.sort();
    removed_keys.sort();

    let mut changed_keys: Vec<String> = if keys_only {
        Vec::new()
    } else {
        a_keys
            .iter()
            .filter(|k| b_keys.contains(**k))
            .filter(|k| a_map.get(**k) != b_map.get(**k))
            .map(|k| (*k).clone())
            .collect()
    };
    changed_keys.sort();

    let added_count = added_keys.len();
    let removed_count = removed_keys.len();
    let mut changed_count = changed_keys.len();

    let schema_changed = !cols_only_in_left.is_empty() || !cols_only_in_right.is_empty();
    if options.treat_schema_add_remove_as_change && schema_changed {
        let common_count = a_keys.intersection(&b_keys).count();
        changed_keys = a_keys.intersection(&b_keys).map(|k| (*k).clone()).collect();
        changed_keys.sort();
        changed_count = common_count;
    }

    let total_keys = options.total_keys_hint.unwrap_or_else(|| a_keys.len().max(b_keys.len())).max(1);
    let ratio = (added_count + removed_count) as f64 / total_keys as f64;
    let summary_only = config.summary_only_threshold > 0.0 && ratio >= config.summary_only_threshold;

    let (added_keys, removed_keys, changed_keys, ui_hint) = if summary_only {
        (Vec::new(), Vec::new(), Vec::new(), Some("summary_only_high_churn".to_string()))
    } else {
        (added_keys, removed_keys, changed_keys, None)
    };

    let diff_mode_str = match config.diff_mode {
        DiffDetailMode::Rows => "rows",
        DiffDetailMode::Schema => "schema",
        DiffDetailMode::KeysOnly => "keys-only",
    };

    Ok(RowDiff {
        version: "0.1".to_string(),
        mode: "rowhash".to_string(),
        hash: DiffHash { algo: "xxh3_64".to_string(), label: "h64".to_string() },
        primary_key: pk,
        cols_hashed,
        added_keys,
        removed_keys,
        changed_keys,
        summary_only,
        summary: DiffSummary { added: added_count, removed: removed_count, changed: changed_count },
        ui_hint,
        diff_mode: diff_mode_str.to_string(),
        notes: DiffNotes {
            order_sensitive: config.order_sensitive,
            sample_rows: config.sample_rows,
            hash_cols_mode: "shared".to_string(),
            schema_changed,
            cols_only_in_left,
            cols_only_in_right,
            treat_schema_add_remove_as_change: options.treat_schema_add_remove_as_change,
            chunk_rows: config.chunk_rows,
            hash_group_size: group_size,
            parallel_groups: workers,
        },
    })
}

/// True when `a` and `b` have identical schemas and the given schema diff
/// is empty — a convenience the orchestrator (§4.7) uses alongside content
/// fingerprint comparison to decide fingerprint-skip.
#[must_use]
pub fn schemas_match(a: &Table, b: &Table) -> bool {
    schema_diff(a, b).is_empty()
}

//! Row-hash memoization as an explicit-handle cache (§4.3, §9).
//!
//! The original reference keys its cache by `id(df)` in a process-global
//! weak-reference map — flagged in the Design Notes as an anti-pattern to
//! avoid. This re-architects it as a pure value the caller owns and passes
//! in explicitly: a [`RowHashCache`] is scoped to exactly one [`Table`]
//! value for its lifetime. Reusing a cache against a *different* table is a
//! caller bug (the key space does not include table identity or content),
//! so callers construct a fresh cache per table rather than sharing one
//! across tables.

use std::collections::HashMap;

use recorder_kernel::fingerprint::rowhash;
use recorder_kernel::table::Table;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    cols: Vec<String>,
    group_size: usize,
}

/// Caches `rowhash` results for one table across repeated calls with the
/// same column set and group size, avoiding recomputation when a step
/// revisits the same hashed columns (e.g. once for the content fingerprint,
/// once for the row diff).
#[derive(Debug, Default)]
pub struct RowHashCache {
    entries: HashMap<CacheKey, Vec<u64>>,
}

impl RowHashCache {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Returns the cached hash series if present and of the expected
    /// length (§8 "row-hash cache soundness": a stale-length hit is never
    /// returned), else computes, stores, and returns a fresh series.
    pub fn get_or_compute(
        &mut self,
        table: &Table,
        cols: &[String],
        group_size: usize,
        workers: usize,
    ) -> Vec<u64> {
        let key = CacheKey { cols: cols.to_vec(), group_size };
        if let Some(hit) = self.entries.get(&key) {
            if hit.len() == table.n_rows() {
                return hit.clone();
            }
        }
        let computed = rowhash(table, cols, group_size, workers);
        self.entries.insert(key, computed.clone());
        computed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_kernel::table::{Cell, Column};

    fn table(n: usize) -> Table {
        Table::new(vec![Column {
            name: "id".into(),
            dtype: "int".into(),
            #[allow(clippy::cast_possible_wrap)]
            values: (0..n as i64).map(Cell::Int).collect(),
        }])
    }

    #[test]
    fn hit_returns_identical_series() {
        let t = table(10);
        let mut cache = RowHashCache::new();
        let cols = vec!["id".to_string()];
        let first = cache.get_or_compute(&t, &cols, 0, 1);
        let second = cache.get_or_compute(&t, &cols, 0, 1);
        assert_eq!(first, second);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn different_group_size_is_a_distinct_key() {
        let t = table(10);
        let mut cache = RowHashCache::new();
        let cols = vec!["id".to_string()];
        cache.get_or_compute(&t, &cols, 0, 1);
        cache.get_or_compute(&t, &cols, 1, 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn stale_length_hit_is_recomputed_not_returned() {
        let mut cache = RowHashCache::new();
        let cols = vec!["id".to_string()];
        let small = table(3);
        cache.get_or_compute(&small, &cols, 0, 1);
        let bigger = table(7);
        let recomputed = cache.get_or_compute(&bigger, &cols, 0, 1);
        assert_eq!(recomputed.len(), 7);
    }
}

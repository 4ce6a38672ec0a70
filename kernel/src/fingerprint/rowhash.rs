//! Row hashing (§4.3): `rowhash(table, cols) -> Vec<u64>`, one hash per row,
//! stable for equal cell content regardless of in-memory representation.
//!
//! Implementation freedom is explicit in the spec: "any fast
//! non-cryptographic 64-bit hash". This uses `xxh3_64`, combined by XOR
//! fold across column groups so that group partitioning never changes the
//! result for a fixed column set (XOR is commutative and associative).

use rayon::prelude::*;
use xxhash_rust::xxh3::xxh3_64;

use crate::table::Table;

/// Column-group parallelism settings, either caller-supplied or derived by
/// [`auto_parallel_settings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoParallel {
    pub group_size: usize,
    pub workers: usize,
}

/// If the caller has not specified group/worker counts and the number of
/// hashed columns is at least `threshold_cols` (default 40), set
/// `group_size = 8`, `workers = max(2, configured_workers default 4)`.
/// Otherwise the caller's settings (including "unset") pass through.
#[must_use]
pub fn auto_parallel_settings(
    cols_count: usize,
    configured_group_size: Option<usize>,
    configured_workers: Option<usize>,
    auto_parallel: bool,
    threshold_cols: usize,
) -> Option<AutoParallel> {
    if let (Some(group_size), Some(workers)) = (configured_group_size, configured_workers) {
        return Some(AutoParallel { group_size, workers });
    }
    if !auto_parallel {
        return configured_group_size.zip(configured_workers).map(|(g, w)| AutoParallel {
            group_size: g,
            workers: w,
        });
    }
    if cols_count >= threshold_cols {
        let workers = configured_workers.unwrap_or(4).max(2);
        return Some(AutoParallel {
            group_size: 8,
            workers,
        });
    }
    None
}

/// One 64-bit hash per row over the given column subset.
///
/// `group_size` of 0 (or >= `cols.len()`) hashes all columns in a single
/// group on the calling thread. A nonzero `group_size` smaller than
/// `cols.len()` partitions columns into groups and, when `workers > 1`,
/// hashes groups on a bounded rayon thread pool, XOR-folding the per-group
/// results.
#[must_use]
pub fn rowhash(table: &Table, cols: &[String], group_size: usize, workers: usize) -> Vec<u64> {
    let n_rows = table.n_rows();
    if cols.is_empty() || n_rows == 0 {
        return vec![0u64; n_rows];
    }

    let group_size = if group_size == 0 { cols.len() } else { group_size };
    let groups: Vec<&[String]> = cols.chunks(group_size).collect();

    let hash_group = |group: &[String]| -> Vec<u64> {
        let columns: Vec<_> = group.iter().filter_map(|name| table.column(name)).collect();
        (0..n_rows)
            .map(|row| {
                let mut buf = String::new();
                for col in &columns {
                    if let Some(cell) = col.values.get(row) {
                        buf.push_str(&cell.canonical_text());
                        buf.push('\u{1f}'); // unit separator, keeps cells from colliding across boundaries
                    }
                }
                xxh3_64(buf.as_bytes())
            })
            .collect()
    };

    let group_hashes: Vec<Vec<u64>> = if workers > 1 && groups.len() > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .unwrap_or_else(|_| rayon::ThreadPoolBuilder::new().build().expect("default pool"));
        pool.install(|| groups.par_iter().map(|g| hash_group(g)).collect())
    } else {
        groups.iter().map(|g| hash_group(g)).collect()
    };

    let mut combined = vec![0u64; n_rows];
    for group_result in group_hashes {
        for (acc, h) in combined.iter_mut().zip(group_result) {
            *acc ^= h;
        }
    }
    combined
}

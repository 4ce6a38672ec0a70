//! Content fingerprint (§3, §4.3): a cheap, non-cryptographic equality
//! signal over row content, used to gate expensive diffs — never a
//! security primitive.

use serde::{Deserialize, Serialize};

use super::rowhash::rowhash;
use crate::table::Table;

/// `{ label: "h64", sample: up to 10 row hashes, n: rows considered }`.
///
/// Order-insensitive mode samples the 10 smallest hashes ascending;
/// order-sensitive mode samples the first 10 in row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub label: String,
    pub sample: Vec<u64>,
    pub n: usize,
}

impl Default for ContentFingerprint {
    fn default() -> Self {
        Self {
            label: "h64".to_string(),
            sample: Vec::new(),
            n: 0,
        }
    }
}

/// Compute the content fingerprint of `table` over all of its columns,
/// optionally head-sampled to `sample_rows` (0 = full table) before
/// hashing.
#[must_use]
pub fn content_fingerprint(
    table: &Table,
    order_sensitive: bool,
    sample_rows: usize,
    hash_group_size: usize,
    workers: usize,
) -> ContentFingerprint {
    let considered = if sample_rows > 0 && table.n_rows() > sample_rows {
        table.head(sample_rows)
    } else {
        table.clone()
    };

    if considered.n_rows() == 0 {
        return ContentFingerprint {
            label: "h64".to_string(),
            sample: Vec::new(),
            n: 0,
        };
    }

    let cols = considered.column_names();
    let hashes = rowhash(&considered, &cols, hash_group_size, workers);

    let sample = if order_sensitive {
        hashes.iter().take(10).copied().collect()
    } else {
        let mut sorted = hashes.clone();
        sorted.sort_unstable();
        sorted.truncate(10);
        sorted
    };

    ContentFingerprint {
        label: "h64".to_string(),
        sample,
        n: considered.n_rows(),
    }
}

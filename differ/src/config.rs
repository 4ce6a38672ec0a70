//! Differ configuration (§4.7), with the literal defaults recorded in the
//! original Python `config.py` plus the `auto_parallel_*`/`auto_hash_group_size`
//! fields `recorder.py` actually reads from it (present in the `config.py`
//! dataclass is missing them; their defaults are sourced from `hashing.py`'s
//! `diff_rowhash` keyword defaults instead — see `DESIGN.md`).

use serde::{Deserialize, Serialize};

/// Whether the row differ runs at all for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMode {
    None,
    Rowhash,
}

/// How row-level detail is rendered in the diff payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiffDetailMode {
    Rows,
    Schema,
    KeysOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    pub mode: DiffMode,
    pub diff_mode: DiffDetailMode,
    pub primary_key: Option<Vec<String>>,
    pub order_sensitive: bool,
    /// 0 = all rows.
    pub sample_rows: usize,
    /// Master switch for fingerprint-skip and summary-only (§4.4).
    pub adaptive: bool,
    pub skip_if_fingerprint_match: bool,
    /// `(added+removed)/total >= threshold` triggers summary-only. 0 disables.
    pub summary_only_threshold: f64,
    /// 0 disables chunked building.
    pub chunk_rows: usize,
    pub hash_group_size: usize,
    pub parallel_groups: usize,
    pub auto_parallel_wide: bool,
    pub auto_parallel_threshold_cols: usize,
    pub auto_parallel_workers: usize,
    pub auto_hash_group_size: usize,
    pub cache_rowhash: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            mode: DiffMode::Rowhash,
            diff_mode: DiffDetailMode::Rows,
            primary_key: None,
            order_sensitive: false,
            sample_rows: 0,
            adaptive: true,
            skip_if_fingerprint_match: true,
            summary_only_threshold: 0.2,
            chunk_rows: 0,
            hash_group_size: 0,
            parallel_groups: 0,
            auto_parallel_wide: false,
            auto_parallel_threshold_cols: 40,
            auto_parallel_workers: 4,
            auto_hash_group_size: 8,
            cache_rowhash: true,
        }
    }
}

impl DiffConfig {
    #[must_use]
    pub fn with_primary_key(mut self, cols: Vec<String>) -> Self {
        self.primary_key = Some(cols);
        self
    }

    #[must_use]
    pub fn with_diff_mode(mut self, mode: DiffDetailMode) -> Self {
        self.diff_mode = mode;
        self
    }

    #[must_use]
    pub fn with_summary_only_threshold(mut self, threshold: f64) -> Self {
        self.summary_only_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows;
        self
    }

    /// Parse a `DiffConfig` from TOML text (§10 configuration layer).
    ///
    /// # Errors
    /// Returns a TOML deserialization error.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_literal_values() {
        let c = DiffConfig::default();
        assert!(matches!(c.mode, DiffMode::Rowhash));
        assert!(matches!(c.diff_mode, DiffDetailMode::Rows));
        assert_eq!(c.primary_key, None);
        assert!(!c.order_sensitive);
        assert_eq!(c.sample_rows, 0);
        assert!(c.adaptive);
        assert!(c.skip_if_fingerprint_match);
        assert!((c.summary_only_threshold - 0.2).abs() < f64::EPSILON);
        assert_eq!(c.chunk_rows, 0);
        assert!(!c.auto_parallel_wide);
        assert_eq!(c.auto_parallel_threshold_cols, 40);
        assert_eq!(c.auto_parallel_workers, 4);
        assert_eq!(c.auto_hash_group_size, 8);
        assert!(c.cache_rowhash);
    }

    #[test]
    fn builder_methods_override_defaults() {
        let c = DiffConfig::default()
            .with_primary_key(vec!["id".to_string()])
            .with_diff_mode(DiffDetailMode::KeysOnly)
            .with_summary_only_threshold(0.5)
            .with_chunk_rows(100);
        assert_eq!(c.primary_key, Some(vec!["id".to_string()]));
        assert!(matches!(c.diff_mode, DiffDetailMode::KeysOnly));
        assert!((c.summary_only_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(c.chunk_rows, 100);
    }

    #[test]
    fn round_trips_through_toml() {
        let c = DiffConfig::default();
        let text = toml::to_string(&c).unwrap();
        let back = DiffConfig::from_toml(&text).unwrap();
        assert_eq!(back.sample_rows, c.sample_rows);
        assert_eq!(back.auto_hash_group_size, c.auto_hash_group_size);
    }
}

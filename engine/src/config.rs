//! Recorder-level configuration: [`SnapshotConfig`], [`SealConfig`],
//! [`RecorderConfig`] (§4.7's option table). `DiffConfig` itself lives in
//! `recorder_differ` and is reused here unmodified.
//!
//! Every struct derives `Default` with the literal defaults recorded in the
//! original Python `config.py`, and `serde::{Serialize, Deserialize}` so it
//! can round-trip through TOML (matching `recorder_differ::config`'s
//! `from_toml` convention) or be built programmatically via `with_*`
//! method chaining.

use serde::{Deserialize, Serialize};

use recorder_differ::config::DiffConfig;
use recorder_store::Compression;

/// Snapshot policy mode (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotMode {
    None,
    Auto,
    Always,
}

/// Per-artifact snapshot policy (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    pub mode: SnapshotMode,
    pub max_mb: f64,
    pub sample_on_skip: bool,
    pub sample_rows: usize,
    /// 0 = all columns.
    pub sample_cols: usize,
    /// Conservatism factor applied to the deep in-memory footprint
    /// estimate before it is compared to `max_mb` (§4.5).
    pub size_estimate_multiplier: f64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            mode: SnapshotMode::Auto,
            max_mb: 50.0,
            sample_on_skip: true,
            sample_rows: 2000,
            sample_cols: 0,
            size_estimate_multiplier: 1.2,
        }
    }
}

impl SnapshotConfig {
    #[must_use]
    pub fn with_mode(mut self, mode: SnapshotMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_max_mb(mut self, max_mb: f64) -> Self {
        self.max_mb = max_mb;
        self
    }

    #[must_use]
    pub fn with_sample_on_skip(mut self, sample_on_skip: bool) -> Self {
        self.sample_on_skip = sample_on_skip;
        self
    }
}

/// Seal (hash-chain) mode (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SealMode {
    None,
    Chain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealConfig {
    pub mode: SealMode,
    pub algo: String,
}

impl Default for SealConfig {
    fn default() -> Self {
        Self { mode: SealMode::Chain, algo: "sha256".to_string() }
    }
}

/// Top-level `Recorder` configuration: defaults for diff, snapshot, and
/// seal behavior plus the options that are orthogonal to all three
/// (§4.7's "Recorder" scope rows).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    pub diff: DiffConfig,
    pub snapshot: SnapshotConfig,
    pub seal: SealConfig,
    /// A step without `capture_output` on success fails with `OutputMissing`.
    pub enforce_explicit_output: bool,
    pub parquet_compression: Compression,
    pub snapshot_async: bool,
    pub snapshot_async_workers: usize,
    /// Fails policy when the run's total on-disk size exceeds this (local
    /// store only). `None` disables the check.
    pub max_run_mb: Option<f64>,
    /// Auto-verify runs tagged `env=prod`/`production` at `finish()`.
    pub require_verify_for_prod: bool,
    /// Used by external cleanup collaborators; the recorder itself does
    /// not act on this value, it only carries it into `run.json.metadata`.
    pub retention_days: Option<u32>,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            diff: DiffConfig::default(),
            snapshot: SnapshotConfig::default(),
            seal: SealConfig::default(),
            enforce_explicit_output: false,
            parquet_compression: Compression::Zstd,
            snapshot_async: false,
            snapshot_async_workers: 2,
            max_run_mb: None,
            require_verify_for_prod: false,
            retention_days: None,
        }
    }
}

impl RecorderConfig {
    #[must_use]
    pub fn with_diff(mut self, diff: DiffConfig) -> Self {
        self.diff = diff;
        self
    }

    #[must_use]
    pub fn with_snapshot(mut self, snapshot: SnapshotConfig) -> Self {
        self.snapshot = snapshot;
        self
    }

    #[must_use]
    pub fn with_seal(mut self, seal: SealConfig) -> Self {
        self.seal = seal;
        self
    }

    #[must_use]
    pub fn with_enforce_explicit_output(mut self, enforce: bool) -> Self {
        self.enforce_explicit_output = enforce;
        self
    }

    #[must_use]
    pub fn with_max_run_mb(mut self, max_run_mb: f64) -> Self {
        self.max_run_mb = Some(max_run_mb);
        self
    }

    #[must_use]
    pub fn with_require_verify_for_prod(mut self, require: bool) -> Self {
        self.require_verify_for_prod = require;
        self
    }

    #[must_use]
    pub fn with_snapshot_async(mut self, enabled: bool, workers: usize) -> Self {
        self.snapshot_async = enabled;
        self.snapshot_async_workers = workers.max(1);
        self
    }

    /// Parse a `RecorderConfig` from TOML text.
    ///
    /// # Errors
    /// Returns a TOML deserialization error.
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

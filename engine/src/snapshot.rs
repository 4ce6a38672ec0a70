//! Snapshot policy engine (C5, §4.5): size-estimating snapshot writer with
//! auto/always/none modes and sample-on-skip fallback.
//!
//! Async scheduling lives in [`crate::run::Run`] (the bounded worker pool is
//! a run-scoped resource); this module is the pure decide-and-write core
//! that both the synchronous and asynchronous paths call.

use serde::{Deserialize, Serialize};

use recorder_kernel::fingerprint::{content_fingerprint, ContentFingerprint, SchemaFingerprint};
use recorder_kernel::table::Table;
use recorder_store::{Compression, EvidenceStore, StoreError};

use crate::config::{SnapshotConfig, SnapshotMode};

/// Knobs the content fingerprint is computed with (mirrors the diff
/// config's `order_sensitive`/`sample_rows`/auto-parallel settings, §4.7's
/// `_df_fingerprints` in the original: the same fingerprint feeds both the
/// snapshot outcome and the step commit's fingerprint-skip gate, §4.4).
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintParams {
    pub order_sensitive: bool,
    pub sample_rows: usize,
    pub hash_group_size: usize,
    pub workers: usize,
}

/// Why a full artifact was not materialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotSkipped {
    pub reason: String,
}

/// The `input`/`output` field of a step evidence record (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotOutcome {
    pub schema_fp: SchemaFingerprint,
    pub content_fp: ContentFingerprint,
    pub n_rows: usize,
    pub n_cols: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_size_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_est_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_skipped: Option<SnapshotSkipped>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_artifact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_size_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_error: Option<String>,
    /// Non-fatal write failure for the full artifact (§7 `SnapshotFailed`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_error: Option<String>,
    /// `true` while an async write for this artifact has been submitted
    /// but not yet drained (§4.5 "async mode").
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub snapshot_pending: bool,
    /// `true` while an async sample write has been submitted but not yet
    /// drained.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub sample_pending: bool,
}

/// Always-available fingerprints and shape, independent of snapshot mode.
fn base_outcome(table: &Table, fp_params: &FingerprintParams) -> SnapshotOutcome {
    let schema_fp = SchemaFingerprint::of(table);
    let content_fp = content_fingerprint(
        table,
        fp_params.order_sensitive,
        fp_params.sample_rows,
        fp_params.hash_group_size,
        fp_params.workers,
    );
    SnapshotOutcome {
        schema_fp,
        content_fp,
        n_rows: table.n_rows(),
        n_cols: table.n_cols(),
        artifact: None,
        snapshot_size_mb: None,
        snapshot_est_mb: None,
        snapshot_skipped: None,
        sample_artifact: None,
        sample_size_mb: None,
        sample_rows: None,
        sample_error: None,
        snapshot_error: None,
        snapshot_pending: false,
        sample_pending: false,
    }
}

fn estimate_mb(table: &Table, multiplier: f64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let raw = table.estimate_bytes() as f64 / (1024.0 * 1024.0);
    raw * multiplier
}

fn write_sample<S: EvidenceStore + ?Sized>(
    store: &S,
    key: &str,
    table: &Table,
    compression: Compression,
    config: &SnapshotConfig,
    outcome: &mut SnapshotOutcome,
) {
    if !config.sample_on_skip {
        return;
    }
    let sample_key = sample_key(key);
    let sampled = sample_table(table, config);
    match store.put_columnar(&sample_key, &sampled, compression) {
        Ok(size_mb) => {
            outcome.sample_artifact = Some(sample_key);
            outcome.sample_size_mb = Some(size_mb);
            outcome.sample_rows = Some(sampled.n_rows());
        }
        Err(e) => outcome.sample_error = Some(e.to_string()),
    }
}

fn sample_table(table: &Table, config: &SnapshotConfig) -> Table {
    let rows = table.head(config.sample_rows);
    if config.sample_cols == 0 {
        rows
    } else {
        rows.head_cols(config.sample_cols)
    }
}

fn sample_key(key: &str) -> String {
    match key.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem}.sample.{ext}"),
        None => format!("{key}.sample"),
    }
}

/// Decide a snapshot policy for `table` and, where the policy calls for it,
/// write the artifact(s) synchronously to `store` at `key`. Always returns
/// fingerprints and shape regardless of outcome (§4.5).
pub fn decide_and_write<S: EvidenceStore + ?Sized>(
    store: &S,
    key: &str,
    table: &Table,
    compression: Compression,
    config: &SnapshotConfig,
    fp_params: &FingerprintParams,
) -> SnapshotOutcome {
    let mut outcome = base_outcome(table, fp_params);

    match config.mode {
        SnapshotMode::None => outcome,
        SnapshotMode::Always => {
            write_full(store, key, table, compression, &mut outcome);
            // §9 open question (b): the realized size is checked against
            // max_mb only under `auto`; `always` never retroactively skips.
            outcome
        }
        SnapshotMode::Auto => {
            let est_mb = estimate_mb(table, config.size_estimate_multiplier);
            outcome.snapshot_est_mb = Some(est_mb);
            if config.max_mb > 0.0 && est_mb > config.max_mb {
                outcome.snapshot_skipped = Some(SnapshotSkipped { reason: "size_estimate".to_string() });
                write_sample(store, key, table, compression, config, &mut outcome);
                return outcome;
            }
            if config.max_mb <= 0.0 {
                outcome.snapshot_skipped = Some(SnapshotSkipped { reason: "size_estimate".to_string() });
                write_sample(store, key, table, compression, config, &mut outcome);
                return outcome;
            }
            write_full(store, key, table, compression, &mut outcome);
            if let Some(size_mb) = outcome.snapshot_size_mb {
                if size_mb > config.max_mb {
                    // §9 open question (b): keep the artifact bytes but
                    // report it as skipped so verification still succeeds
                    // against whatever bytes are at `payload_ref`; callers
                    // that want disk space back may delete `artifact`
                    // themselves (both are acceptable per the open question).
                    outcome.artifact = None;
                    outcome.snapshot_skipped = Some(SnapshotSkipped { reason: "size".to_string() });
                    write_sample(store, key, table, compression, config, &mut outcome);
                }
            }
            outcome
        }
    }
}

fn write_full<S: EvidenceStore + ?Sized>(
    store: &S,
    key: &str,
    table: &Table,
    compression: Compression,
    outcome: &mut SnapshotOutcome,
) {
    match store.put_columnar(key, table, compression) {
        Ok(size_mb) => {
            outcome.artifact = Some(key.to_string());
            outcome.snapshot_size_mb = Some(size_mb);
        }
        Err(e) => outcome.snapshot_error = Some(e.to_string()),
    }
}

/// Which slot a deferred write fills in the evidence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSlot {
    Full,
    Sample,
}

/// One artifact write still to be performed, handed to
/// [`crate::run::Run`]'s worker pool by the async path.
#[derive(Debug, Clone)]
pub struct PendingArtifact {
    pub key: String,
    pub table: Table,
    pub slot: ArtifactSlot,
}

/// Decide a snapshot policy without performing any I/O, for callers that
/// want to submit the actual write(s) to a worker pool rather than block
/// the caller (§4.5 "async mode"). Mirrors [`decide_and_write`] except:
///
/// - the returned [`SnapshotOutcome`] has its `*_pending` flag(s) set
///   instead of size/artifact fields, which the caller fills in once each
///   [`PendingArtifact`] finishes (see [`apply_pending_result`]);
/// - `auto` mode's retroactive over-budget recheck does not apply here,
///   since it depends on the realized size, which isn't known until the
///   write completes — matching the reference implementation, whose
///   equivalent check is guarded on the write already having finished and
///   is therefore unreachable for a still-pending future.
#[must_use]
pub fn decide_pending(
    table: &Table,
    key: &str,
    config: &SnapshotConfig,
    fp_params: &FingerprintParams,
) -> (SnapshotOutcome, Vec<PendingArtifact>) {
    let mut outcome = base_outcome(table, fp_params);
    let mut pending = Vec::new();

    match config.mode {
        SnapshotMode::None => {}
        SnapshotMode::Always => {
            outcome.snapshot_pending = true;
            pending.push(PendingArtifact { key: key.to_string(), table: table.clone(), slot: ArtifactSlot::Full });
        }
        SnapshotMode::Auto => {
            let est_mb = estimate_mb(table, config.size_estimate_multiplier);
            outcome.snapshot_est_mb = Some(est_mb);
            let over_budget = config.max_mb <= 0.0 || est_mb > config.max_mb;
            if over_budget {
                outcome.snapshot_skipped = Some(SnapshotSkipped { reason: "size_estimate".to_string() });
                if config.sample_on_skip {
                    let sampled = sample_table(table, config);
                    outcome.sample_rows = Some(sampled.n_rows());
                    outcome.sample_pending = true;
                    pending.push(PendingArtifact { key: sample_key(key), table: sampled, slot: ArtifactSlot::Sample });
                }
            } else {
                outcome.snapshot_pending = true;
                pending.push(PendingArtifact { key: key.to_string(), table: table.clone(), slot: ArtifactSlot::Full });
            }
        }
    }

    (outcome, pending)
}

/// Patch a pending artifact's result onto its outcome, clearing the
/// matching `*_pending` flag. Called once per [`PendingArtifact`] as the
/// run drains its snapshot pool.
pub fn apply_pending_result(outcome: &mut SnapshotOutcome, artifact: &PendingArtifact, result: Result<f64, StoreError>) {
    match artifact.slot {
        ArtifactSlot::Full => {
            outcome.snapshot_pending = false;
            match result {
                Ok(size_mb) => {
                    outcome.artifact = Some(artifact.key.clone());
                    outcome.snapshot_size_mb = Some(size_mb);
                }
                Err(e) => outcome.snapshot_error = Some(e.to_string()),
            }
        }
        ArtifactSlot::Sample => {
            outcome.sample_pending = false;
            match result {
                Ok(size_mb) => {
                    outcome.sample_artifact = Some(artifact.key.clone());
                    outcome.sample_size_mb = Some(size_mb);
                }
                Err(e) => outcome.sample_error = Some(e.to_string()),
            }
        }
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
    fn mode_none_writes_nothing_but_fingerprints() {
        let dir = tempfile::tempdir().unwrap();
        let store = recorder_store::LocalStore::new(dir.path());
        let config = SnapshotConfig::default().with_mode(SnapshotMode::None);
        let outcome = decide_and_write(&store, "artifacts/input.bbdata", &table(10), Compression::Zstd, &config, &FingerprintParams::default());
        assert!(outcome.artifact.is_none());
        assert_eq!(outcome.n_rows, 10);
        assert!(!store.exists("artifacts/input.bbdata").unwrap());
    }

    #[test]
    fn mode_always_writes_full_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = recorder_store::LocalStore::new(dir.path());
        let config = SnapshotConfig::default().with_mode(SnapshotMode::Always);
        let outcome = decide_and_write(&store, "artifacts/input.bbdata", &table(10), Compression::Zstd, &config, &FingerprintParams::default());
        assert_eq!(outcome.artifact.as_deref(), Some("artifacts/input.bbdata"));
        assert!(outcome.snapshot_size_mb.unwrap() > 0.0);
        assert!(store.exists("artifacts/input.bbdata").unwrap());
    }

    #[test]
    fn auto_mode_with_zero_max_mb_skips_every_artifact_and_samples() {
        let dir = tempfile::tempdir().unwrap();
        let store = recorder_store::LocalStore::new(dir.path());
        let config = SnapshotConfig::default()
            .with_mode(SnapshotMode::Auto)
            .with_max_mb(0.0)
            .with_sample_on_skip(true);
        let outcome = decide_and_write(&store, "artifacts/input.bbdata", &table(10), Compression::Zstd, &config, &FingerprintParams::default());
        assert!(outcome.artifact.is_none());
        assert!(outcome.snapshot_skipped.is_some());
        assert!(outcome.sample_artifact.is_some());
        assert_eq!(outcome.sample_rows, Some(10.min(config.sample_rows)));
    }

    #[test]
    fn auto_mode_under_threshold_writes_full_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = recorder_store::LocalStore::new(dir.path());
        let config = SnapshotConfig::default().with_mode(SnapshotMode::Auto).with_max_mb(50.0);
        let outcome = decide_and_write(&store, "artifacts/input.bbdata", &table(10), Compression::Zstd, &config, &FingerprintParams::default());
        assert!(outcome.artifact.is_some());
        assert!(outcome.snapshot_skipped.is_none());
    }

    #[test]
    fn sample_key_inserts_sample_infix_before_extension() {
        assert_eq!(sample_key("artifacts/input.bbdata"), "artifacts/input.sample.bbdata");
    }

    #[test]
    fn fingerprints_always_populated_even_when_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = recorder_store::LocalStore::new(dir.path());
        let config = SnapshotConfig::default().with_mode(SnapshotMode::None);
        let outcome = decide_and_write(&store, "artifacts/output.bbdata", &table(5), Compression::Zstd, &config, &FingerprintParams::default());
        assert_eq!(outcome.content_fp.n, 5);
        assert_eq!(outcome.schema_fp.cols, vec!["id".to_string()]);
    }

    #[test]
    fn decide_pending_always_mode_returns_one_full_artifact() {
        let config = SnapshotConfig::default().with_mode(SnapshotMode::Always);
        let (outcome, pending) = decide_pending(&table(10), "artifacts/input.bbdata", &config, &FingerprintParams::default());
        assert!(outcome.snapshot_pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].slot, ArtifactSlot::Full);
        assert_eq!(pending[0].key, "artifacts/input.bbdata");
    }

    #[test]
    fn decide_pending_auto_over_budget_plans_a_sample_not_a_full_write() {
        let config = SnapshotConfig::default().with_mode(SnapshotMode::Auto).with_max_mb(0.0).with_sample_on_skip(true);
        let (outcome, pending) = decide_pending(&table(10), "artifacts/input.bbdata", &config, &FingerprintParams::default());
        assert!(!outcome.snapshot_pending);
        assert!(outcome.sample_pending);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].slot, ArtifactSlot::Sample);
        assert_eq!(pending[0].key, "artifacts/input.sample.bbdata");
    }

    #[test]
    fn decide_pending_none_mode_plans_nothing() {
        let config = SnapshotConfig::default().with_mode(SnapshotMode::None);
        let (outcome, pending) = decide_pending(&table(10), "artifacts/input.bbdata", &config, &FingerprintParams::default());
        assert!(!outcome.snapshot_pending && !outcome.sample_pending);
        assert!(pending.is_empty());
    }

    #[test]
    fn apply_pending_result_fills_in_full_artifact_and_clears_flag() {
        let config = SnapshotConfig::default().with_mode(SnapshotMode::Always);
        let (mut outcome, pending) = decide_pending(&table(10), "artifacts/input.bbdata", &config, &FingerprintParams::default());
        apply_pending_result(&mut outcome, &pending[0], Ok(1.5));
        assert!(!outcome.snapshot_pending);
        assert_eq!(outcome.artifact.as_deref(), Some("artifacts/input.bbdata"));
        assert_eq!(outcome.snapshot_size_mb, Some(1.5));
    }

    #[test]
    fn apply_pending_result_records_write_failure_without_panicking() {
        let config = SnapshotConfig::default().with_mode(SnapshotMode::Always);
        let (mut outcome, pending) = decide_pending(&table(10), "artifacts/input.bbdata", &config, &FingerprintParams::default());
        apply_pending_result(&mut outcome, &pending[0], Err(StoreError::Io { detail: "disk full".to_string() }));
        assert!(!outcome.snapshot_pending);
        assert!(outcome.artifact.is_none());
        assert!(outcome.snapshot_error.unwrap().contains("disk full"));
    }
}

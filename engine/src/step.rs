//! Scoped step acquisition (§4.7 "Step scope"): allocates a dense ordinal
//! on open, computes fingerprints/snapshots/diff/evidence on `commit()` or
//! `fail()`, and always participates in the chain when sealing is enabled —
//! even for an errored step (§7 "errors occurring inside a step scope are
//! captured as structured error evidence AND re-raised").

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use recorder_differ::cache::RowHashCache;
use recorder_differ::config::{DiffConfig, DiffDetailMode, DiffMode};
use recorder_differ::rowdiff::{diff_rowhash, DiffOptions, DiffSummary};
use recorder_kernel::fingerprint::{auto_parallel_settings, schema_diff, SchemaDiff};
use recorder_kernel::table::Table;
use recorder_kernel::time::{safe_path_component, utc_now_iso};
use recorder_store::EvidenceStore;

use crate::callsite::CodeHint;
use crate::error::RecorderError;
use crate::run::{ArtifactField, Run, StepRef};
use crate::snapshot::{decide_and_write, decide_pending, FingerprintParams, SnapshotOutcome};

/// `step.json.error` (§3 "Step evidence", §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

/// Maximum bytes kept of a captured traceback (§7).
pub const MAX_TRACEBACK_BYTES: usize = 20_000;

fn truncate_traceback(traceback: Option<String>) -> Option<String> {
    traceback.map(|mut t| {
        if t.len() > MAX_TRACEBACK_BYTES {
            t.truncate(MAX_TRACEBACK_BYTES);
        }
        t
    })
}

/// `step.json.diff` (§3 "Step evidence", §4.4). A flat shape covers both the
/// "skipped" (fingerprint-match / schema-only) and "computed" cases; exactly
/// one of `status`/`artifact` is ever set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDiffRecord {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub summary: DiffSummary,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub summary_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_hint: Option<String>,
}

/// The `steps/{ordinal}_{name}/step.json` payload shape (§3 "Step evidence").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvidence {
    pub version: String,
    pub ordinal: u64,
    pub name: String,
    pub started_at: String,
    pub finished_at: String,
    pub status: String,
    pub metadata: Map<String, Value>,
    pub code: CodeHint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<SnapshotOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<SnapshotOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_diff: Option<SchemaDiff>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<StepDiffRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Always `null`; reserved by §3's step evidence shape, never populated
    /// (per-step integrity is the chain entry's job, not an embedded field).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seal: Option<Value>,
}

/// A scoped step acquisition. Holds the input/captured-output tables and
/// metadata until `commit()` or `fail()` consumes it and writes evidence.
pub struct StepHandle<'a, S: EvidenceStore> {
    run: &'a mut Run<S>,
    ordinal: u64,
    name: String,
    started_at: String,
    code: CodeHint,
    input: Option<Table>,
    output: Option<Table>,
    metadata: Map<String, Value>,
}

impl<'a, S: EvidenceStore + Send + Sync + 'static> StepHandle<'a, S> {
    pub(crate) fn new(run: &'a mut Run<S>, ordinal: u64, name: String, started_at: String, code: CodeHint, input: Option<Table>) -> Self {
        Self { run, ordinal, name, started_at, code, input, output: None, metadata: Map::new() }
    }

    /// Record this step's output table (§4.7 "capture_output").
    pub fn capture_output(&mut self, table: Table) -> &mut Self {
        self.output = Some(table);
        self
    }

    /// Attach a free-form metadata entry to the eventual step evidence.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Close the step successfully: computes fingerprints, snapshots, schema
    /// diff, and row diff for whatever input/output are present, writes
    /// `step.json`, and chains it (§4.7 "On successful close").
    ///
    /// # Errors
    /// Returns [`RecorderError::OutputMissing`] if `enforce_explicit_output`
    /// is set and no output was captured — in that case, matching the
    /// reference implementation, no evidence is written for this ordinal at
    /// all (the caller's bug, not a recordable event). Otherwise returns
    /// [`RecorderError`] on a store failure while writing evidence.
    pub fn commit(self) -> Result<(), RecorderError> {
        if self.run.config().enforce_explicit_output && self.output.is_none() {
            tracing::warn!(name = %self.name, "step closed without capture_output under enforce_explicit_output");
            return Err(RecorderError::OutputMissing { step: self.name });
        }
        self.finalize(None)
    }

    /// Close the step as failed: writes whatever input/output/diff evidence
    /// is available plus the given error, and chains it. Does not construct
    /// or return the caller's original error — callers `return Err(...)`
    /// themselves after this call (§7 "captured... AND re-raised").
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store failure while writing evidence.
    pub fn fail(self, kind: impl Into<String>, message: impl Into<String>) -> Result<(), RecorderError> {
        let error = ErrorInfo { kind: kind.into(), message: message.into(), traceback: None };
        self.finalize(Some(error))
    }

    /// Same as [`Self::fail`] but with an explicit (possibly truncated)
    /// traceback (§7 `truncated_traceback`).
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store failure while writing evidence.
    pub fn fail_with_traceback(self, kind: impl Into<String>, message: impl Into<String>, traceback: impl Into<String>) -> Result<(), RecorderError> {
        let error = ErrorInfo {
            kind: kind.into(),
            message: message.into(),
            traceback: truncate_traceback(Some(traceback.into())),
        };
        self.finalize(Some(error))
    }

    fn finalize(self, error: Option<ErrorInfo>) -> Result<(), RecorderError> {
        let StepHandle { run, ordinal, name, started_at, code, input, output, metadata } = self;
        let finished_at = utc_now_iso();
        let status = if error.is_some() { "error" } else { "ok" };

        let schema_diff_val = match (&input, &output) {
            (Some(a), Some(b)) => Some(schema_diff(a, b)),
            _ => None,
        };

        let safe_name = safe_path_component(&name, 64);
        let step_dir = format!("steps/{ordinal:04}_{safe_name}");
        let artifacts_dir = format!("{step_dir}/artifacts");
        let compression = run.config().parquet_compression;
        let async_mode = run.config().snapshot_async;

        let step_json_key = format!("{}/{step_dir}/step.json", run.prefix());

        let input_outcome = match &input {
            Some(table) => {
                let fp_params = fingerprint_params(table, &run.config().diff);
                let key = format!("{}/{artifacts_dir}/input.bbdata", run.prefix());
                Some(if async_mode {
                    let (outcome, pending) = decide_pending(table, &key, &run.config().snapshot, &fp_params);
                    run.submit_pending(step_json_key.clone(), ArtifactField::Input, pending, compression);
                    outcome
                } else {
                    decide_and_write(run.store.as_ref(), &key, table, compression, &run.config().snapshot, &fp_params)
                })
            }
            None => None,
        };

        let output_outcome = match &output {
            Some(table) => {
                let fp_params = fingerprint_params(table, &run.config().diff);
                let key = format!("{}/{artifacts_dir}/output.bbdata", run.prefix());
                Some(if async_mode {
                    let (outcome, pending) = decide_pending(table, &key, &run.config().snapshot, &fp_params);
                    run.submit_pending(step_json_key.clone(), ArtifactField::Output, pending, compression);
                    outcome
                } else {
                    decide_and_write(run.store.as_ref(), &key, table, compression, &run.config().snapshot, &fp_params)
                })
            }
            None => None,
        };

        let diff_record = if let (Some(a), Some(b), Some(in_fp), Some(out_fp)) = (&input, &output, &input_outcome, &output_outcome) {
            let prefix = run.prefix().to_string();
            compute_diff_record(run.store.as_ref(), &run.config().diff, a, b, in_fp, out_fp, &artifacts_dir, &prefix)?
        } else {
            None
        };

        let step_evidence = StepEvidence {
            version: "0.1".to_string(),
            ordinal,
            name: name.clone(),
            started_at,
            finished_at: finished_at.clone(),
            status: status.to_string(),
            metadata,
            code,
            input: input_outcome,
            output: output_outcome,
            schema_diff: schema_diff_val,
            diff: diff_record,
            error,
            seal: None,
        };

        let step_value = serde_json::to_value(&step_evidence)?;
        run.store.put_json(&step_json_key, &step_value)?;

        let payload_ref = format!("{step_dir}/step.json");
        if run.sealer.is_enabled() {
            if async_mode {
                run.defer_chain_entry(ordinal, finished_at, payload_ref.clone(), step_json_key);
            } else {
                run.sealer.append(run.store.as_ref(), "step", &finished_at, &payload_ref, &step_value)?;
            }
        }

        if status == "error" {
            tracing::warn!(ordinal, name = %name, "step finalized with error");
        } else {
            tracing::debug!(ordinal, name = %name, "step committed");
        }
        run.register_step(StepRef { ordinal, name, relative_path: payload_ref });

        Ok(())
    }
}

/// Mirror the diff crate's own auto-parallel derivation (§4.3's
/// `auto_parallel_settings`), applied over *all* of a table's columns since
/// the content fingerprint (unlike the row diff) hashes every column, not
/// just the non-PK shared ones.
fn fingerprint_params(table: &Table, diff_cfg: &DiffConfig) -> FingerprintParams {
    let settings = auto_parallel_settings(
        table.n_cols(),
        (diff_cfg.hash_group_size > 0).then_some(diff_cfg.hash_group_size),
        (diff_cfg.parallel_groups > 0).then_some(diff_cfg.parallel_groups),
        diff_cfg.auto_parallel_wide,
        diff_cfg.auto_parallel_threshold_cols,
    );
    let (group_size, workers) = match settings {
        Some(s) => (s.group_size, s.workers),
        None => (diff_cfg.hash_group_size, diff_cfg.parallel_groups.max(1)),
    };
    FingerprintParams { order_sensitive: diff_cfg.order_sensitive, sample_rows: diff_cfg.sample_rows, hash_group_size: group_size, workers }
}

#[allow(clippy::too_many_arguments)]
fn compute_diff_record<S: EvidenceStore + ?Sized>(
    store: &S,
    diff_cfg: &DiffConfig,
    a: &Table,
    b: &Table,
    input_outcome: &SnapshotOutcome,
    output_outcome: &SnapshotOutcome,
    artifacts_dir: &str,
    run_prefix: &str,
) -> Result<Option<StepDiffRecord>, RecorderError> {
    if matches!(diff_cfg.mode, DiffMode::None) {
        return Ok(None);
    }

    if matches!(diff_cfg.diff_mode, DiffDetailMode::Schema) {
        return Ok(Some(StepDiffRecord {
            mode: "schema".to_string(),
            status: Some("skipped".to_string()),
            reason: Some("schema_only".to_string()),
            artifact: None,
            summary: DiffSummary::default(),
            summary_only: false,
            ui_hint: Some("diff_schema_only".to_string()),
        }));
    }

    let schema_same = input_outcome.schema_fp == output_outcome.schema_fp;
    let content_same = input_outcome.content_fp == output_outcome.content_fp;
    if diff_cfg.adaptive && diff_cfg.skip_if_fingerprint_match && schema_same && content_same {
        return Ok(Some(StepDiffRecord {
            mode: "rowhash".to_string(),
            status: Some("skipped".to_string()),
            reason: Some("fingerprint_match".to_string()),
            artifact: None,
            summary: DiffSummary::default(),
            summary_only: false,
            ui_hint: Some("diff_skipped_fingerprint_match".to_string()),
        }));
    }

    let options = DiffOptions {
        total_keys_hint: Some(input_outcome.n_rows.max(output_outcome.n_rows)),
        treat_schema_add_remove_as_change: false,
    };
    let mut cache_a = diff_cfg.cache_rowhash.then(RowHashCache::new);
    let mut cache_b = diff_cfg.cache_rowhash.then(RowHashCache::new);
    let row_diff = diff_rowhash(a, b, diff_cfg, &options, cache_a.as_mut(), cache_b.as_mut())?;

    let diff_key = format!("{run_prefix}/{artifacts_dir}/diff.bbdelta");
    store.put_json(&diff_key, &serde_json::to_value(&row_diff)?)?;

    Ok(Some(StepDiffRecord {
        mode: row_diff.diff_mode,
        status: None,
        reason: None,
        artifact: Some(format!("{artifacts_dir}/diff.bbdelta")),
        summary: row_diff.summary,
        summary_only: row_diff.summary_only,
        ui_hint: row_diff.ui_hint,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RecorderConfig;
    use recorder_kernel::table::{Cell, Column};
    use recorder_store::LocalStore;
    use std::collections::BTreeMap;

    fn table(ids: &[i64], xs: &[f64]) -> Table {
        Table::new(vec![
            Column { name: "id".into(), dtype: "int".into(), values: ids.iter().copied().map(Cell::Int).collect() },
            Column { name: "x".into(), dtype: "float".into(), values: xs.iter().copied().map(Cell::Float).collect() },
        ])
    }

    fn recorder_with(config: RecorderConfig) -> (tempfile::TempDir, crate::recorder::Recorder<LocalStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        (dir, crate::recorder::Recorder::new(store, "proj", "ds").with_config(config))
    }

    #[test]
    fn commit_without_output_fails_under_enforce_explicit_output() {
        let (_dir, recorder) = recorder_with(RecorderConfig::default().with_enforce_explicit_output(true));
        let mut run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        let a = table(&[1], &[1.0]);
        let step = run.step("no_output", Some(a));
        let err = step.commit().unwrap_err();
        assert!(matches!(err, RecorderError::OutputMissing { .. }));
        // No step evidence was written for this ordinal.
        assert!(!run.store.exists(&format!("{}/steps/0001_no_output/step.json", run.prefix())).unwrap());
    }

    #[test]
    fn fail_records_error_info_and_still_chains() {
        let (_dir, recorder) = recorder_with(RecorderConfig::default());
        let mut run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        let a = table(&[1, 2], &[1.0, 2.0]);
        let step = run.step("broken", Some(a));
        step.fail("ValueError", "division by zero").unwrap();
        run.finish().unwrap();
        let (ok, msg) = run.verify();
        assert!(ok, "{msg}");

        let key = format!("{}/steps/0001_broken/step.json", run.prefix());
        let value = run.store.get_json(&key).unwrap();
        let evidence: StepEvidence = serde_json::from_value(value).unwrap();
        assert_eq!(evidence.status, "error");
        assert_eq!(evidence.error.unwrap().message, "division by zero");
    }

    #[test]
    fn fingerprint_match_skips_row_diff() {
        let (_dir, recorder) = recorder_with(RecorderConfig::default());
        let mut run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        let a = table(&[1, 2, 3], &[1.0, 2.0, 3.0]);
        let b = table(&[1, 2, 3], &[1.0, 2.0, 3.0]);
        let mut step = run.step("noop", Some(a));
        step.capture_output(b);
        step.commit().unwrap();

        let key = format!("{}/steps/0001_noop/step.json", run.prefix());
        let value = run.store.get_json(&key).unwrap();
        let evidence: StepEvidence = serde_json::from_value(value).unwrap();
        let diff = evidence.diff.unwrap();
        assert_eq!(diff.reason.as_deref(), Some("fingerprint_match"));
        assert!(diff.artifact.is_none());
    }
}

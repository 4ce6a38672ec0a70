//! A single chained, append-only run: `start()` writes the immutable
//! `run_start.json` and initializes the chain; `step()` opens a scoped
//! step acquisition (§4.7); `finish()` drains pending async snapshot
//! writes, patches their step evidence, and chains `run_finish`;
//! `verify()` walks the chain.

use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use recorder_kernel::proof::chain::VerifyResult;
use recorder_kernel::time::{new_run_id, safe_path_component, utc_now_iso};
use recorder_store::{EvidenceStore, StoreError};

use crate::config::{RecorderConfig, SealMode};
use crate::error::RecorderError;
use crate::events::EventLog;
use crate::host::{get_host_info, get_runtime_info, HostInfo, RuntimeInfo};
use crate::policy::{check_max_run_mb, is_prod_env, record_prod_verify, RunPolicy};
use crate::seal::Sealer;
use crate::snapshot::PendingArtifact;
use crate::step::StepEvidence;

/// One entry of `run.json.steps[]` (§3 "Run evidence").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRef {
    pub ordinal: u64,
    pub name: String,
    pub relative_path: String,
}

/// `run.json.seal` / `run_start.json.seal` / `run_finish.json.seal` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SealInfo {
    pub mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
}

/// The `run.json` / `run_start.json` / `run_finish.json` payload shape
/// (§3 "Run evidence"). The same struct backs all three files; they
/// differ only in which snapshot of it was written and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvidence {
    pub version: String,
    pub run_id: String,
    pub project: String,
    pub dataset: String,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub status: String,
    pub tags: BTreeMap<String, String>,
    pub metadata: Map<String, Value>,
    pub host: HostInfo,
    pub runtime: RuntimeInfo,
    pub steps: Vec<StepRef>,
    pub seal: SealInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<RunPolicy>,
}

/// Which step-evidence field a [`PendingWrite`] patches on completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArtifactField {
    Input,
    Output,
}

/// One still-running async snapshot write, submitted during a step commit
/// and drained at `finish()` (§4.5 "async mode", §5 item 2).
pub(crate) struct PendingWrite {
    pub(crate) step_json_key: String,
    pub(crate) field: ArtifactField,
    pub(crate) artifact: PendingArtifact,
    pub(crate) rx: Receiver<Result<f64, StoreError>>,
}

/// A step whose chain entry is deferred until `finish()` because it has
/// async snapshot writes still pending at commit time (see the module doc
/// of [`crate::run`] and `DESIGN.md` for why this deviates from the
/// reference implementation's immediate-chain-then-patch order, which
/// would otherwise let `finish()`'s evidence patch invalidate an
/// already-chained step's payload digest).
pub(crate) struct DeferredChainStep {
    pub(crate) ordinal: u64,
    pub(crate) ts: String,
    pub(crate) payload_ref: String,
    pub(crate) step_json_key: String,
}

/// A chained, single-owner execution against one project/dataset (§4.7).
pub struct Run<S: EvidenceStore> {
    pub(crate) store: Arc<S>,
    pub(crate) config: RecorderConfig,
    pub(crate) prefix: String,
    pub(crate) step_counter: u64,
    pub(crate) sealer: Sealer,
    pub(crate) events: EventLog,
    pub(crate) evidence: RunEvidence,
    pub(crate) pool: Option<rayon::ThreadPool>,
    pub(crate) pending: Vec<PendingWrite>,
    pub(crate) deferred_chain: Vec<DeferredChainStep>,
    finished: bool,
}

impl<S: EvidenceStore + Send + Sync + 'static> Run<S> {
    /// Create and initialize a run: writes `run.json`/`run_start.json`,
    /// initializes the chain when sealing is enabled, and appends the
    /// `run_start` entry (§4.7 "Run.start()").
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store write failure.
    pub(crate) fn start(
        store: Arc<S>,
        project: String,
        dataset: String,
        config: RecorderConfig,
        run_id: Option<String>,
        tags: BTreeMap<String, String>,
        metadata: Map<String, Value>,
    ) -> Result<Self, RecorderError> {
        let run_id = safe_path_component(&run_id.unwrap_or_else(new_run_id), 64);
        let prefix = format!(
            "{}/{}/{}",
            safe_path_component(&project, 64),
            safe_path_component(&dataset, 64),
            run_id
        );
        let created_at = utc_now_iso();

        let seal = SealInfo {
            mode: match config.seal.mode {
                SealMode::Chain => "chain".to_string(),
                SealMode::None => "none".to_string(),
            },
            chain_path: matches!(config.seal.mode, SealMode::Chain).then(|| "chain.json".to_string()),
            head: None,
        };

        let evidence = RunEvidence {
            version: "0.1".to_string(),
            run_id: run_id.clone(),
            project,
            dataset,
            created_at: created_at.clone(),
            finished_at: None,
            status: "running".to_string(),
            tags,
            metadata,
            host: get_host_info(),
            runtime: get_runtime_info(),
            steps: Vec::new(),
            seal,
            policy: None,
        };

        store.put_json(&format!("{prefix}/run.json"), &serde_json::to_value(&evidence)?)?;
        let run_start_value = serde_json::to_value(&evidence)?;
        store.put_json(&format!("{prefix}/run_start.json"), &run_start_value)?;

        let mut sealer = Sealer::new(config.seal.mode, &run_id, format!("{prefix}/chain.json"));
        sealer.persist(store.as_ref())?;
        sealer.append(store.as_ref(), "run_start", &created_at, "run_start.json", &run_start_value)?;

        tracing::info!(run_id = %run_id, prefix = %prefix, "run started");

        Ok(Self {
            store,
            config,
            prefix,
            step_counter: 0,
            sealer,
            events: EventLog::new(),
            evidence,
            pool: None,
            pending: Vec::new(),
            deferred_chain: Vec::new(),
            finished: false,
        })
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.evidence.run_id
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    #[must_use]
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    /// Append a breadcrumb to the unchained `events.jsonl` buffer (§11 item 2).
    pub fn add_event(&mut self, kind: &str, message: &str, data: Option<Value>) {
        self.events.push(kind, message, data);
    }

    /// Open a step scope: allocates the next dense ordinal and captures
    /// `started_at` and a best-effort callsite hint (§4.7 "Step scope").
    #[track_caller]
    pub fn step(&mut self, name: impl Into<String>, input: Option<recorder_kernel::table::Table>) -> crate::step::StepHandle<'_, S> {
        self.step_counter += 1;
        let ordinal = self.step_counter;
        let code = crate::callsite::capture();
        let started_at = utc_now_iso();
        crate::step::StepHandle::new(self, ordinal, name.into(), started_at, code, input)
    }

    pub(crate) fn ensure_pool(&mut self) {
        if self.pool.is_none() {
            let workers = self.config.snapshot_async_workers.max(1);
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .unwrap_or_else(|_| rayon::ThreadPoolBuilder::new().build().expect("default rayon pool"));
            self.pool = Some(pool);
        }
    }

    pub(crate) fn submit_pending(
        &mut self,
        step_json_key: String,
        field: ArtifactField,
        pending: Vec<PendingArtifact>,
        compression: recorder_store::Compression,
    ) {
        if pending.is_empty() {
            return;
        }
        self.ensure_pool();
        for artifact in pending {
            let (tx, rx) = std::sync::mpsc::channel();
            let store = Arc::clone(&self.store);
            let task_artifact = artifact.clone();
            self.pool
                .as_ref()
                .expect("pool initialized by ensure_pool")
                .spawn(move || {
                    let result = store.put_columnar(&task_artifact.key, &task_artifact.table, compression);
                    let _ = tx.send(result);
                });
            self.pending.push(PendingWrite { step_json_key: step_json_key.clone(), field, artifact, rx });
        }
    }

    pub(crate) fn defer_chain_entry(&mut self, ordinal: u64, ts: String, payload_ref: String, step_json_key: String) {
        self.deferred_chain.push(DeferredChainStep { ordinal, ts, payload_ref, step_json_key });
    }

    pub(crate) fn register_step(&mut self, step_ref: StepRef) {
        self.evidence.steps.push(step_ref);
    }

    /// Block until every submitted async snapshot write completes, then
    /// patch the owning step's evidence in place and clear its pending
    /// flags (§4.5 "async mode", §9 "Async writes + deterministic evidence").
    fn drain_pending(&mut self) -> Result<(), RecorderError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut by_key: std::collections::HashMap<String, Vec<PendingWrite>> = std::collections::HashMap::new();
        for pw in self.pending.drain(..) {
            by_key.entry(pw.step_json_key.clone()).or_default().push(pw);
        }
        for (step_json_key, writes) in by_key {
            let value = self.store.get_json(&step_json_key)?;
            let mut evidence: StepEvidence = serde_json::from_value(value)?;
            for pw in writes {
                let result = pw
                    .rx
                    .recv()
                    .unwrap_or_else(|_| Err(StoreError::Backend { detail: "snapshot worker channel closed".to_string() }));
                let outcome = match pw.field {
                    ArtifactField::Input => evidence.input.as_mut(),
                    ArtifactField::Output => evidence.output.as_mut(),
                };
                if let Some(outcome) = outcome {
                    crate::snapshot::apply_pending_result(outcome, &pw.artifact, result);
                }
            }
            self.store.put_json(&step_json_key, &serde_json::to_value(&evidence)?)?;
        }
        Ok(())
    }

    /// Append chain entries for every step whose async writes were just
    /// drained, strictly in ordinal order, reading each step's
    /// now-final-state payload back off the store before chaining it.
    fn flush_deferred_chain(&mut self) -> Result<(), RecorderError> {
        if !self.sealer.is_enabled() {
            self.deferred_chain.clear();
            return Ok(());
        }
        let mut deferred = std::mem::take(&mut self.deferred_chain);
        deferred.sort_by_key(|d| d.ordinal);
        for step in deferred {
            let value = self.store.get_json(&step.step_json_key)?;
            self.sealer.append(self.store.as_ref(), "step", &step.ts, &step.payload_ref, &value)?;
        }
        Ok(())
    }

    /// Drain pending async writes, rewrite affected step evidence,
    /// compute run-size and prod-verify policy, write `run_finish.json`,
    /// chain it, and refresh `run.json` with the final seal head
    /// (§4.7 "Run.finish()").
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store failure. On error, the caller
    /// is expected to leave `run.json.status == "running"` so a later
    /// verification reports the run as incomplete (§7).
    pub fn finish(self) -> Result<(), RecorderError> {
        self.finish_with_status("ok", None)
    }

    /// Finish the run with `status = "error"`, stashing `message` under
    /// `metadata.error` (mirrors the reference's `finish(status="error",
    /// error=...)`, §4.7).
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store failure.
    pub fn finish_with_error(mut self, message: impl Into<String>) -> Result<(), RecorderError> {
        self.evidence.metadata.insert("error".to_string(), Value::String(message.into()));
        self.finish_with_status("error", None)
    }

    fn finish_with_status(mut self, status: &str, _unused: Option<()>) -> Result<(), RecorderError> {
        self.drain_pending()?;
        self.flush_deferred_chain()?;

        let finished_at = utc_now_iso();
        self.evidence.finished_at = Some(finished_at.clone());
        self.evidence.status = status.to_string();

        let mut policy = RunPolicy::default();
        check_max_run_mb(self.store.as_ref(), &self.prefix, self.config.max_run_mb, &mut policy);
        if self.config.require_verify_for_prod && is_prod_env(&self.evidence.tags) {
            let (ok, msg) = self.verify();
            record_prod_verify(&mut policy, ok, msg);
            if !ok {
                tracing::warn!(run_id = %self.evidence.run_id, "prod run failed chain verification at finish");
                self.evidence.status = "verify_failed".to_string();
            }
        }
        if !policy.is_empty() {
            tracing::warn!(run_id = %self.evidence.run_id, violations = ?policy.violations, "run policy violated");
            self.evidence.policy = Some(policy);
        }

        if !self.events.is_empty() {
            let bytes = self.events.to_jsonl()?;
            self.store.put_bytes(&format!("{}/events.jsonl", self.prefix), &bytes)?;
        }

        let mut run_finish_evidence = self.evidence.clone();
        run_finish_evidence.seal.head = None;
        let run_finish_value = serde_json::to_value(&run_finish_evidence)?;
        self.store.put_json(&format!("{}/run_finish.json", self.prefix), &run_finish_value)?;

        if self.sealer.is_enabled() {
            self.sealer.append(self.store.as_ref(), "run_finish", &finished_at, "run_finish.json", &run_finish_value)?;
            self.evidence.seal.head = self.sealer.head();
        }

        self.store.put_json(&format!("{}/run.json", self.prefix), &serde_json::to_value(&self.evidence)?)?;
        self.finished = true;
        tracing::info!(run_id = %self.evidence.run_id, status = %self.evidence.status, steps = self.evidence.steps.len(), "run finished");
        Ok(())
    }

    /// Re-read every chained payload from the store, recompute its
    /// digest, and walk linkage (§4.6). Never mutates state; safe to call
    /// before or after `finish()` and alongside other readers.
    #[must_use]
    pub fn verify(&self) -> VerifyResult {
        self.sealer.verify(self.store.as_ref(), &self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_kernel::table::{Cell, Column, Table};
    use recorder_store::LocalStore;

    fn store_and_recorder() -> (tempfile::TempDir, crate::recorder::Recorder<LocalStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        (dir, crate::recorder::Recorder::new(store, "proj", "ds"))
    }

    fn table(ids: &[i64], xs: &[f64]) -> Table {
        Table::new(vec![
            Column { name: "id".into(), dtype: "int".into(), values: ids.iter().copied().map(Cell::Int).collect() },
            Column { name: "x".into(), dtype: "float".into(), values: xs.iter().copied().map(Cell::Float).collect() },
        ])
    }

    #[test]
    fn start_writes_run_json_and_run_start_json() {
        let (_dir, recorder) = store_and_recorder();
        let run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        assert!(run.store.exists(&format!("{}/run.json", run.prefix)).unwrap());
        assert!(run.store.exists(&format!("{}/run_start.json", run.prefix)).unwrap());
        assert!(run.store.exists(&format!("{}/chain.json", run.prefix)).unwrap());
    }

    #[test]
    fn full_run_with_one_step_verifies_ok() {
        let (_dir, recorder) = store_and_recorder();
        let mut run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        let a = table(&[1, 2, 3], &[10.0, 20.0, 30.0]);
        let b = table(&[1, 2, 3], &[1.0, 2.0, 3.0]);
        let mut step = run.step("norm", Some(a));
        step.capture_output(b);
        step.commit().unwrap();
        run.finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        drop(dir);
    }

    #[test]
    fn scenario_normalize_then_add_chains_three_entries_and_verifies() {
        let (_dir, recorder) = store_and_recorder();
        let mut run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        let a = table(&[1, 2, 3], &[10.0, 20.0, 30.0]);
        let b = table(&[1, 2, 3], &[1.0, 2.0, 3.0]);
        let mut step = run.step("norm", Some(a));
        step.capture_output(b);
        step.commit().unwrap();
        let prefix = run.prefix().to_string();
        let store = Arc::clone(&run.store);
        run.finish().unwrap();

        let chain: recorder_kernel::proof::chain::Chain =
            serde_json::from_value(store.get_json(&format!("{prefix}/chain.json")).unwrap()).unwrap();
        assert_eq!(chain.entries.len(), 3);
        assert_eq!(chain.entries[0].entry_type, "run_start");
        assert_eq!(chain.entries[1].entry_type, "step");
        assert_eq!(chain.entries[2].entry_type, "run_finish");

        let (ok, msg) = recorder_kernel::proof::chain::verify_chain_with_payloads(&chain, |payload_ref| {
            store.get_json(&format!("{prefix}/{payload_ref}")).ok()
        });
        assert!(ok, "{msg}");
    }

    #[test]
    fn tamper_after_finish_is_detected() {
        let (_dir, recorder) = store_and_recorder();
        let mut run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        let a = table(&[1], &[1.0]);
        let b = table(&[1], &[1.0]);
        let mut step = run.step("noop", Some(a));
        step.capture_output(b);
        step.commit().unwrap();
        let prefix = run.prefix().to_string();
        let store = Arc::clone(&run.store);
        run.finish().unwrap();

        let mut finish_doc = store.get_json(&format!("{prefix}/run_finish.json")).unwrap();
        finish_doc["status"] = Value::String("tampered".to_string());
        store.put_json(&format!("{prefix}/run_finish.json"), &finish_doc).unwrap();

        let chain: recorder_kernel::proof::chain::Chain =
            serde_json::from_value(store.get_json(&format!("{prefix}/chain.json")).unwrap()).unwrap();
        let (ok, msg) = recorder_kernel::proof::chain::verify_chain_with_payloads(&chain, |payload_ref| {
            store.get_json(&format!("{prefix}/{payload_ref}")).ok()
        });
        assert!(!ok);
        assert!(msg.starts_with("Payload digest mismatch at 2"), "{msg}");
    }

    #[test]
    fn cancelled_run_without_finish_is_still_chain_verifiable() {
        let (_dir, recorder) = store_and_recorder();
        let mut run = recorder.start_run(None, BTreeMap::new(), Map::new()).unwrap();
        let a = table(&[1], &[1.0]);
        let b = table(&[1], &[1.0]);
        let mut step = run.step("noop", Some(a));
        step.capture_output(b);
        step.commit().unwrap();
        let (ok, msg) = run.verify();
        assert!(ok, "{msg}");
        // Run dropped without calling finish(): run.json.status stays "running".
    }
}

//! `StreamRun`: micro-batch helper for streaming pipelines (§11 item 1).
//! Each pushed batch is recorded as a step whose input is the previous
//! batch's output, so the chain captures a diff between consecutive
//! batches rather than against a single upstream source.

use serde_json::{Map, Value};

use recorder_kernel::table::Table;
use recorder_store::EvidenceStore;

use crate::error::RecorderError;
use crate::run::Run;

/// Wraps a [`Run`] to record a sequence of batches, diffing each against
/// the one before it.
pub struct StreamRun<S: EvidenceStore> {
    run: Run<S>,
    batch_index: u64,
    last: Option<Table>,
}

impl<S: EvidenceStore + Send + Sync + 'static> StreamRun<S> {
    pub(crate) fn new(run: Run<S>) -> Self {
        Self { run, batch_index: 0, last: None }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        self.run.run_id()
    }

    /// Record one batch as a step: its input is the previous batch's
    /// output (`None` for the first push), its output is `table`.
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store write failure.
    pub fn push(&mut self, name: impl Into<String>, table: Table, metadata: Option<Map<String, Value>>, window: Option<Value>) -> Result<(), RecorderError> {
        self.batch_index += 1;
        let input = self.last.clone();
        let mut step = self.run.step(name, input);
        if let Some(meta) = metadata {
            for (k, v) in meta {
                step.add_metadata(k, v);
            }
        }
        step.add_metadata("stream", true);
        step.add_metadata("batch_index", self.batch_index);
        if let Some(window) = window {
            step.add_metadata("window", window);
        }
        step.capture_output(table.clone());
        step.commit()?;
        self.last = Some(table);
        Ok(())
    }

    /// Finish the underlying run (§4.7 "Run.finish()").
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store write failure.
    pub fn finish(self) -> Result<(), RecorderError> {
        self.run.finish()
    }

    /// Finish the underlying run with an error status.
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store write failure.
    pub fn finish_with_error(self, message: impl Into<String>) -> Result<(), RecorderError> {
        self.run.finish_with_error(message)
    }

    #[must_use]
    pub fn verify(&self) -> recorder_kernel::proof::chain::VerifyResult {
        self.run.verify()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_kernel::table::{Cell, Column};
    use recorder_store::LocalStore;
    use std::collections::BTreeMap;

    fn table(ids: &[i64], xs: &[f64]) -> Table {
        Table::new(vec![
            Column { name: "id".into(), dtype: "int".into(), values: ids.iter().copied().map(Cell::Int).collect() },
            Column { name: "x".into(), dtype: "float".into(), values: xs.iter().copied().map(Cell::Float).collect() },
        ])
    }

    #[test]
    fn three_pushed_batches_chain_and_verify() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let recorder = crate::recorder::Recorder::new(store, "proj", "ds");
        let mut stream = recorder.start_stream(None, BTreeMap::new(), Map::new()).unwrap();

        stream.push("batch1", table(&[1, 2], &[1.0, 2.0]), None, None).unwrap();
        stream.push("batch2", table(&[1, 2, 3], &[1.0, 2.0, 3.0]), None, None).unwrap();
        stream.push("batch3", table(&[1, 2, 3], &[1.0, 2.0, 9.0]), None, None).unwrap();

        let (ok, msg) = stream.verify();
        assert!(ok, "{msg}");
        stream.finish().unwrap();
    }

    #[test]
    fn first_batch_has_no_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let recorder = crate::recorder::Recorder::new(store, "proj", "ds");
        let mut stream = recorder.start_stream(None, BTreeMap::new(), Map::new()).unwrap();
        stream.push("first", table(&[1], &[1.0]), None, None).unwrap();
        assert_eq!(stream.batch_index, 1);
        stream.finish().unwrap();
    }
}

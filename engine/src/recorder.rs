//! `Recorder`: a store/project/dataset binding plus default configuration,
//! the entry point callers construct once and reuse across runs (§4.7
//! "Recorder").

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use recorder_store::EvidenceStore;

use crate::config::RecorderConfig;
use crate::error::RecorderError;
use crate::run::Run;
use crate::stream::StreamRun;

/// Bound to one store/project/dataset triple with a default
/// [`RecorderConfig`]; `start_run`/`start_stream` open the chained
/// executions that actually write evidence.
pub struct Recorder<S: EvidenceStore> {
    store: Arc<S>,
    project: String,
    dataset: String,
    config: RecorderConfig,
}

impl<S: EvidenceStore> Recorder<S> {
    /// Bind a recorder to a store, project, and dataset with default config.
    pub fn new(store: S, project: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self { store: Arc::new(store), project: project.into(), dataset: dataset.into(), config: RecorderConfig::default() }
    }

    /// Replace the default configuration used by runs started from here on.
    #[must_use]
    pub fn with_config(mut self, config: RecorderConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    #[must_use]
    pub fn project(&self) -> &str {
        &self.project
    }

    #[must_use]
    pub fn dataset(&self) -> &str {
        &self.dataset
    }
}

impl<S: EvidenceStore + Send + Sync + 'static> Recorder<S> {
    /// Start a chained run against this recorder's store/project/dataset
    /// (§4.7 "Recorder.start_run").
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store write failure.
    pub fn start_run(&self, run_id: Option<String>, tags: BTreeMap<String, String>, metadata: Map<String, Value>) -> Result<Run<S>, RecorderError> {
        Run::start(Arc::clone(&self.store), self.project.clone(), self.dataset.clone(), self.config.clone(), run_id, tags, metadata)
    }

    /// Start a run wrapped in the micro-batch [`StreamRun`] helper (§11 item 1).
    ///
    /// # Errors
    /// Returns [`RecorderError`] on a store write failure.
    pub fn start_stream(&self, run_id: Option<String>, tags: BTreeMap<String, String>, metadata: Map<String, Value>) -> Result<StreamRun<S>, RecorderError> {
        self.start_run(run_id, tags, metadata).map(StreamRun::new)
    }
}

//! Recorder-level error kinds (§7): one variant per named error kind plus
//! wrappers for the lower crates' own error types.

use recorder_differ::error::DiffError;
use recorder_kernel::proof::canon::CanonError;
use recorder_store::StoreError;

/// Errors raised by [`crate::recorder::Recorder`], [`crate::run::Run`], and
/// [`crate::step::StepHandle`].
#[derive(Debug)]
pub enum RecorderError {
    /// A required key was absent from the store.
    NotFound { key: String },
    /// A declared/inferred primary-key column is missing from an input.
    PkMissing { detail: String },
    /// A primary-key value repeats within one side of a diff.
    PkDuplicate { side: String, samples: Vec<String> },
    /// A step scope closed successfully without `capture_output` while
    /// `enforce_explicit_output` is set.
    OutputMissing { step: String },
    /// A columnar or sample write failed. Non-fatal: recorded on evidence,
    /// never returned from a step commit.
    SnapshotFailed { detail: String },
    /// Chain verification detected a payload digest, linkage, or head
    /// mismatch. Only raised by APIs that escalate a failed verification
    /// to an error (`verify()` itself returns `(bool, String)`, never this).
    ChainIntegrity { detail: String },
    /// `max_run_mb` was exceeded or `require_verify_for_prod` failed.
    PolicyViolation { detail: String },
    /// The evidence store reported a backend-specific failure.
    StoreBackend(StoreError),
    /// Canonical JSON serialization failed.
    Canon(CanonError),
}

impl std::fmt::Display for RecorderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { key } => write!(f, "not found: {key}"),
            Self::PkMissing { detail } => write!(f, "primary key missing: {detail}"),
            Self::PkDuplicate { side, samples } => {
                write!(f, "duplicate primary key on {side}: {samples:?}")
            }
            Self::OutputMissing { step } => {
                write!(f, "step {step:?} closed without capturing output")
            }
            Self::SnapshotFailed { detail } => write!(f, "snapshot write failed: {detail}"),
            Self::ChainIntegrity { detail } => write!(f, "chain integrity violation: {detail}"),
            Self::PolicyViolation { detail } => write!(f, "policy violation: {detail}"),
            Self::StoreBackend(e) => write!(f, "store error: {e}"),
            Self::Canon(e) => write!(f, "canonicalization error: {e}"),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::StoreBackend(e) => Some(e),
            Self::Canon(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for RecorderError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { key } => RecorderError::NotFound { key },
            other => RecorderError::StoreBackend(other),
        }
    }
}

impl From<CanonError> for RecorderError {
    fn from(e: CanonError) -> Self {
        RecorderError::Canon(e)
    }
}

impl From<DiffError> for RecorderError {
    fn from(e: DiffError) -> Self {
        match e {
            DiffError::PkMissing { detail } => RecorderError::PkMissing { detail },
            DiffError::PkDuplicate { side, samples } => RecorderError::PkDuplicate { side, samples },
        }
    }
}

impl From<serde_json::Error> for RecorderError {
    fn from(e: serde_json::Error) -> Self {
        RecorderError::StoreBackend(StoreError::Io { detail: format!("json: {e}") })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_maps_to_recorder_not_found() {
        let e: RecorderError = StoreError::NotFound { key: "x".to_string() }.into();
        assert!(matches!(e, RecorderError::NotFound { key } if key == "x"));
    }

    #[test]
    fn diff_pk_duplicate_maps_through() {
        let e: RecorderError = DiffError::PkDuplicate { side: "a".to_string(), samples: vec!["1".to_string()] }.into();
        assert!(matches!(e, RecorderError::PkDuplicate { side, .. } if side == "a"));
    }

    #[test]
    fn json_error_maps_to_store_backend() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let e: RecorderError = json_err.into();
        assert!(matches!(e, RecorderError::StoreBackend(_)));
    }
}

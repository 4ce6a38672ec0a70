//! Typed differ errors (§7).

/// Typed failure for PK-indexed row diff operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffError {
    /// One or more declared primary-key columns is absent from an input.
    PkMissing { detail: String },

    /// A primary-key value repeats within one side of the diff; carries up
    /// to 5 sample values (§4.4).
    PkDuplicate { side: String, samples: Vec<String> },
}

impl std::fmt::Display for DiffError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PkMissing { detail } => write!(f, "primary key missing: {detail}"),
            Self::PkDuplicate { side, samples } => {
                write!(f, "duplicate primary key on {side}: {samples:?}")
            }
        }
    }
}

impl std::error::Error for DiffError {}

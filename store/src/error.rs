//! Evidence store error kinds (§7).

use std::fmt;

use recorder_kernel::proof::canon::CanonError;

/// Errors raised by an [`crate::EvidenceStore`] implementation.
///
/// Missing-key errors from either backend normalize to [`StoreError::NotFound`]
/// (§4.2) regardless of whether the underlying failure was a filesystem
/// `ENOENT` or an object-store 404.
#[derive(Debug)]
pub enum StoreError {
    NotFound { key: String },
    Io { detail: String },
    Backend { detail: String },
    Canon(CanonError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { key } => write!(f, "key not found: {key}"),
            StoreError::Io { detail } => write!(f, "store io error: {detail}"),
            StoreError::Backend { detail } => write!(f, "store backend error: {detail}"),
            StoreError::Canon(e) => write!(f, "canonicalization error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Canon(e) => Some(e),
            _ => None,
        }
    }
}

impl From<CanonError> for StoreError {
    fn from(e: CanonError) -> Self {
        StoreError::Canon(e)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::NotFound {
            StoreError::NotFound { key: e.to_string() }
        } else {
            StoreError::Io { detail: e.to_string() }
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Io { detail: format!("json: {e}") }
    }
}

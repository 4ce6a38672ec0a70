//! Recorder Store: the evidence store abstraction (C2, §4.2).
//!
//! Two backends implement [`EvidenceStore`]: [`local::LocalStore`] (a
//! directory on the local filesystem) and [`object::ObjectStore`] (an
//! S3-compatible bucket, §11 item 4). Callers reach either through the
//! [`Store`] factory, matching the original reference's `Store.local(...)`
//! / `Store.s3(...)` factory methods.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod columnar;
pub mod error;
pub mod local;
pub mod object;

use std::path::PathBuf;

use recorder_kernel::table::Table;
use serde_json::Value;

pub use columnar::Compression;
pub use error::StoreError;
pub use local::LocalStore;
pub use object::{ObjectCredentials, ObjectStore};

/// The keyed object store contract every backend implements (§4.2).
pub trait EvidenceStore {
    /// # Errors
    /// Returns [`StoreError`] on a backend transport or IO failure.
    fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError>;

    /// # Errors
    /// Returns [`StoreError::NotFound`] when absent; other variants on
    /// transport/IO failure.
    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] on serialization or backend failure.
    fn put_json(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// # Errors
    /// Returns [`StoreError`] on parse or backend failure.
    fn get_json(&self, key: &str) -> Result<Value, StoreError>;

    /// Writes a columnar `.bbdata` artifact, returning its size in MB.
    ///
    /// # Errors
    /// Returns [`StoreError`] on encoding or backend failure.
    fn put_columnar(&self, key: &str, table: &Table, compression: Compression) -> Result<f64, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn list_children(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// # Errors
    /// Returns [`StoreError`] on backend failure other than absence.
    fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Total size in bytes of every key transitively under `prefix`, where
    /// the backend can answer cheaply; `None` when the backend has no
    /// cheap notion of run size (§4.7 `max_run_mb`, "local store only").
    ///
    /// # Errors
    /// Returns [`StoreError`] on backend failure.
    fn run_size_bytes(&self, _prefix: &str) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }
}

/// Factory for the two supported backends, matching the original
/// `Store.local(...)` / `Store.s3(...)` entry points.
pub struct Store;

impl Store {
    #[must_use]
    pub fn local(root: impl Into<PathBuf>) -> LocalStore {
        LocalStore::new(root)
    }

    /// # Errors
    /// Returns [`StoreError::Backend`] if the bucket/region cannot be
    /// resolved into a client.
    pub fn s3(
        bucket: &str,
        prefix: &str,
        region: &str,
        endpoint_url: Option<&str>,
        credentials: Option<ObjectCredentials>,
    ) -> Result<ObjectStore, StoreError> {
        ObjectStore::new(bucket, prefix, region, endpoint_url, credentials)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_factory_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::local(dir.path());
        store.put_bytes("k", b"v").unwrap();
        assert_eq!(store.get_bytes("k").unwrap(), b"v");
    }
}

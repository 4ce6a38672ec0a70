//! S3-compatible object-store evidence backend (§11 item 4).
//!
//! Mirrors [`crate::local::LocalStore`]'s key/prefix semantics over an S3
//! bucket + key prefix, using blocking `rust-s3` calls (the recorder's Run
//! is single-owner, §5, so there is no need for an async client here).

use std::collections::BTreeSet;

use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::region::Region;

use crate::columnar::{encode_columnar, Compression};
use crate::error::StoreError;
use crate::EvidenceStore;

/// Credentials for [`ObjectStore`], kept explicit rather than relying on
/// ambient environment discovery so a `Recorder` is fully reproducible from
/// its configuration alone.
#[derive(Debug, Clone)]
pub struct ObjectCredentials {
    pub access_key: String,
    pub secret_key: String,
}

/// Evidence store backed by an S3-compatible bucket. Keys are object keys
/// under `prefix`.
pub struct ObjectStore {
    bucket: Box<Bucket>,
    prefix: String,
}

impl ObjectStore {
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the bucket/region/credentials
    /// cannot be resolved into a client.
    pub fn new(
        bucket_name: &str,
        prefix: &str,
        region: &str,
        endpoint_url: Option<&str>,
        credentials: Option<ObjectCredentials>,
    ) -> Result<Self, StoreError> {
        let region = match endpoint_url {
            Some(endpoint) => Region::Custom { region: region.to_string(), endpoint: endpoint.to_string() },
            None => region.parse().map_err(|e| StoreError::Backend { detail: format!("region: {e}") })?,
        };
        let creds = match credentials {
            Some(c) => Credentials::new(Some(&c.access_key), Some(&c.secret_key), None, None, None)
                .map_err(|e| StoreError::Backend { detail: format!("credentials: {e}") })?,
            None => Credentials::anonymous()
                .map_err(|e| StoreError::Backend { detail: format!("credentials: {e}") })?,
        };
        let bucket = Bucket::new(bucket_name, region, creds)
            .map_err(|e| StoreError::Backend { detail: format!("bucket: {e}") })?;
        Ok(Self { bucket, prefix: prefix.trim_matches('/').to_string() })
    }

    fn object_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.trim_start_matches('/').to_string()
        } else {
            format!("{}/{}", self.prefix, key.trim_start_matches('/'))
        }
    }
}

impl EvidenceStore for ObjectStore {
    fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.bucket
            .put_object(self.object_key(key), bytes)
            .map_err(|e| StoreError::Backend { detail: format!("put_object: {e}") })?;
        Ok(())
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let response = self.bucket.get_object(self.object_key(key));
        match response {
            Ok(r) if r.status_code() == 404 => Err(StoreError::NotFound { key: key.to_string() }),
            Ok(r) => Ok(r.bytes().to_vec()),
            Err(e) => {
                let msg = e.to_string();
                if msg.contains("404") || msg.contains("NoSuchKey") {
                    Err(StoreError::NotFound { key: key.to_string() })
                } else {
                    Err(StoreError::Backend { detail: format!("get_object: {msg}") })
                }
            }
        }
    }

    fn put_json(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let pretty = serde_json::to_vec_pretty(value)?;
        self.put_bytes(key, &pretty)
    }

    fn get_json(&self, key: &str) -> Result<serde_json::Value, StoreError> {
        let bytes = self.get_bytes(key)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn put_columnar(
        &self,
        key: &str,
        table: &recorder_kernel::table::Table,
        compression: Compression,
    ) -> Result<f64, StoreError> {
        let (bytes, size_mb) = encode_columnar(table, compression)?;
        self.put_bytes(key, &bytes)?;
        Ok(size_mb)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let full_prefix = self.object_key(prefix);
        let results = self
            .bucket
            .list(full_prefix.clone(), None)
            .map_err(|e| StoreError::Backend { detail: format!("list_objects: {e}") })?;
        let mut keys: Vec<String> = Vec::new();
        for page in results {
            for obj in page.contents {
                keys.push(strip_store_prefix(&self.prefix, &obj.key));
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn list_children(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        // S3 has no native directories; infer the next path segment from
        // every key returned under `prefix`, exactly as the Python
        // reference's `list_dirs` scans `list_objects_v2` pages.
        let base = prefix.trim_matches('/');
        let mut names = BTreeSet::new();
        for key in self.list(prefix)? {
            let rest = key.strip_prefix(base).unwrap_or(&key).trim_start_matches('/');
            if let Some(segment) = rest.split('/').next() {
                if !segment.is_empty() {
                    names.insert(segment.to_string());
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.get_bytes(key) {
            Ok(_) => Ok(true),
            Err(StoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn strip_store_prefix(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        key.strip_prefix(&format!("{prefix}/")).unwrap_or(key).to_string()
    }
}

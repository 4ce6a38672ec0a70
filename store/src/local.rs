//! Local-filesystem evidence store backend (§4.2).

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde_json::Value;

use crate::columnar::{encode_columnar, Compression};
use crate::error::StoreError;
use crate::EvidenceStore;

/// A store rooted at a directory on the local filesystem. Keys are
/// forward-slash relative paths below `root`.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path
    }

    /// Total size in bytes of every file transitively under `prefix`, or
    /// `None` if `prefix` does not exist. Backs §4.7's `max_run_mb` policy
    /// check, which is local-store only.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on a filesystem error other than a
    /// missing prefix.
    pub fn total_bytes_under(&self, prefix: &str) -> Result<Option<u64>, StoreError> {
        let root = self.full_path(prefix);
        if !root.exists() {
            return Ok(None);
        }
        let mut total = 0u64;
        let mut stack = vec![root];
        while let Some(dir) = stack.pop() {
            for entry in fs::read_dir(&dir)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                if meta.is_dir() {
                    stack.push(entry.path());
                } else {
                    total += meta.len();
                }
            }
        }
        Ok(Some(total))
    }
}

impl EvidenceStore for LocalStore {
    fn put_bytes(&self, key: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.full_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Atomic at key granularity (§4.2): write to a sibling temp file then
        // rename, so a reader observes either the full new value or the
        // prior one, never a partial write.
        let mut rng = rand::thread_rng();
        let suffix: u32 = rng.gen();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp_path = path.with_file_name(format!("{file_name}.tmp-{suffix:08x}"));
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.full_path(key);
        fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StoreError::NotFound { key: key.to_string() }
            } else {
                StoreError::from(e)
            }
        })
    }

    fn put_json(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let pretty = serde_json::to_vec_pretty(value)?;
        self.put_bytes(key, &pretty)
    }

    fn get_json(&self, key: &str) -> Result<Value, StoreError> {
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
        let root = self.full_path(prefix);
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut out = Vec::new();
        collect_keys(&root, &self.root, &mut out)?;
        out.sort();
        Ok(out)
    }

    fn list_children(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let root = self.full_path(prefix);
        if !root.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&root)?
            .filter_map(std::result::Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.full_path(key).exists())
    }

    fn run_size_bytes(&self, prefix: &str) -> Result<Option<u64>, StoreError> {
        self.total_bytes_under(prefix)
    }
}

fn collect_keys(dir: &Path, root: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_keys(&path, root, out)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace(std::path::MAIN_SEPARATOR, "/");
            out.push(rel);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_kernel::table::{Cell, Column, Table};
    use serde_json::json;

    fn store() -> (LocalStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (LocalStore::new(dir.path()), dir)
    }

    #[test]
    fn put_then_get_round_trips_bytes() {
        let (s, _dir) = store();
        s.put_bytes("a/b.txt", b"hello").unwrap();
        assert_eq!(s.get_bytes("a/b.txt").unwrap(), b"hello");
    }

    #[test]
    fn get_missing_key_is_not_found() {
        let (s, _dir) = store();
        let err = s.get_bytes("nope").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn put_json_is_pretty_and_round_trips() {
        let (s, _dir) = store();
        let v = json!({"b": 1, "a": 2});
        s.put_json("run.json", &v).unwrap();
        let raw = s.get_bytes("run.json").unwrap();
        assert!(String::from_utf8(raw).unwrap().contains('\n'));
        assert_eq!(s.get_json("run.json").unwrap(), v);
    }

    #[test]
    fn list_returns_sorted_transitive_keys() {
        let (s, _dir) = store();
        s.put_bytes("p/d/r1/a.json", b"{}").unwrap();
        s.put_bytes("p/d/r1/steps/0001_x/step.json", b"{}").unwrap();
        let keys = s.list("p/d/r1").unwrap();
        assert_eq!(
            keys,
            vec![
                "p/d/r1/a.json".to_string(),
                "p/d/r1/steps/0001_x/step.json".to_string(),
            ]
        );
    }

    #[test]
    fn list_children_returns_immediate_names_only() {
        let (s, _dir) = store();
        s.put_bytes("p/d/r1/a.json", b"{}").unwrap();
        s.put_bytes("p/d/r2/a.json", b"{}").unwrap();
        let mut children = s.list_children("p/d").unwrap();
        children.sort();
        assert_eq!(children, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn exists_reflects_presence() {
        let (s, _dir) = store();
        assert!(!s.exists("x").unwrap());
        s.put_bytes("x", b"1").unwrap();
        assert!(s.exists("x").unwrap());
    }

    #[test]
    fn put_columnar_round_trips_via_store() {
        let (s, _dir) = store();
        let t = Table::new(vec![Column {
            name: "id".into(),
            dtype: "int".into(),
            values: vec![Cell::Int(1), Cell::Int(2)],
        }]);
        let size_mb = s.put_columnar("art.bbdata", &t, Compression::Zstd).unwrap();
        assert!(size_mb > 0.0);
        let bytes = s.get_bytes("art.bbdata").unwrap();
        let back = crate::columnar::decode_columnar(&bytes).unwrap();
        assert_eq!(back.n_rows(), 2);
    }

    #[test]
    fn total_bytes_under_sums_nested_files() {
        let (s, _dir) = store();
        s.put_bytes("p/d/r1/a.json", &[0u8; 10]).unwrap();
        s.put_bytes("p/d/r1/steps/0001_x/step.json", &[0u8; 20]).unwrap();
        assert_eq!(s.total_bytes_under("p/d/r1").unwrap(), Some(30));
        assert_eq!(s.total_bytes_under("nope").unwrap(), None);
    }
}

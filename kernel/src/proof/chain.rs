//! Per-run hash chain: construction and two-phase verification.
//!
//! An entry's digest commits to `prev ‖ "\n" ‖ payload_digest ‖ "\n" ‖ type ‖
//! "\n" ‖ ts` (UTF-8 byte concatenation, `prev` is the empty string at index
//! 0). `payload_digest` commits to the canonical JSON of whatever is stored
//! at `payload_ref`. Neither digest uses domain separation — the format is
//! fixed by the wire layout, not chosen for collision hygiene between
//! unrelated hash uses.

use serde::{Deserialize, Serialize};

use super::canon::{canonical_json_bytes, CanonError};
use super::hash::{canonical_hash, sha256_hex, ContentHash};

/// One link in a run's hash chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainEntry {
    pub index: u64,
    #[serde(rename = "type")]
    pub entry_type: String,
    pub ts: String,
    pub payload_ref: String,
    pub payload_digest: String,
    pub prev: Option<String>,
    pub digest: String,
}

/// The full chain document persisted as `chain.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chain {
    pub version: String,
    pub run_id: String,
    pub algo: String,
    pub entries: Vec<ChainEntry>,
    pub head: Option<String>,
}

impl Chain {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            version: "1".to_string(),
            run_id: run_id.into(),
            algo: "sha256".to_string(),
            entries: Vec::new(),
            head: None,
        }
    }

    /// Append a new entry for `payload`, stored (or to be stored) at
    /// `payload_ref`, and return the appended entry.
    ///
    /// # Errors
    ///
    /// Returns [`CanonError`] if `payload` cannot be canonicalized.
    pub fn append(
        &mut self,
        entry_type: &str,
        ts: &str,
        payload_ref: &str,
        payload: &serde_json::Value,
    ) -> Result<&ChainEntry, CanonError> {
        let pdig = payload_digest(payload)?;
        let prev = self.head.clone();
        let digest = chain_digest(prev.as_deref(), pdig.as_str(), entry_type, ts);

        let entry = ChainEntry {
            index: self.entries.len() as u64,
            entry_type: entry_type.to_string(),
            ts: ts.to_string(),
            payload_ref: payload_ref.to_string(),
            payload_digest: pdig.as_str().to_string(),
            prev,
            digest: digest.as_str().to_string(),
        };

        self.head = Some(entry.digest.clone());
        self.entries.push(entry);
        Ok(self.entries.last().expect("just pushed"))
    }
}

/// `"sha256:" + hex(sha256(canonical_json(payload)))`.
///
/// # Errors
///
/// Returns [`CanonError`] if `payload` cannot be canonicalized.
pub fn payload_digest(payload: &serde_json::Value) -> Result<ContentHash, CanonError> {
    let bytes = canonical_json_bytes(payload)?;
    Ok(canonical_hash(&bytes))
}

/// `"sha256:" + hex(sha256(prev ‖ "\n" ‖ payload_digest ‖ "\n" ‖ type ‖ "\n" ‖ ts))`.
#[must_use]
pub fn chain_digest(prev: Option<&str>, payload_digest: &str, entry_type: &str, ts: &str) -> ContentHash {
    let prev = prev.unwrap_or("");
    let material = format!("{prev}\n{payload_digest}\n{entry_type}\n{ts}");
    let hex = sha256_hex(material.as_bytes());
    ContentHash::parse(&format!("sha256:{hex}")).unwrap_or_else(|| unreachable!())
}

/// Result of a verification pass: human-readable and stable across runs.
pub type VerifyResult = (bool, String);

/// Phase 2: verify linkage only (index density, prev chaining, per-entry
/// digest recomputation, head). Does not touch any payload store.
#[must_use]
pub fn verify_chain_structure(chain: &Chain) -> VerifyResult {
    let mut prev_digest: Option<&str> = None;
    for (i, entry) in chain.entries.iter().enumerate() {
        if entry.index != i as u64 {
            return (false, format!("Index mismatch at {i}"));
        }
        let expected_prev = prev_digest.map(str::to_string);
        if entry.prev != expected_prev {
            return (false, format!("Prev mismatch at {i}"));
        }
        let recomputed = chain_digest(
            entry.prev.as_deref(),
            &entry.payload_digest,
            &entry.entry_type,
            &entry.ts,
        );
        if recomputed.as_str() != entry.digest {
            return (false, format!("Digest mismatch at {i}"));
        }
        prev_digest = Some(entry.digest.as_str());
    }

    match (&chain.head, chain.entries.last()) {
        (None, None) => (true, "ok".to_string()),
        (Some(head), Some(last)) if head == &last.digest => (true, "ok".to_string()),
        _ => (false, "Head mismatch".to_string()),
    }
}

/// Phase 1 + phase 2: reload every payload via `loader`, recompute its
/// digest, compare to the recorded `payload_digest`, then verify linkage.
///
/// `loader` receives `payload_ref` relative to the run prefix and returns
/// the raw bytes stored there (the caller is expected to parse them as
/// JSON); a missing or unreadable payload is reported as a mismatch rather
/// than propagated as an error, matching the sealer's "never throws" API.
///
/// # Errors
///
/// This function itself never fails; verification outcomes are reported
/// through the returned `(bool, message)` pair.
pub fn verify_chain_with_payloads<F>(chain: &Chain, mut loader: F) -> VerifyResult
where
    F: FnMut(&str) -> Option<serde_json::Value>,
{
    for (i, entry) in chain.entries.iter().enumerate() {
        let Some(payload) = loader(&entry.payload_ref) else {
            return (
                false,
                format!("Payload digest mismatch at {i}: {} (unreadable)", entry.payload_ref),
            );
        };
        let recomputed = match payload_digest(&payload) {
            Ok(d) => d,
            Err(e) => return (false, format!("Payload digest mismatch at {i}: {e}")),
        };
        if recomputed.as_str() != entry.payload_digest {
            return (
                false,
                format!("Payload digest mismatch at {i}: {}", entry.payload_ref),
            );
        }
    }
    verify_chain_structure(chain)
}

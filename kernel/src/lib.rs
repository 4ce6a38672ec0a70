//! Recorder Kernel: the deterministic core of the forensic recorder.
//!
//! # API surface
//!
//! The kernel exposes the primitives every other crate in the workspace
//! builds on:
//!
//! - [`proof::canon::canonical_json_bytes`] -- the one canonical JSON encoder
//! - [`proof::hash`] / [`proof::chain`] -- digests and chain linkage
//! - [`table::Table`] -- the in-memory table value and bridge trait
//! - [`fingerprint`] -- schema fingerprint, content fingerprint, row hashing
//! - [`time`] -- UTC timestamps and path sanitization shared by every crate
//!
//! # Module dependency direction
//!
//! `table` ← `fingerprint` ← `proof`. `time` depends on nothing internal.
//! One-way only, no cycles.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod fingerprint;
pub mod proof;
pub mod table;
pub mod time;

//! Recorder Differ: primary-key-indexed row diff with adaptive policies
//! (C4, §4.4).
//!
//! This crate depends only on `recorder_kernel` — it does NOT depend on
//! `recorder_engine`.
//!
//! # Crate dependency graph
//!
//! ```text
//! recorder_kernel  ←  recorder_differ  ←  recorder_engine
//! (pure carrier)       (PK diff, cache)    (Recorder/Run/Step)
//! ```
//!
//! # Key types
//!
//! - [`config::DiffConfig`] — PK, mode, and adaptive-policy thresholds
//! - [`cache::RowHashCache`] — explicit-handle row-hash memoization
//! - [`rowdiff::diff_rowhash`] — the PK-indexed diff algorithm
//! - [`error::DiffError`] — `PkMissing` / `PkDuplicate`

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod cache;
pub mod config;
pub mod error;
pub mod rowdiff;

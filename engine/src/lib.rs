//! Recorder Engine: Recorder/Run/Step lifecycle orchestration (C7, §4.7).
//!
//! This crate wires the lower crates together into the public API a caller
//! actually uses:
//!
//! - [`recorder::Recorder`] — bound to a store, project, dataset, default
//!   configs (§4.7's option table).
//! - [`run::Run`] — one chained, append-only execution; `start()` /
//!   `step()` / `finish()` / `verify()`.
//! - [`step::StepHandle`] — a scoped acquisition over an optional input
//!   table and a required output table; evidence is written on `commit()`,
//!   even on error.
//! - [`stream::StreamRun`] — micro-batch helper (§11 item 1).
//!
//! # Crate dependency graph
//!
//! ```text
//! recorder_kernel  ←  recorder_store   ←─┐
//!                  ←  recorder_differ  ←─┴─  recorder_engine
//! ```
//!
//! `recorder_engine` is the only crate that depends on all three lower
//! crates; none of them depends back on it.

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]

pub mod callsite;
pub mod config;
pub mod error;
pub mod events;
pub mod policy;
pub mod recorder;
pub mod run;
pub mod seal;
pub mod snapshot;
pub mod step;
pub mod stream;

pub use config::{RecorderConfig, SealConfig, SnapshotConfig, SnapshotMode};
pub use error::RecorderError;
pub use recorder::Recorder;
pub use run::Run;
pub use step::StepHandle;
pub use stream::StreamRun;

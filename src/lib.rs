//! Core library for the acoustic-daq acquisition daemon.
//!
//! This library contains the core traits, data structures, and instrument
//! drivers for the acquisition loop: a run table written by the UI is read on
//! every pass, each active row is routed through the multiplexer to the
//! pulser, and the captured waveforms are saved under the data directory while
//! the UI is kept informed over a best-effort live channel.
//!
//! The `acoustic-daq` binary wires these together; see [`orchestrator`].

pub mod adapters;
pub mod config;
pub mod core;
pub mod daemon;
pub mod data;
pub mod error;
pub mod experiment;
pub mod instrument;
pub mod notify;
pub mod orchestrator;

pub use error::{AppResult, DaqError};
pub use orchestrator::{Orchestrator, PassSummary, RowOutcome, RowReport};

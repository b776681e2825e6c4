//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it gives one consistent place for everything
//! that can go wrong between reading the run table and notifying the UI.
//!
//! ## Error Hierarchy
//!
//! Errors fall into three classes, and the orchestrator treats them differently:
//!
//! - **Fatal**: `TableLoad`. The run table is missing or not valid JSON. The pass
//!   aborts and the error propagates out of the run loop.
//! - **Recoverable per row**: `InvalidRow`, `ChannelSwitch`, `Acquisition`,
//!   `Storage`. The failure is logged, recorded in the pass summary, and the
//!   orchestrator moves on to the next acquisition or row.
//! - **Recoverable channel**: `Notification`. The live channel disables itself
//!   for the rest of the process lifetime; acquisition continues.
//!
//! The remaining variants (`Config`, `Configuration`, `Io`, `Json`, `Daemon`,
//! `FeatureNotEnabled`) cover start-up and process control.

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Everything that can go wrong in the daemon.
#[derive(Error, Debug)]
pub enum DaqError {
    /// The configuration layers could not be merged or extracted
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// A loaded setting failed validation
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Filesystem or socket failure outside the store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The run table is missing or malformed; ends the loop
    #[error("Failed to load run table '{}': {reason}", path.display())]
    TableLoad {
        /// Table file that was read
        path: PathBuf,
        /// Why it could not be used
        reason: String,
    },

    /// An active row is missing a field or holds a bad value
    #[error("Invalid row '{testid}': {reason}")]
    InvalidRow {
        /// The row's `testid` cell as written
        testid: String,
        /// First problem found
        reason: String,
    },

    /// The multiplexer refused or failed a switch
    #[error("Channel switch error: {0}")]
    ChannelSwitch(String),

    /// The pulser could not configure or capture
    #[error("Acquisition error: {0}")]
    Acquisition(String),

    /// A waveform or log entry could not be written
    #[error("Storage error: {0}")]
    Storage(String),

    /// The live UI could not be reached
    #[error("Notification error: {0}")]
    Notification(String),

    /// Pid file or signal handling failed
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// A driver needs a cargo feature this build lacks
    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl DaqError {
    /// True for errors that end the whole pass rather than a single row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DaqError::TableLoad { .. })
    }
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

//! Core traits and data types for the acquisition stack.
//!
//! This module defines the seam between the orchestrator and the hardware:
//!
//! - [`Pulser`]: configures the pulser/receiver and captures one waveform
//! - [`Multiplexer`]: routes a transducer (or a transducer pair) to the pulser
//! - [`Waveform`]: the captured time series, in the on-disk JSON shape
//! - [`AcquisitionParams`]: everything a pulser needs for one shot
//!
//! # Data Flow
//!
//! ```text
//! TestRow --[ChannelSelection]--> Multiplexer
//!         --[AcquisitionParams]--> Pulser --[Waveform]--> RunStore / LiveChannel
//! ```
//!
//! Driver calls are fire-and-wait: there is no cancellation once issued.

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Basic Data Types
// =============================================================================

/// Transducer configuration for a shot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Through-transmission: one transducer sends, another receives
    Tr,
    /// Pulse-echo: the same transducer sends and receives
    Pe,
}

impl Mode {
    /// Parse the table's `mode(tr/pe)` cell, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tr" => Some(Mode::Tr),
            "pe" => Some(Mode::Pe),
            _ => None,
        }
    }

    /// Wire name, `"tr"` or `"pe"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Tr => "tr",
            Mode::Pe => "pe",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters for one configure-and-acquire call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    /// Transmission or pulse-echo
    pub mode: Mode,
    /// Receiver gain in dB
    pub gain_db: f64,
    /// Pulse centre frequency in MHz
    pub frequency_mhz: f64,
    /// Capture window length in µs
    pub window_us: f64,
    /// Delay from trigger to start of capture in µs
    pub delay_us: f64,
    /// Two digits: high-pass then low-pass filter setting
    pub filter_mode: String,
}

/// A captured waveform as written to disk.
///
/// Serialises to `{ "time (us)": [...], "amp": [...], "gain": f64 }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    /// Sample times in µs
    #[serde(rename = "time (us)")]
    pub time_us: Vec<f64>,
    /// Sample amplitudes
    pub amp: Vec<f64>,
    /// Receiver gain (dB) the waveform was taken at
    pub gain: f64,
}

impl Waveform {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.amp.len()
    }

    /// True when no samples were captured.
    pub fn is_empty(&self) -> bool {
        self.amp.is_empty()
    }

    /// Largest excursion from zero, used for quick sanity logging.
    pub fn peak(&self) -> f64 {
        self.amp.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
    }
}

/// The channel (or channel pair) a row asks the multiplexer for.
///
/// Channel cells are kept as the UI wrote them; each multiplexer decides how to
/// address them (a plain number, or `"module,channel"` on a relay matrix).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSelection {
    /// The `channel` cell
    pub primary: String,
    /// The `channel2` cell, when filled in
    pub secondary: Option<String>,
}

impl ChannelSelection {
    /// One channel cell.
    pub fn single(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: None,
        }
    }

    /// A `channel` and `channel2` pair.
    pub fn pair(primary: impl Into<String>, secondary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary: Some(secondary.into()),
        }
    }

    /// Primary then secondary, skipping the secondary when absent.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.secondary.as_deref())
    }
}

impl fmt::Display for ChannelSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secondary {
            Some(second) => write!(f, "[{}] + [{}]", self.primary, second),
            None => write!(f, "[{}]", self.primary),
        }
    }
}

// =============================================================================
// Instrument Traits
// =============================================================================

/// A pulser/receiver with an attached digitizer.
#[async_trait]
pub trait Pulser: Send {
    /// Human readable name for logs.
    fn name(&self) -> String;

    /// Open the connection. Idempotent: calling it on a connected pulser is a no-op.
    async fn connect(&mut self) -> AppResult<()>;

    /// Apply `params` and capture one waveform. Errors are reported as
    /// [`DaqError::Acquisition`](crate::error::DaqError::Acquisition).
    async fn configure_and_acquire(&mut self, params: &AcquisitionParams) -> AppResult<Waveform>;
}

/// A relay multiplexer in front of the pulser.
#[async_trait]
pub trait Multiplexer: Send {
    fn name(&self) -> String;

    /// Route `selection` to the pulser. Channels outside the device's
    /// addressable range fail with
    /// [`DaqError::ChannelSwitch`](crate::error::DaqError::ChannelSwitch).
    async fn switch_channel(&mut self, selection: &ChannelSelection) -> AppResult<()>;
}

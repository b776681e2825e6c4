//! Mock instruments that generate synthetic data.
//!
//! [`MockPulser`] answers every shot with a gaussian-windowed tone burst at the
//! requested frequency. [`MockMux`] is an in-memory relay bank. Both record the
//! calls they receive so tests can assert on what the orchestrator asked for.
use crate::{
    core::{AcquisitionParams, ChannelSelection, Multiplexer, Pulser, Waveform},
    error::{AppResult, DaqError},
};
use async_trait::async_trait;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Sample period of the synthetic digitizer, in µs.
pub const SAMPLE_PERIOD_US: f64 = 0.008;

/// Upper bound on samples per shot; larger windows are refused.
const MAX_SAMPLES: usize = 2_000_000;

type FailurePredicate = Box<dyn Fn(&AcquisitionParams) -> bool + Send + Sync>;

/// Shared record of the parameters a [`MockPulser`] was asked to acquire with.
pub type CallLog = Arc<Mutex<Vec<AcquisitionParams>>>;

/// Pulser that synthesizes waveforms in memory.
pub struct MockPulser {
    connected: bool,
    connects: usize,
    calls: CallLog,
    fail_when: Option<FailurePredicate>,
}

impl Default for MockPulser {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPulser {
    /// A pulser that succeeds once connected.
    pub fn new() -> Self {
        Self {
            connected: false,
            connects: 0,
            calls: Arc::new(Mutex::new(Vec::new())),
            fail_when: None,
        }
    }

    /// Fail every shot whose parameters match `predicate`.
    pub fn failing_when<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&AcquisitionParams) -> bool + Send + Sync + 'static,
    {
        self.fail_when = Some(Box::new(predicate));
        self
    }

    /// Handle on the call log; stays valid after the pulser is boxed.
    pub fn call_log(&self) -> CallLog {
        Arc::clone(&self.calls)
    }

    /// How many times `connect` actually opened the (fake) link.
    pub fn connect_count(&self) -> usize {
        self.connects
    }
}

/// Deterministic echo: a tone burst centred a third of the way into the window.
pub fn synthesize(params: &AcquisitionParams) -> AppResult<Waveform> {
    if params.frequency_mhz.is_nan() || params.frequency_mhz <= 0.0 {
        return Err(DaqError::Acquisition(format!(
            "frequency must be positive, got {} MHz",
            params.frequency_mhz
        )));
    }
    if params.window_us.is_nan() || params.window_us <= 0.0 {
        return Err(DaqError::Acquisition(format!(
            "capture window must be positive, got {} us",
            params.window_us
        )));
    }

    let samples = (params.window_us / SAMPLE_PERIOD_US).round() as usize;
    if samples > MAX_SAMPLES {
        return Err(DaqError::Acquisition(format!(
            "capture window of {} us needs {} samples (limit {})",
            params.window_us, samples, MAX_SAMPLES
        )));
    }
    let samples = samples.max(1);

    let arrival = params.delay_us + params.window_us / 3.0;
    // About one and a half cycles either side of the peak
    let sigma = 1.5 / params.frequency_mhz;
    let scale = 0.01 * 10f64.powf(params.gain_db / 20.0);

    let mut time_us = Vec::with_capacity(samples);
    let mut amp = Vec::with_capacity(samples);
    for i in 0..samples {
        let t = params.delay_us + i as f64 * SAMPLE_PERIOD_US;
        let dt = t - arrival;
        let envelope = (-0.5 * (dt / sigma).powi(2)).exp();
        time_us.push(t);
        amp.push(scale * envelope * (2.0 * PI * params.frequency_mhz * dt).sin());
    }

    Ok(Waveform {
        time_us,
        amp,
        gain: params.gain_db,
    })
}

#[async_trait]
impl Pulser for MockPulser {
    fn name(&self) -> String {
        "Mock Pulser".to_string()
    }

    async fn connect(&mut self) -> AppResult<()> {
        if !self.connected {
            info!("Connecting to Mock Pulser...");
            self.connected = true;
            self.connects += 1;
        }
        Ok(())
    }

    async fn configure_and_acquire(&mut self, params: &AcquisitionParams) -> AppResult<Waveform> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(params.clone());
        }
        if !self.connected {
            return Err(DaqError::Acquisition(
                "Mock Pulser is not connected".to_string(),
            ));
        }
        if self.fail_when.as_ref().is_some_and(|fail| fail(params)) {
            return Err(DaqError::Acquisition(format!(
                "scripted failure at {} MHz, {} dB",
                params.frequency_mhz, params.gain_db
            )));
        }
        let waveform = synthesize(params)?;
        debug!(
            "Mock shot: {} samples at {} MHz, peak {:.4}",
            waveform.len(),
            params.frequency_mhz,
            waveform.peak()
        );
        Ok(waveform)
    }
}

/// Shared record of the selections a [`MockMux`] switched to.
pub type SwitchLog = Arc<Mutex<Vec<ChannelSelection>>>;

/// In-memory relay bank addressing channels `0..channels`.
///
/// A channel cell may be a single number or a comma-separated group (the
/// `"module,channel"` form); every number in it must be in range.
pub struct MockMux {
    channels: u32,
    switches: SwitchLog,
}

impl MockMux {
    /// Relay bank addressing `0..channels`.
    pub fn new(channels: u32) -> Self {
        Self {
            channels,
            switches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle on every successful switch.
    pub fn switch_log(&self) -> SwitchLog {
        Arc::clone(&self.switches)
    }

    fn check(&self, cell: &str) -> AppResult<()> {
        for part in cell.split(',') {
            let n: u32 = part.trim().parse().map_err(|_| {
                DaqError::ChannelSwitch(format!("malformed channel '{}'", cell))
            })?;
            if n >= self.channels {
                return Err(DaqError::ChannelSwitch(format!(
                    "channel '{}' is outside 0..{}",
                    cell, self.channels
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Multiplexer for MockMux {
    fn name(&self) -> String {
        format!("Mock Mux ({} channels)", self.channels)
    }

    async fn switch_channel(&mut self, selection: &ChannelSelection) -> AppResult<()> {
        for cell in selection.channels() {
            self.check(cell)?;
        }
        debug!("Mock mux switched to {}", selection);
        if let Ok(mut switches) = self.switches.lock() {
            switches.push(selection.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;

    fn params(freq: f64) -> AcquisitionParams {
        AcquisitionParams {
            mode: Mode::Pe,
            gain_db: 20.0,
            frequency_mhz: freq,
            window_us: 10.0,
            delay_us: 5.0,
            filter_mode: "11".to_string(),
        }
    }

    #[test]
    fn test_synthesize_shape() {
        let wf = synthesize(&params(2.25)).unwrap();
        assert_eq!(wf.len(), 1250);
        assert_eq!(wf.time_us.len(), wf.amp.len());
        assert!((wf.time_us[0] - 5.0).abs() < 1e-12);
        assert!((wf.time_us[1] - wf.time_us[0] - SAMPLE_PERIOD_US).abs() < 1e-12);
        assert_eq!(wf.gain, 20.0);
        assert!(wf.peak() > 0.0);
        // Deterministic
        assert_eq!(wf, synthesize(&params(2.25)).unwrap());
    }

    #[test]
    fn test_synthesize_rejects_bad_params() {
        assert!(matches!(
            synthesize(&params(0.0)),
            Err(DaqError::Acquisition(_))
        ));
        let mut p = params(1.0);
        p.window_us = 0.0;
        assert!(synthesize(&p).is_err());
    }

    #[tokio::test]
    async fn test_pulser_connect_is_idempotent() {
        let mut pulser = MockPulser::new();
        pulser.connect().await.unwrap();
        pulser.connect().await.unwrap();
        assert_eq!(pulser.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_pulser_records_and_fails_on_script() {
        let mut pulser = MockPulser::new().failing_when(|p| p.frequency_mhz > 4.0);
        let calls = pulser.call_log();
        pulser.connect().await.unwrap();

        assert!(pulser.configure_and_acquire(&params(1.0)).await.is_ok());
        let err = pulser.configure_and_acquire(&params(5.0)).await.unwrap_err();
        assert!(matches!(err, DaqError::Acquisition(_)));
        assert_eq!(calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mux_range() {
        let mut mux = MockMux::new(8);
        let log = mux.switch_log();
        mux.switch_channel(&ChannelSelection::single("7")).await.unwrap();
        mux.switch_channel(&ChannelSelection::pair("0,3", "1,2"))
            .await
            .unwrap();
        assert!(matches!(
            mux.switch_channel(&ChannelSelection::single("8")).await,
            Err(DaqError::ChannelSwitch(_))
        ));
        assert!(mux
            .switch_channel(&ChannelSelection::single("a"))
            .await
            .is_err());
        assert_eq!(log.lock().unwrap().len(), 2);
    }
}

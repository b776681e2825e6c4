//! The acquisition loop.
//!
//! One [`Orchestrator`] owns every handle the loop needs (pulser, optional
//! multiplexer, store, live channel). A pass re-reads the run table, walks its
//! rows in file order and acquires every active one:
//!
//! ```text
//! load table ─┬─ row inactive ──────────────────────────────── skip
//!             ├─ row invalid ───────────────────────────────── reject
//!             └─ row valid ── highlight ── for each frequency:
//!                                 switch mux ─ acquire ─ save ─ (log) ─ notify
//! end of pass: all inactive? highlight "inactive" + idle delay; loop_delay
//! ```
//!
//! Only a table that cannot be read ends a pass early. Everything that goes
//! wrong inside a row is logged, recorded in the [`PassSummary`] and skipped.
use crate::{
    config::Settings,
    core::{Multiplexer, Pulser},
    data::{JsonStore, RunStore},
    error::{AppResult, DaqError},
    experiment::{expand, AcquisitionInstance, RunTable, TestRow},
    instrument::{build_multiplexer, build_pulser},
    notify::{LiveChannel, INACTIVE_ROWID},
};
use chrono::Utc;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What happened to one row during a pass.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// `run(y/n)` was not `y`; nothing was touched
    Inactive,
    /// Active but failed validation; no driver was called
    Rejected {
        /// The validation error
        reason: String,
    },
    /// Dispatched. `written` acquisitions were saved, one message per failure
    Acquired {
        /// Acquisitions saved
        written: usize,
        /// One message per failed acquisition
        failures: Vec<String>,
    },
}

/// One row of a [`PassSummary`].
#[derive(Debug, Clone, PartialEq)]
pub struct RowReport {
    /// The row's `testid` cell, `"?"` when missing
    pub testid: String,
    /// What the pass did with it
    pub outcome: RowOutcome,
}

/// Per-row results of one pass, in table order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassSummary {
    /// Rows visited before the pass ended
    pub rows: Vec<RowReport>,
    /// Shutdown was requested before the pass finished
    pub interrupted: bool,
}

impl PassSummary {
    /// Rows skipped as inactive.
    pub fn inactive(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Inactive))
    }

    /// Rows that failed validation.
    pub fn rejected(&self) -> usize {
        self.count(|o| matches!(o, RowOutcome::Rejected { .. }))
    }

    /// Acquisitions saved across all rows.
    pub fn written(&self) -> usize {
        self.rows
            .iter()
            .map(|r| match &r.outcome {
                RowOutcome::Acquired { written, .. } => *written,
                _ => 0,
            })
            .sum()
    }

    /// Acquisitions that failed across all rows.
    pub fn failed(&self) -> usize {
        self.rows
            .iter()
            .map(|r| match &r.outcome {
                RowOutcome::Acquired { failures, .. } => failures.len(),
                _ => 0,
            })
            .sum()
    }

    /// True for a non-empty table with no active row.
    pub fn all_inactive(&self) -> bool {
        !self.rows.is_empty() && self.inactive() == self.rows.len()
    }

    fn count(&self, pred: impl Fn(&RowOutcome) -> bool) -> usize {
        self.rows.iter().filter(|r| pred(&r.outcome)).count()
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} rows: {} inactive, {} rejected, {} acquisitions written, {} failed",
            self.rows.len(),
            self.inactive(),
            self.rejected(),
            self.written(),
            self.failed()
        )?;
        if self.interrupted {
            write!(f, " (interrupted)")?;
        }
        Ok(())
    }
}

/// Drives passes over the run table.
pub struct Orchestrator {
    settings: Settings,
    pulser: Box<dyn Pulser>,
    mux: Option<Box<dyn Multiplexer>>,
    store: Box<dyn RunStore>,
    live: LiveChannel,
    connected: bool,
}

impl Orchestrator {
    /// Wire up already-built handles.
    pub fn new(
        settings: Settings,
        pulser: Box<dyn Pulser>,
        mux: Option<Box<dyn Multiplexer>>,
        store: Box<dyn RunStore>,
        live: LiveChannel,
    ) -> Self {
        match &mux {
            Some(mux) => info!("Using multiplexer: {}", mux.name()),
            None => warn!("No multiplexer configured; channel settings in the run table are ignored"),
        }
        info!("Using pulser: {}", pulser.name());
        Self {
            settings,
            pulser,
            mux,
            store,
            live,
            connected: false,
        }
    }

    /// Build every handle from configuration.
    pub fn from_settings(settings: Settings) -> AppResult<Self> {
        let pulser = build_pulser(&settings)?;
        let mux = build_multiplexer(&settings)?;
        let store = Box::new(JsonStore::new(settings.storage.data_dir.clone()));
        let live = LiveChannel::from_config(&settings.notify);
        Ok(Self::new(settings, pulser, mux, store, live))
    }

    /// The settings this orchestrator was built from.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Connect the pulser if it is not connected yet. A failure is logged and
    /// retried at the start of the next pass.
    pub async fn connect(&mut self) {
        if self.connected {
            return;
        }
        match self.pulser.connect().await {
            Ok(()) => self.connected = true,
            Err(e) => error!("Failed to connect {}: {:#}", self.pulser.name(), e),
        }
    }

    /// Run one pass to completion, delays included.
    pub async fn run_pass(&mut self) -> AppResult<PassSummary> {
        let (_keep_open, mut shutdown) = watch::channel(false);
        self.pass(&mut shutdown).await
    }

    /// Repeat passes until `shutdown` turns true. Returns the number of passes
    /// run. A table that cannot be loaded ends the loop with an error.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> AppResult<u64> {
        let mut passes = 0;
        while !*shutdown.borrow() {
            let summary = self.pass(&mut shutdown).await?;
            passes += 1;
            info!("Pass {} done: {}", passes, summary);
        }
        info!("Shutdown requested; stopping after {} passes", passes);
        Ok(passes)
    }

    async fn pass(&mut self, shutdown: &mut watch::Receiver<bool>) -> AppResult<PassSummary> {
        self.connect().await;

        let table = RunTable::load(&self.settings.table.path)?;
        debug!(
            "Loaded {} rows from {:?}",
            table.rows.len(),
            self.settings.table.path
        );

        let mut summary = PassSummary::default();
        for raw in &table.rows {
            if *shutdown.borrow() {
                summary.interrupted = true;
                break;
            }

            let testid = raw.testid();
            if !raw.is_active() {
                summary.rows.push(RowReport {
                    testid,
                    outcome: RowOutcome::Inactive,
                });
                continue;
            }

            let outcome = match raw.validate() {
                Ok(row) => {
                    self.live.highlight(&row.testid).await;
                    self.dispatch(&row).await
                }
                Err(e) => {
                    error!("Skipping row: {}", e);
                    RowOutcome::Rejected {
                        reason: e.to_string(),
                    }
                }
            };
            summary.rows.push(RowReport { testid, outcome });

            if pause(self.settings.orchestrator.row_settle(), shutdown).await {
                summary.interrupted = true;
                break;
            }
        }

        if summary.interrupted {
            return Ok(summary);
        }

        if summary.all_inactive() {
            self.live.highlight(INACTIVE_ROWID).await;
            if pause(self.settings.orchestrator.idle_delay(), shutdown).await {
                summary.interrupted = true;
                return Ok(summary);
            }
        }
        if pause(table.loop_delay, shutdown).await {
            summary.interrupted = true;
        }
        Ok(summary)
    }

    /// Acquire every frequency of `row`. Acquisition and storage failures skip
    /// one frequency; a channel switch failure ends the row.
    async fn dispatch(&mut self, row: &TestRow) -> RowOutcome {
        let instances = expand(&row.frequency, Utc::now());
        info!(
            "Row {}: {} acquisition(s) on {}",
            row.testid,
            instances.len(),
            row.channels
        );

        let mut written = 0;
        let mut failures = Vec::new();
        for instance in &instances {
            match self.acquire(row, instance).await {
                Ok(()) => written += 1,
                Err(e @ DaqError::ChannelSwitch(_)) => {
                    error!(
                        "Row {} skipped, cannot switch to {}: {:#}",
                        row.testid, row.channels, e
                    );
                    failures.push(e.to_string());
                    break;
                }
                Err(e) => {
                    error!(
                        "Row {} at {} MHz failed: {:#}",
                        row.testid, instance.frequency_mhz, e
                    );
                    failures.push(e.to_string());
                }
            }
        }
        RowOutcome::Acquired { written, failures }
    }

    async fn acquire(&mut self, row: &TestRow, instance: &AcquisitionInstance) -> AppResult<()> {
        if let Some(mux) = self.mux.as_mut() {
            mux.switch_channel(&row.channels).await?;
        }

        let params = row.params_at(instance.frequency_mhz);
        let waveform = self.pulser.configure_and_acquire(&params).await?;

        let receipt = self
            .store
            .save_waveform(&waveform, row, instance.sweep.as_ref())
            .await
            .map_err(|e| DaqError::Storage(format!("{:#}", e)))?;
        debug!("Saved {:?}", receipt.history);

        if receipt.first_save {
            self.store
                .append_log(row)
                .await
                .map_err(|e| DaqError::Storage(format!("{:#}", e)))?;
        }

        self.live.test(&row.testid, &waveform.amp).await;
        Ok(())
    }
}

/// Sleep for `duration` unless shutdown is requested first. Returns true when
/// shutdown was requested.
async fn pause(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    if duration.is_zero() {
        return false;
    }

    let sleep = tokio::time::sleep(duration);
    tokio::pin!(sleep);
    let stopped = async { shutdown.wait_for(|stop| *stop).await.is_ok() };
    tokio::select! {
        _ = &mut sleep => false,
        stopped = stopped => {
            if !stopped {
                // Sender gone: nobody can ask us to stop any more
                sleep.await;
            }
            stopped
        }
    }
}

//! Live notifications to the UI.
//!
//! Events go out as one JSON object per line:
//!
//! ```text
//! {"event":"highlight","data":{"rowid":"17"}}
//! {"event":"test","data":{"rowid":"17","amp":[0.0,0.12,...]}}
//! ```
//!
//! Notifications are best effort. [`LiveChannel`] bounds every emit with a
//! timeout and shuts itself off after the first failure, so a missing or
//! stuck UI never holds up acquisition.
use crate::{
    config::NotifyConfig,
    error::{AppResult, DaqError},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

/// Row id sent in a highlight when nothing in the table is active.
pub const INACTIVE_ROWID: &str = "inactive";

/// A message for the live UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum Event {
    /// A waveform was captured for `rowid`
    Test {
        /// Row the waveform belongs to
        rowid: String,
        /// Sample amplitudes
        amp: Vec<f64>,
    },
    /// `rowid` is about to be acquired
    Highlight {
        /// Row id, or `"inactive"`
        rowid: String,
    },
}

impl Event {
    /// One JSON object terminated by a newline.
    pub fn to_line(&self) -> AppResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Somewhere events can be sent.
#[async_trait]
pub trait Notifier: Send {
    async fn emit(&mut self, event: &Event) -> AppResult<()>;
}

/// Writes events to a UI listener over TCP, connecting on first use.
pub struct TcpNotifier {
    address: String,
    stream: Option<TcpStream>,
}

impl TcpNotifier {
    /// Target `host:port`; nothing is connected yet.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            stream: None,
        }
    }
}

#[async_trait]
impl Notifier for TcpNotifier {
    async fn emit(&mut self, event: &Event) -> AppResult<()> {
        let line = event.to_line()?;
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.address).await.map_err(|e| {
                DaqError::Notification(format!("cannot reach UI at {}: {}", self.address, e))
            })?;
            debug!("Notifier connected to {}", self.address);
            self.stream = Some(stream);
        }
        let address = &self.address;
        self.stream
            .as_mut()
            .ok_or_else(|| DaqError::Notification("notifier stream unavailable".to_string()))?
            .write_all(line.as_bytes())
            .await
            .map_err(|e| DaqError::Notification(format!("write to {} failed: {}", address, e)))
    }
}

/// In-memory notifier for tests: records events, optionally failing.
#[derive(Clone, Default)]
pub struct MockNotifier {
    events: Arc<Mutex<Vec<Event>>>,
    fail: bool,
}

impl MockNotifier {
    /// A notifier that records every event.
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every emit fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Events emitted so far (failed attempts included).
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn emit(&mut self, event: &Event) -> AppResult<()> {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
        if self.fail {
            return Err(DaqError::Notification("mock notifier refused".to_string()));
        }
        Ok(())
    }
}

/// Best-effort wrapper the orchestrator talks to.
pub struct LiveChannel {
    notifier: Option<Box<dyn Notifier>>,
    timeout: Duration,
}

impl LiveChannel {
    /// Wrap `notifier`, bounding every emit by `timeout`.
    pub fn new(notifier: Box<dyn Notifier>, timeout: Duration) -> Self {
        Self {
            notifier: Some(notifier),
            timeout,
        }
    }

    /// A channel that drops every event.
    pub fn disabled() -> Self {
        Self {
            notifier: None,
            timeout: Duration::ZERO,
        }
    }

    /// TCP channel when `notify.address` is set, disabled otherwise.
    pub fn from_config(cfg: &NotifyConfig) -> Self {
        match cfg.address.as_deref().filter(|a| !a.is_empty()) {
            Some(address) => {
                info!("Live notifications go to {}", address);
                Self::new(
                    Box::new(TcpNotifier::new(address)),
                    Duration::from_millis(cfg.timeout_ms),
                )
            }
            None => {
                info!("No notify.address configured; live notifications are off");
                Self::disabled()
            }
        }
    }

    /// False once disabled or when never configured.
    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Send `event`. Never fails; the first error disables the channel.
    pub async fn emit(&mut self, event: Event) {
        let Some(notifier) = self.notifier.as_mut() else {
            return;
        };
        let failure = match tokio::time::timeout(self.timeout, notifier.emit(&event)).await {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("emit timed out after {:?}", self.timeout),
        };
        warn!(
            "Live notifications disabled for the rest of this run: {}",
            failure
        );
        self.notifier = None;
    }

    /// Mark `rowid` as the row being acquired.
    pub async fn highlight(&mut self, rowid: &str) {
        self.emit(Event::Highlight {
            rowid: rowid.to_string(),
        })
        .await;
    }

    /// Push the latest waveform for `rowid`.
    pub async fn test(&mut self, rowid: &str, amp: &[f64]) {
        self.emit(Event::Test {
            rowid: rowid.to_string(),
            amp: amp.to_vec(),
        })
        .await;
    }
}

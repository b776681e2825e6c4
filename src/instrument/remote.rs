//! Pulser/digitizer server client over TCP.
//!
//! The server owns the pulser and the scope. Each shot is one JSON line each
//! way:
//!
//! ```text
//! -> {"command":"acquire","mode":"pe","gain":30.0,"freq":2.25,"time":20.0,"delay":5.0,"filtermode":"11"}
//! <- {"time (us)":[...],"amp":[...],"gain":30.0}
//! <- {"error":"scope did not trigger"}
//! ```
//!
//! A failed exchange drops the stream; the next shot reconnects.
use crate::{
    core::{AcquisitionParams, Mode, Pulser, Waveform},
    error::{AppResult, DaqError},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Serialize)]
struct AcquireRequest<'a> {
    command: &'static str,
    mode: Mode,
    gain: f64,
    freq: f64,
    time: f64,
    delay: f64,
    filtermode: &'a str,
}

impl<'a> From<&'a AcquisitionParams> for AcquireRequest<'a> {
    fn from(params: &'a AcquisitionParams) -> Self {
        Self {
            command: "acquire",
            mode: params.mode,
            gain: params.gain_db,
            freq: params.frequency_mhz,
            time: params.window_us,
            delay: params.delay_us,
            filtermode: &params.filter_mode,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AcquireReply {
    Failed { error: String },
    Captured(Waveform),
}

/// Pulser behind a JSON-lines TCP server.
pub struct RemotePulser {
    address: String,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl RemotePulser {
    /// Nothing is connected until first use.
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
            stream: None,
        }
    }

    /// True while a stream is held open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn open(&mut self) -> AppResult<&mut BufReader<TcpStream>> {
        if self.stream.is_none() {
            let stream = timeout(self.timeout, TcpStream::connect(&self.address))
                .await
                .map_err(|_| {
                    DaqError::Acquisition(format!(
                        "timed out connecting to pulser server at {}",
                        self.address
                    ))
                })?
                .map_err(|e| {
                    DaqError::Acquisition(format!(
                        "cannot connect to pulser server at {}: {}",
                        self.address, e
                    ))
                })?;
            info!("Connected to pulser server at {}", self.address);
            self.stream = Some(BufReader::new(stream));
        }
        self.stream
            .as_mut()
            .ok_or_else(|| DaqError::Acquisition("pulser stream unavailable".to_string()))
    }

    async fn exchange(&mut self, request: &str) -> AppResult<String> {
        let stream = self.open().await?;
        stream
            .get_mut()
            .write_all(request.as_bytes())
            .await
            .map_err(|e| DaqError::Acquisition(format!("request write failed: {}", e)))?;

        let mut line = String::new();
        let n = stream
            .read_line(&mut line)
            .await
            .map_err(|e| DaqError::Acquisition(format!("reply read failed: {}", e)))?;
        if n == 0 {
            return Err(DaqError::Acquisition(
                "pulser server closed the connection".to_string(),
            ));
        }
        Ok(line)
    }
}

#[async_trait]
impl Pulser for RemotePulser {
    fn name(&self) -> String {
        format!("Remote Pulser ({})", self.address)
    }

    async fn connect(&mut self) -> AppResult<()> {
        self.open().await.map(|_| ())
    }

    async fn configure_and_acquire(&mut self, params: &AcquisitionParams) -> AppResult<Waveform> {
        let mut request = serde_json::to_string(&AcquireRequest::from(params))?;
        request.push('\n');
        debug!("Pulser request: {}", request.trim_end());

        let line = match timeout(self.timeout, self.exchange(&request)).await {
            Ok(Ok(line)) => line,
            Ok(Err(e)) => {
                self.stream = None;
                return Err(e);
            }
            Err(_) => {
                warn!(
                    "Pulser server at {} did not answer within {:?}; dropping connection",
                    self.address, self.timeout
                );
                self.stream = None;
                return Err(DaqError::Acquisition(format!(
                    "no reply from pulser server within {:?}",
                    self.timeout
                )));
            }
        };

        match serde_json::from_str::<AcquireReply>(&line) {
            Ok(AcquireReply::Captured(waveform)) => Ok(waveform),
            Ok(AcquireReply::Failed { error }) => Err(DaqError::Acquisition(error)),
            Err(e) => {
                // Framing is lost once a reply fails to parse
                self.stream = None;
                Err(DaqError::Acquisition(format!(
                    "unreadable reply from pulser server: {}",
                    e
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_shape() {
        let params = AcquisitionParams {
            mode: Mode::Tr,
            gain_db: 30.0,
            frequency_mhz: 2.25,
            window_us: 20.0,
            delay_us: 5.0,
            filter_mode: "11".to_string(),
        };
        let value = serde_json::to_value(AcquireRequest::from(&params)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "command": "acquire",
                "mode": "tr",
                "gain": 30.0,
                "freq": 2.25,
                "time": 20.0,
                "delay": 5.0,
                "filtermode": "11"
            })
        );
    }

    #[test]
    fn test_reply_variants() {
        let ok: AcquireReply =
            serde_json::from_str(r#"{"time (us)":[0.0],"amp":[0.5],"gain":10.0}"#).unwrap();
        assert!(matches!(ok, AcquireReply::Captured(w) if w.amp == vec![0.5]));
        let err: AcquireReply = serde_json::from_str(r#"{"error":"no trigger"}"#).unwrap();
        assert!(matches!(err, AcquireReply::Failed { error } if error == "no trigger"));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_acquisition_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut pulser = RemotePulser::new(address, Duration::from_millis(500));
        assert!(matches!(
            pulser.connect().await,
            Err(DaqError::Acquisition(_))
        ));
        assert!(!pulser.is_connected());
    }
}

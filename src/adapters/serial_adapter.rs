use super::Adapter;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Serial adapter for RS-232 communication
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
#[derive(Clone)]
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Internal read timeout of the port
    timeout: Duration,

    /// The actual serial port (behind Arc<Mutex> for async access)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout: Duration::from_millis(100),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Configured port path.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Configured baud rate.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> Result<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port
            .clone()
            .ok_or_else(|| anyhow!("Serial port '{}' is not open", self.port_name))
    }
}

#[async_trait]
impl Adapter for SerialAdapter {
    async fn connect(&mut self) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.is_some() {
                return Ok(());
            }
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(self.timeout)
                .open()
                .with_context(|| {
                    format!(
                        "Failed to open serial port '{}' at {} baud",
                        self.port_name, self.baud_rate
                    )
                })?;

            self.port = Some(Arc::new(Mutex::new(port)));

            debug!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(crate::error::DaqError::FeatureNotEnabled("instrument_serial".to_string()).into())
        }
    }

    async fn write_frame(&mut self, frame: &str) -> Result<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let frame = frame.to_string();

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard
                    .write_all(frame.as_bytes())
                    .context("Failed to write to serial port")?;
                port_guard.flush().context("Failed to flush serial port")?;

                debug!("Sent serial frame: {:?}", frame);
                Ok(())
            })
            .await
            .context("Serial I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = frame;
            Err(anyhow!("Serial feature disabled"))
        }
    }

    async fn read_available(&mut self) -> Result<String> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;

            tokio::task::spawn_blocking(move || -> Result<String> {
                use std::io::Read;

                let mut port_guard = port.blocking_lock();
                let pending = port_guard
                    .bytes_to_read()
                    .context("Failed to query serial input buffer")? as usize;
                if pending == 0 {
                    return Ok(String::new());
                }

                let mut buffer = vec![0u8; pending];
                match port_guard.read(&mut buffer) {
                    Ok(n) => {
                        let response = String::from_utf8_lossy(&buffer[..n]).trim().to_string();
                        debug!("Received serial response: {}", response);
                        Ok(response)
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(String::new()),
                    Err(e) => Err(anyhow!("Serial read error: {}", e)),
                }
            })
            .await
            .context("Serial I/O task panicked")?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(anyhow!("Serial feature disabled"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_adapter_creation() {
        let adapter = SerialAdapter::new("/dev/ttyUSB0".to_string(), 9600);
        assert_eq!(adapter.port_name(), "/dev/ttyUSB0");
        assert_eq!(adapter.baud_rate(), 9600);
    }

    #[tokio::test]
    async fn test_write_before_connect_fails() {
        let mut adapter = SerialAdapter::new("/dev/does-not-exist".to_string(), 9600);
        assert!(adapter.write_frame("C;\r\n").await.is_err());
        assert!(adapter.read_available().await.is_err());
    }
}

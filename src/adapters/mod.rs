//! Hardware adapter implementations
//!
//! Adapters carry raw frames between a driver and a device. Drivers own the
//! command syntax; adapters only know how to write bytes and read back what
//! the device had to say.

/// In-memory adapter for tests
pub mod mock;
/// Serial port adapter
pub mod serial_adapter;

pub use mock::MockAdapter;
pub use serial_adapter::SerialAdapter;

use anyhow::Result;
use async_trait::async_trait;

/// A frame-oriented byte link to a device.
#[async_trait]
pub trait Adapter: Send {
    /// Open the link. Idempotent.
    async fn connect(&mut self) -> Result<()>;

    /// Write one complete frame, terminator included.
    async fn write_frame(&mut self, frame: &str) -> Result<()>;

    /// Read whatever the device has sent since the last read.
    async fn read_available(&mut self) -> Result<String>;
}

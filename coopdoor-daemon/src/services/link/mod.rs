#[cfg(feature = "ble")]
mod ble;
mod simulated;

#[cfg(feature = "ble")]
pub use ble::BleLink;
pub use simulated::SimulatedLink;

use std::time::Duration;

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("Device {0} not found")]
    NotFound(String),

    #[error("Link operation timed out")]
    Timeout,

    #[error("Link I/O failed: {0}")]
    Io(String),

    #[error("Invalid device address {0}")]
    InvalidAddress(String),

    #[error("Bluetooth adapter {0} not available")]
    AdapterMissing(String),
}

impl LinkError {
    /// Retrying cannot fix a bad address or a missing adapter.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LinkError::InvalidAddress(_) | LinkError::AdapterMissing(_))
    }
}

/// Radio-level access to the door controller.
///
/// The worker holds its link across awaits from a spawned task, so links
/// must be shareable between threads.
#[async_trait]
pub trait DoorLink: Send + Sync {
    /// Scans until the configured device is seen or `timeout` passes.
    async fn discover(&mut self, timeout: Duration) -> Result<(), LinkError>;

    async fn connect(&mut self) -> Result<(), LinkError>;

    /// Writes one payload to the drive characteristic.
    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError>;

    async fn is_connected(&mut self) -> bool;

    async fn disconnect(&mut self);
}

#[async_trait]
impl<L: DoorLink + ?Sized> DoorLink for Box<L> {
    async fn discover(&mut self, timeout: Duration) -> Result<(), LinkError> {
        (**self).discover(timeout).await
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        (**self).connect().await
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        (**self).write(payload).await
    }

    async fn is_connected(&mut self) -> bool {
        (**self).is_connected().await
    }

    async fn disconnect(&mut self) {
        (**self).disconnect().await
    }
}

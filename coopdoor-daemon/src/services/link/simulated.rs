use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use coopdoor_api::pulse::{CLOSE_PAYLOAD, OPEN_PULSE_PAYLOAD};

use super::{DoorLink, LinkError};

const STALL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct Device {
    connected: bool,
    invalid_address: bool,
    absent: bool,
    connect_failures: u32,
    connect_delay: Duration,
    writes_until_drop: Option<usize>,
    stalled: bool,
    writes: Vec<Vec<u8>>,
    connect_attempts: u32,
    disconnects: u32,
}

/// In-process stand-in for the door controller.
///
/// Clones share one device, so a test can keep a handle for injecting
/// faults and inspecting writes after the link moved into the worker.
#[derive(Debug, Clone, Default)]
pub struct SimulatedLink {
    device: Arc<Mutex<Device>>,
}

impl SimulatedLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.device().connect_failures = count;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.device().connect_delay = delay;
    }

    pub fn set_invalid_address(&self) {
        self.device().invalid_address = true;
    }

    /// Stops advertising; scans find nothing until `set_present` is called.
    pub fn set_absent(&self) {
        self.device().absent = true;
    }

    pub fn set_present(&self) {
        self.device().absent = false;
    }

    /// Drops the link as if the controller went out of range.
    pub fn drop_link(&self) {
        self.device().connected = false;
    }

    /// After `count` more successful writes every write fails and the link drops.
    pub fn fail_writes_after(&self, count: usize) {
        self.device().writes_until_drop = Some(count);
    }

    /// Writes and liveness checks hang until `heal` is called, like a
    /// controller that stopped answering without dropping the link.
    pub fn stall(&self) {
        self.device().stalled = true;
    }

    pub fn heal(&self) {
        let mut device = self.device();
        device.stalled = false;
        device.writes_until_drop = None;
        device.connect_failures = 0;
        device.absent = false;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.device().writes.clone()
    }

    pub fn open_pulses(&self) -> usize {
        self.device()
            .writes
            .iter()
            .filter(|w| w.as_slice() == OPEN_PULSE_PAYLOAD)
            .count()
    }

    pub fn closes(&self) -> usize {
        self.device()
            .writes
            .iter()
            .filter(|w| w.as_slice() == CLOSE_PAYLOAD)
            .count()
    }

    pub fn connect_attempts(&self) -> u32 {
        self.device().connect_attempts
    }

    pub fn disconnects(&self) -> u32 {
        self.device().disconnects
    }

    async fn wait_while_stalled(&self) {
        loop {
            let stalled = self.device().stalled;
            if !stalled {
                return;
            }
            tokio::time::sleep(STALL_POLL).await;
        }
    }
}

#[async_trait]
impl DoorLink for SimulatedLink {
    async fn discover(&mut self, timeout: Duration) -> Result<(), LinkError> {
        let (invalid, absent) = {
            let device = self.device();
            (device.invalid_address, device.absent)
        };
        if invalid {
            return Err(LinkError::InvalidAddress("simulated".into()));
        }
        if absent {
            tokio::time::sleep(timeout).await;
            return Err(LinkError::NotFound("simulated".into()));
        }
        Ok(())
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        let delay = {
            let mut device = self.device();
            device.connect_attempts += 1;
            if device.connect_failures > 0 {
                device.connect_failures -= 1;
                return Err(LinkError::Io("simulated connect failure".into()));
            }
            device.connect_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.device().connected = true;
        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        self.wait_while_stalled().await;
        let mut device = self.device();
        if !device.connected {
            return Err(LinkError::Io("not connected".into()));
        }
        match device.writes_until_drop {
            Some(0) => {
                device.connected = false;
                Err(LinkError::Io("link dropped during write".into()))
            }
            Some(remaining) => {
                device.writes_until_drop = Some(remaining - 1);
                device.writes.push(payload.to_vec());
                Ok(())
            }
            None => {
                device.writes.push(payload.to_vec());
                Ok(())
            }
        }
    }

    async fn is_connected(&mut self) -> bool {
        self.wait_while_stalled().await;
        self.device().connected
    }

    async fn disconnect(&mut self) {
        let mut device = self.device();
        if device.connected {
            device.disconnects += 1;
        }
        device.connected = false;
    }
}

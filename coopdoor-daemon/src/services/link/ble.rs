use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use coopdoor_api::pulse::WRITE_CHARACTERISTIC;

use super::{DoorLink, LinkError};

const SCAN_POLL: Duration = Duration::from_millis(250);

fn io_error(e: btleplug::Error) -> LinkError {
    LinkError::Io(e.to_string())
}

/// BlueZ-backed link to the controller.
pub struct BleLink {
    mac: String,
    adapter_name: String,
    adapter: Option<Adapter>,
    peripheral: Option<Peripheral>,
    characteristic: Option<Characteristic>,
}

impl BleLink {
    pub fn new(mac: impl Into<String>, adapter: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            adapter_name: adapter.into(),
            adapter: None,
            peripheral: None,
            characteristic: None,
        }
    }

    fn address(&self) -> Result<BDAddr, LinkError> {
        BDAddr::from_str(&self.mac).map_err(|_| LinkError::InvalidAddress(self.mac.clone()))
    }

    async fn adapter(&mut self) -> Result<Adapter, LinkError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }

        let manager = Manager::new().await.map_err(io_error)?;
        for adapter in manager.adapters().await.map_err(io_error)? {
            let info = adapter.adapter_info().await.map_err(io_error)?;
            if info.starts_with(&self.adapter_name) {
                self.adapter = Some(adapter.clone());
                return Ok(adapter);
            }
        }

        Err(LinkError::AdapterMissing(self.adapter_name.clone()))
    }
}

#[async_trait]
impl DoorLink for BleLink {
    async fn discover(&mut self, timeout: Duration) -> Result<(), LinkError> {
        let address = self.address()?;
        let adapter = self.adapter().await?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(io_error)?;

        let search = async {
            loop {
                for peripheral in adapter.peripherals().await? {
                    if peripheral.address() == address {
                        return Ok::<_, btleplug::Error>(peripheral);
                    }
                }
                tokio::time::sleep(SCAN_POLL).await;
            }
        };
        let found = tokio::time::timeout(timeout, search).await;

        if let Err(e) = adapter.stop_scan().await {
            tracing::debug!(error = %e, "failed to stop scan");
        }

        match found {
            Ok(Ok(peripheral)) => {
                self.peripheral = Some(peripheral);
                Ok(())
            }
            Ok(Err(e)) => Err(io_error(e)),
            Err(_) => Err(LinkError::NotFound(self.mac.clone())),
        }
    }

    async fn connect(&mut self) -> Result<(), LinkError> {
        let peripheral = self
            .peripheral
            .as_ref()
            .ok_or_else(|| LinkError::NotFound(self.mac.clone()))?;

        if !peripheral.is_connected().await.map_err(io_error)? {
            peripheral.connect().await.map_err(io_error)?;
        }
        peripheral.discover_services().await.map_err(io_error)?;

        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == WRITE_CHARACTERISTIC)
            .ok_or_else(|| LinkError::Io("drive characteristic not exposed".into()))?;
        self.characteristic = Some(characteristic);

        Ok(())
    }

    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        let (Some(peripheral), Some(characteristic)) = (&self.peripheral, &self.characteristic)
        else {
            return Err(LinkError::Io("not connected".into()));
        };

        peripheral
            .write(characteristic, payload, WriteType::WithResponse)
            .await
            .map_err(io_error)
    }

    async fn is_connected(&mut self) -> bool {
        match &self.peripheral {
            Some(peripheral) => peripheral.is_connected().await.unwrap_or(false),
            None => false,
        }
    }

    async fn disconnect(&mut self) {
        self.characteristic = None;
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                tracing::debug!(error = %e, "disconnect failed");
            }
        }
    }
}

//! # Bluetooth LE Transport Module
//!
//! Real radio link to the sensor module over the Nordic UART service.
//! The firmware streams its records as notifications on the UART RX
//! characteristic; each notification payload becomes one raw chunk for
//! the frame decoder.
//!
//! Only this module touches `btleplug`; the rest of the pipeline sees
//! the `Transport` trait.

use crate::error::TransportError;
use crate::transport::Transport;
use async_trait::async_trait;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter, ValueNotification};
use btleplug::platform::{Manager, Peripheral};
use futures::stream::StreamExt;
use std::pin::Pin;
use std::time::Duration;

/// Nordic UART service RX characteristic (device to host notifications).
const UART_RX_UUID: &str = "6e400003-b5a3-f393-e0a9-e50e24dcca9e";

/// How long a connect-time scan runs before matching peripherals.
const SCAN_DURATION: Duration = Duration::from_secs(3);

type NotificationStream = Pin<Box<dyn futures::Stream<Item = ValueNotification> + Send>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioDevice {
    pub id: String,
    pub name: String,
}

impl RadioDevice {
    pub fn new(id: String, name: String) -> Self {
        Self { id, name }
    }
}

/// Scans for nearby named radio devices.
///
/// An empty filter returns every named peripheral; otherwise only
/// devices whose name contains the filter (case-insensitive).
#[allow(dead_code)]
pub async fn scan_devices(filter: &str) -> Result<Vec<RadioDevice>, TransportError> {
    let manager = Manager::new()
        .await
        .map_err(|e| TransportError::ConnectFailed(format!("BLE manager: {}", e)))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| TransportError::ConnectFailed(format!("adapters: {}", e)))?;

    let central = adapters.into_iter().next().ok_or(TransportError::NoAdapter)?;

    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| TransportError::ConnectFailed(format!("scan: {}", e)))?;

    tokio::time::sleep(SCAN_DURATION).await;

    let _ = central.stop_scan().await;

    let peripherals = central
        .peripherals()
        .await
        .map_err(|e| TransportError::ConnectFailed(format!("peripherals: {}", e)))?;

    let filter = filter.to_lowercase();
    let mut devices = Vec::new();
    for peripheral in peripherals {
        if let Ok(Some(props)) = peripheral.properties().await {
            if let Some(local_name) = props.local_name {
                if filter.is_empty() || local_name.to_lowercase().contains(&filter) {
                    devices.push(RadioDevice::new(
                        peripheral.address().to_string(),
                        local_name,
                    ));
                }
            }
        }
    }

    Ok(devices)
}

/// BLE transport bound to one device id (address or name fragment).
pub struct BleTransport {
    device_id: String,
    peripheral: Option<Peripheral>,
    notifications: Option<NotificationStream>,
}

impl BleTransport {
    pub fn new(device_id: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            peripheral: None,
            notifications: None,
        }
    }

    async fn find_peripheral(&self) -> Result<Peripheral, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("BLE manager: {}", e)))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("adapters: {}", e)))?;
        let central = adapters.into_iter().next().ok_or(TransportError::NoAdapter)?;

        central
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("scan: {}", e)))?;
        tokio::time::sleep(SCAN_DURATION).await;
        let _ = central.stop_scan().await;

        let peripherals = central
            .peripherals()
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("peripherals: {}", e)))?;

        for peripheral in peripherals {
            if peripheral
                .address()
                .to_string()
                .eq_ignore_ascii_case(&self.device_id)
            {
                return Ok(peripheral);
            }
            if let Ok(Some(props)) = peripheral.properties().await {
                if let Some(name) = props.local_name {
                    if name
                        .to_lowercase()
                        .contains(&self.device_id.to_lowercase())
                    {
                        return Ok(peripheral);
                    }
                }
            }
        }

        Err(TransportError::ConnectFailed(format!(
            "device {} not found",
            self.device_id
        )))
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let peripheral = self.find_peripheral().await?;

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("{:?}", e)))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("discover: {:?}", e)))?;

        let rx_char = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid.to_string() == UART_RX_UUID)
            .ok_or_else(|| {
                TransportError::ConnectFailed("UART RX characteristic not found".to_string())
            })?;

        peripheral
            .subscribe(&rx_char)
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("subscribe: {:?}", e)))?;

        let notifications = peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::ConnectFailed(format!("notifications: {:?}", e)))?;

        log::info!("Connected to {}", self.device_id);
        self.notifications = Some(notifications);
        self.peripheral = Some(peripheral);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.notifications = None;
        if let Some(peripheral) = self.peripheral.take() {
            if let Err(e) = peripheral.disconnect().await {
                log::warn!("BLE disconnect failed: {:?}", e);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.peripheral.is_some()
    }

    async fn recv_chunk(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        let stream = self
            .notifications
            .as_mut()
            .ok_or(TransportError::NotConnected)?;

        loop {
            match stream.next().await {
                Some(notification) => {
                    // Other characteristics may notify too; only UART RX
                    // carries sensor data
                    if notification.uuid.to_string() == UART_RX_UUID {
                        return Ok(Some(notification.value));
                    }
                }
                None => return Ok(None),
            }
        }
    }
}

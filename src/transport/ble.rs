//! # Bluetooth Low Energy Transport
//!
//! Reaches the printer over GATT. The B1 advertises its model token in the
//! local name; frames are written without response to a vendor
//! characteristic that also carries notifications.
//!
//! ## Characteristics
//!
//! The primary vendor service carries a single characteristic used for both
//! write and notify. Some firmware revisions expose a serial-port-profile
//! emulation over BLE instead, with separate write and notify
//! characteristics; when the primary characteristic is absent we fall back
//! to that pair.
//!
//! | Role | UUID |
//! |------|------|
//! | Primary service | `e7810a71-73ae-499d-8c15-faa9aef0c3f2` |
//! | Primary write+notify | `bef8d6c9-9c21-4c9e-b632-bd58c1009f9f` |
//! | SPP write | `49535343-8841-43f4-a8d4-ecbe34729bb3` |
//! | SPP notify | `49535343-1e4d-4bd9-ba61-23c647249616` |

use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::{ConnectError, Connection, SendError, Transport, TransportEndpoint, TransportKind};

/// Vendor GATT service
pub const PRIMARY_SERVICE: Uuid = Uuid::from_u128(0xe7810a71_73ae_499d_8c15_faa9aef0c3f2);

/// Write + notify characteristic on the vendor service
pub const PRIMARY_CHAR: Uuid = Uuid::from_u128(0xbef8d6c9_9c21_4c9e_b632_bd58c1009f9f);

/// Fallback SPP-over-BLE write characteristic
pub const SPP_WRITE_CHAR: Uuid = Uuid::from_u128(0x49535343_8841_43f4_a8d4_ecbe34729bb3);

/// Fallback SPP-over-BLE notify characteristic
pub const SPP_NOTIFY_CHAR: Uuid = Uuid::from_u128(0x49535343_1e4d_4bd9_ba61_23c647249616);

/// How long the connect-time rescan advertises before giving up on finding
/// the endpoint again
const RESCAN_WINDOW: Duration = Duration::from_secs(3);

/// # BLE Transport
///
/// Scans for peripherals whose advertised name contains the model token
/// (e.g. "B1") and connects over GATT.
pub struct BleTransport {
    name_token: String,
}

impl BleTransport {
    /// Create a BLE transport matching advertised names against `name_token`.
    pub fn new(name_token: impl Into<String>) -> Self {
        Self {
            name_token: name_token.into(),
        }
    }

    async fn adapter(&self) -> Result<Adapter, ConnectError> {
        let manager = Manager::new()
            .await
            .map_err(|e| ConnectError::Rejected(format!("BLE manager unavailable: {}", e)))?;
        let adapters = manager
            .adapters()
            .await
            .map_err(|e| ConnectError::Rejected(format!("BLE adapter enumeration failed: {}", e)))?;
        adapters
            .into_iter()
            .next()
            .ok_or_else(|| ConnectError::Rejected("no BLE adapter present".to_string()))
    }

    /// Scan for `window`, returning matching (peripheral, name) pairs.
    async fn scan(
        &self,
        adapter: &Adapter,
        window: Duration,
    ) -> Result<Vec<(Peripheral, String)>, ConnectError> {
        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| ConnectError::Rejected(format!("BLE scan failed to start: {}", e)))?;
        tokio::time::sleep(window).await;

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| ConnectError::Rejected(format!("BLE peripheral query failed: {}", e)))?;
        let _ = adapter.stop_scan().await;

        let mut matches = Vec::new();
        for peripheral in peripherals {
            let name = match peripheral.properties().await {
                Ok(Some(props)) => props.local_name,
                _ => None,
            };
            if let Some(name) = name {
                if name.contains(&self.name_token) {
                    matches.push((peripheral, name));
                }
            }
        }
        Ok(matches)
    }
}

#[async_trait]
impl Transport for BleTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Ble
    }

    async fn discover(&self, timeout: Duration) -> Result<Vec<TransportEndpoint>, ConnectError> {
        let adapter = self.adapter().await?;
        let matches = self.scan(&adapter, timeout).await?;

        Ok(matches
            .into_iter()
            .map(|(peripheral, name)| TransportEndpoint::Ble {
                address: peripheral.address().to_string(),
                name,
            })
            .collect())
    }

    async fn connect(
        &self,
        endpoint: &TransportEndpoint,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let TransportEndpoint::Ble { address, name } = endpoint else {
            return Err(ConnectError::Rejected(format!(
                "not a BLE endpoint: {}",
                endpoint
            )));
        };

        // Endpoints are scoped to one attempt, so re-resolve the peripheral
        // handle with a short rescan.
        let adapter = self.adapter().await?;
        let matches = self.scan(&adapter, RESCAN_WINDOW.min(timeout)).await?;
        let peripheral = matches
            .into_iter()
            .find(|(p, _)| p.address().to_string() == *address)
            .map(|(p, _)| p)
            .ok_or_else(|| ConnectError::NotFound(format!("{} no longer advertising", address)))?;

        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| ConnectError::Timeout(format!("connect to {} timed out", address)))?
            .map_err(|e| ConnectError::Rejected(format!("connect to {} failed: {}", address, e)))?;

        peripheral
            .discover_services()
            .await
            .map_err(|e| ConnectError::Rejected(format!("service discovery failed: {}", e)))?;

        let (write_char, notify_char) = resolve_characteristics(&peripheral).ok_or_else(|| {
            ConnectError::Rejected(format!(
                "{} exposes neither the vendor nor the SPP characteristics",
                name
            ))
        })?;

        // Subscribe and pump notifications into a channel the session can
        // drain at its leisure.
        let (tx, rx) = mpsc::unbounded_channel();
        let mut pump = None;
        if peripheral.subscribe(&notify_char).await.is_ok() {
            if let Ok(mut stream) = peripheral.notifications().await {
                pump = Some(tokio::spawn(async move {
                    while let Some(notification) = stream.next().await {
                        if tx.send(notification.value).is_err() {
                            break;
                        }
                    }
                }));
            }
        } else {
            tracing::debug!(address = %address, "notify subscription refused; continuing write-only");
        }

        tracing::info!(name = %name, address = %address, "BLE connected");

        Ok(Box::new(BleConnection {
            peripheral,
            write_char,
            notifications: Some(rx),
            pump,
        }))
    }
}

/// Pick the write and notify characteristics, primary first, SPP fallback.
fn resolve_characteristics(peripheral: &Peripheral) -> Option<(Characteristic, Characteristic)> {
    let chars = peripheral.characteristics();

    if let Some(primary) = chars.iter().find(|c| c.uuid == PRIMARY_CHAR) {
        return Some((primary.clone(), primary.clone()));
    }

    let write = chars.iter().find(|c| c.uuid == SPP_WRITE_CHAR)?;
    let notify = chars.iter().find(|c| c.uuid == SPP_NOTIFY_CHAR)?;
    Some((write.clone(), notify.clone()))
}

struct BleConnection {
    peripheral: Peripheral,
    write_char: Characteristic,
    notifications: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    pump: Option<JoinHandle<()>>,
}

#[async_trait]
impl Connection for BleConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        self.peripheral
            .write(&self.write_char, bytes, WriteType::WithoutResponse)
            .await
            .map_err(|e| match e {
                btleplug::Error::NotConnected => {
                    SendError::ConnectionLost("peripheral disconnected".to_string())
                }
                other => SendError::Write(format!("GATT write failed: {}", other)),
            })
    }

    fn notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.notifications.take()
    }

    async fn disconnect(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        let _ = self.peripheral.disconnect().await;
    }
}

impl Drop for BleConnection {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

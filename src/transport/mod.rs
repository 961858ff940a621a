//! # Printer Transport Layer
//!
//! This module abstracts the three physical channels a NIIMBOT B1 can be
//! reached over. Each transport knows how to discover candidate devices and
//! open a connection; a [`Connection`] is a raw byte pipe the session layer
//! writes framed packets into.
//!
//! ## Available Transports
//!
//! - [`ble`]: Bluetooth Low Energy via GATT write/notify characteristics
//! - [`serial`]: USB serial with port auto-detection
//! - [`rfcomm`]: Bluetooth SPP through a bound RFCOMM device (Linux)
//! - [`mock`]: scripted in-memory transport for tests
//!
//! ## Contract
//!
//! - `discover` rescans from scratch on every call; endpoints are not
//!   cached between calls and live only for one connection attempt.
//! - `send` is fire-and-forget at the wire level. The caller owns
//!   inter-packet pacing: the device's receive buffer is small and
//!   unacknowledged floods cause silent data loss.
//! - `notifications` hands out the inbound byte stream at most once per
//!   connection. Transports that cannot read return `None`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod ble;
pub mod mock;
pub mod rfcomm;
pub mod serial;

pub use ble::BleTransport;
pub use mock::MockTransport;
pub use rfcomm::RfcommTransport;
pub use serial::UsbSerialTransport;

/// Which physical channel a transport drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Bluetooth Low Energy (GATT)
    Ble,
    /// USB serial port
    UsbSerial,
    /// Bluetooth SPP via a bound RFCOMM device
    BluetoothSerial,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "BLE"),
            TransportKind::UsbSerial => write!(f, "USB serial"),
            TransportKind::BluetoothSerial => write!(f, "Bluetooth serial"),
        }
    }
}

/// An abstract connection target, valid for one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEndpoint {
    /// A BLE peripheral by address and advertised name
    Ble { address: String, name: String },
    /// An OS serial port
    Serial { port: String },
    /// A bound RFCOMM device path
    Rfcomm { device: String },
}

impl TransportEndpoint {
    /// Stable identity string used to key the per-device job lock.
    pub fn identity(&self) -> String {
        match self {
            TransportEndpoint::Ble { address, .. } => format!("ble:{}", address),
            TransportEndpoint::Serial { port } => format!("serial:{}", port),
            TransportEndpoint::Rfcomm { device } => format!("rfcomm:{}", device),
        }
    }
}

impl fmt::Display for TransportEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEndpoint::Ble { address, name } => write!(f, "{} ({})", name, address),
            TransportEndpoint::Serial { port } => write!(f, "{}", port),
            TransportEndpoint::Rfcomm { device } => write!(f, "{}", device),
        }
    }
}

/// Errors from discovery and connection establishment
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// No matching device within the timeout
    #[error("no matching device found: {0}")]
    NotFound(String),

    /// Device found but the connection attempt timed out
    #[error("connection timed out: {0}")]
    Timeout(String),

    /// Port or device already claimed by another process
    #[error("device busy: {0}")]
    Busy(String),

    /// Protocol-level refusal (adapter missing, pairing rejected, ...)
    #[error("connection rejected: {0}")]
    Rejected(String),
}

/// Errors from writing on an established connection
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    /// The underlying connection is gone
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Write failed but the connection may still be alive
    #[error("write failed: {0}")]
    Write(String),
}

/// One physical channel type capable of carrying frames to the printer.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Which channel this is
    fn kind(&self) -> TransportKind;

    /// Scan for candidate printers. A fresh scan on every call.
    async fn discover(&self, timeout: Duration) -> Result<Vec<TransportEndpoint>, ConnectError>;

    /// Open a connection to a discovered endpoint.
    async fn connect(
        &self,
        endpoint: &TransportEndpoint,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, ConnectError>;
}

/// An open byte pipe to the printer, exclusively owned by one session.
#[async_trait]
pub trait Connection: Send {
    /// Write one frame. Fire-and-forget; pacing is the caller's job.
    async fn send(&mut self, bytes: &[u8]) -> Result<(), SendError>;

    /// Take the inbound notification stream, at most once.
    ///
    /// Returns `None` if already taken or if the transport cannot read.
    fn notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>>;

    /// Best-effort teardown. Dropping the connection must also be safe.
    async fn disconnect(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_identity_is_channel_scoped() {
        let ble = TransportEndpoint::Ble {
            address: "AA:BB:CC:DD:EE:FF".into(),
            name: "B1-G2026".into(),
        };
        let serial = TransportEndpoint::Serial {
            port: "/dev/ttyUSB0".into(),
        };
        assert_eq!(ble.identity(), "ble:AA:BB:CC:DD:EE:FF");
        assert_eq!(serial.identity(), "serial:/dev/ttyUSB0");
        assert_ne!(ble.identity(), serial.identity());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportKind::Ble.to_string(), "BLE");
        assert_eq!(TransportKind::UsbSerial.to_string(), "USB serial");
        assert_eq!(TransportKind::BluetoothSerial.to_string(), "Bluetooth serial");
    }
}

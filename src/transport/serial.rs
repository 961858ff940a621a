//! # USB Serial Transport
//!
//! The B1 enumerates as a USB serial device (on some units via a generic
//! CH340-style adapter that does not carry the vendor string). Framing is
//! identical to BLE; only the pipe differs.
//!
//! ## Port Auto-Detection
//!
//! 1. Enumerate ports, skipping reserved system ports (motherboard UARTs,
//!    the macOS Bluetooth pseudo-ports).
//! 2. Prefer ports whose product or manufacturer string mentions the
//!    vendor.
//! 3. A single remaining USB serial port is taken as the printer.
//! 4. Otherwise fall back to a fixed ordered candidate list before giving
//!    up. Enumeration can be inconclusive without elevated privileges, so
//!    the candidates are also probed directly.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use tokio::sync::mpsc;

use super::{ConnectError, Connection, SendError, Transport, TransportEndpoint, TransportKind};

/// Baud rate the B1 speaks over USB
pub const BAUD_RATE: u32 = 115_200;

/// Read timeout for the background reader; short so disconnect is prompt
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Ordered fallback candidates when enumeration is inconclusive
const FALLBACK_PORTS: &[&str] = &["/dev/ttyUSB0", "/dev/ttyACM0", "COM3", "COM4"];

/// # USB Serial Transport
///
/// Auto-detects the printer's serial port and drives it at 115200 8N1.
pub struct UsbSerialTransport {
    vendor_token: String,
}

impl UsbSerialTransport {
    /// Create a transport matching port descriptors against `vendor_token`
    /// (matched case-insensitively, e.g. "niimbot").
    pub fn new(vendor_token: impl Into<String>) -> Self {
        Self {
            vendor_token: vendor_token.into().to_lowercase(),
        }
    }
}

/// Check whether a fallback candidate plausibly exists even though
/// enumeration missed it. Device nodes are checked on the filesystem;
/// `COMn` names have no node to check, so they are kept on Windows only.
fn probe_candidate(name: &str) -> bool {
    if name.starts_with("/dev/") {
        std::path::Path::new(name).exists()
    } else {
        cfg!(windows)
    }
}

/// Ports that exist on most machines but can never be the printer.
fn is_reserved_port(name: &str) -> bool {
    // Motherboard UARTs and macOS Bluetooth pseudo-devices
    let stripped = name.strip_prefix("/dev/tty").unwrap_or(name);
    (stripped.len() > 1
        && stripped.starts_with('S')
        && stripped[1..].chars().all(|c| c.is_ascii_digit()))
        || name.contains("Bluetooth-Incoming")
        || name.contains("debug-console")
}

#[async_trait]
impl Transport for UsbSerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::UsbSerial
    }

    /// Enumerate candidate ports. Enumeration is synchronous and fast; the
    /// timeout parameter is not needed here.
    async fn discover(&self, _timeout: Duration) -> Result<Vec<TransportEndpoint>, ConnectError> {
        let ports = serialport::available_ports()
            .map_err(|e| ConnectError::Rejected(format!("port enumeration failed: {}", e)))?;

        let mut vendor_matches = Vec::new();
        let mut usb_ports = Vec::new();

        for port in &ports {
            if is_reserved_port(&port.port_name) {
                continue;
            }
            if let SerialPortType::UsbPort(info) = &port.port_type {
                let descriptor = format!(
                    "{} {}",
                    info.product.as_deref().unwrap_or(""),
                    info.manufacturer.as_deref().unwrap_or("")
                )
                .to_lowercase();

                if descriptor.contains(&self.vendor_token) {
                    vendor_matches.push(port.port_name.clone());
                } else {
                    usb_ports.push(port.port_name.clone());
                }
            }
        }

        let chosen: Vec<String> = if !vendor_matches.is_empty() {
            vendor_matches
        } else if usb_ports.len() == 1 {
            // One USB serial device and nothing claiming to be the vendor:
            // most likely a generic adapter in front of the printer.
            usb_ports
        } else {
            FALLBACK_PORTS
                .iter()
                .filter(|candidate| {
                    ports.iter().any(|p| p.port_name == **candidate)
                        || probe_candidate(candidate)
                })
                .map(|s| s.to_string())
                .collect()
        };

        Ok(chosen
            .into_iter()
            .map(|port| TransportEndpoint::Serial { port })
            .collect())
    }

    async fn connect(
        &self,
        endpoint: &TransportEndpoint,
        timeout: Duration,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let TransportEndpoint::Serial { port } = endpoint else {
            return Err(ConnectError::Rejected(format!(
                "not a serial endpoint: {}",
                endpoint
            )));
        };

        let mut handle = serialport::new(port.as_str(), BAUD_RATE)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|e| map_open_error(port, e))?;

        // Short read timeout from here on so the reader thread can notice
        // shutdown promptly; the connect timeout only governs open().
        let _ = handle.set_timeout(READ_TIMEOUT);

        tracing::info!(port = %port, baud = BAUD_RATE, "serial port opened");

        // Drain anything stale before the handshake
        let _ = handle.clear(serialport::ClearBuffer::All);

        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));

        // Inbound bytes arrive on their own schedule; a reader thread
        // forwards them so the session never blocks on the port.
        let reader = match handle.try_clone() {
            Ok(mut reader_handle) => {
                let stop_flag = Arc::clone(&stop);
                Some(std::thread::spawn(move || {
                    let mut buf = [0u8; 256];
                    while !stop_flag.load(Ordering::Relaxed) {
                        match reader_handle.read(&mut buf) {
                            Ok(0) => {}
                            Ok(n) => {
                                if tx.send(buf[..n].to_vec()).is_err() {
                                    break;
                                }
                            }
                            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                            Err(_) => break,
                        }
                    }
                }))
            }
            Err(e) => {
                tracing::debug!(port = %port, "reader clone unavailable ({}); write-only", e);
                None
            }
        };

        Ok(Box::new(SerialConnection {
            port: handle,
            port_name: port.clone(),
            notifications: Some(rx),
            stop,
            reader,
        }))
    }
}

fn map_open_error(port: &str, error: serialport::Error) -> ConnectError {
    use serialport::ErrorKind;
    match error.kind() {
        ErrorKind::NoDevice => ConnectError::NotFound(format!("{}: {}", port, error)),
        ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
            ConnectError::Busy(format!("{}: {}", port, error))
        }
        _ if error.to_string().to_lowercase().contains("busy") => {
            ConnectError::Busy(format!("{}: {}", port, error))
        }
        _ => ConnectError::Rejected(format!("{}: {}", port, error)),
    }
}

struct SerialConnection {
    port: Box<dyn SerialPort>,
    port_name: String,
    notifications: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
    stop: Arc<AtomicBool>,
    reader: Option<std::thread::JoinHandle<()>>,
}

#[async_trait]
impl Connection for SerialConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        use std::io::Write;
        self.port.write_all(bytes).map_err(|e| match e.kind() {
            std::io::ErrorKind::BrokenPipe | std::io::ErrorKind::NotConnected => {
                SendError::ConnectionLost(format!("{}: {}", self.port_name, e))
            }
            _ => SendError::Write(format!("{}: {}", self.port_name, e)),
        })?;
        self.port
            .flush()
            .map_err(|e| SendError::Write(format!("{}: flush failed: {}", self.port_name, e)))
    }

    fn notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.notifications.take()
    }

    async fn disconnect(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for SerialConnection {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ports_excluded() {
        assert!(is_reserved_port("/dev/ttyS0"));
        assert!(is_reserved_port("/dev/ttyS31"));
        assert!(is_reserved_port("/dev/tty.Bluetooth-Incoming-Port"));
    }

    #[test]
    fn test_usb_ports_not_reserved() {
        assert!(!is_reserved_port("/dev/ttyUSB0"));
        assert!(!is_reserved_port("/dev/ttyACM0"));
        assert!(!is_reserved_port("COM3"));
    }

    #[test]
    fn test_probe_rejects_missing_device_node() {
        assert!(!probe_candidate("/dev/ttyUSB-definitely-not-here"));
    }

    #[test]
    fn test_probe_finds_existing_device_node() {
        // /dev/null is always present; the prefix check is what matters
        assert!(probe_candidate("/dev/null"));
    }

    #[test]
    fn test_probe_keeps_com_names_on_windows_only() {
        assert_eq!(probe_candidate("COM3"), cfg!(windows));
    }

    #[test]
    fn test_fallback_candidates_ordered() {
        // The first candidate is the most common Linux USB adapter node
        assert_eq!(FALLBACK_PORTS[0], "/dev/ttyUSB0");
        assert!(FALLBACK_PORTS.contains(&"COM3"));
    }
}

//! # Bluetooth RFCOMM Transport
//!
//! Classic Bluetooth Serial Port Profile, reached through an RFCOMM device
//! node the OS has already bound (`/dev/rfcommN` on Linux). Pairing and
//! binding are an operator task:
//!
//! ```bash
//! $ bluetoothctl
//! [bluetooth]# scan on
//! # Look for the printer, e.g. "B1-G2026xxxx", note the address
//! [bluetooth]# pair AA:BB:CC:DD:EE:FF
//! $ sudo rfcomm bind 0 AA:BB:CC:DD:EE:FF
//! # Creates /dev/rfcomm0
//! ```
//!
//! ## TTY Configuration
//!
//! The device is opened in raw mode so binary frames pass unmodified:
//! no input processing, no output post-processing, 8-bit characters, no
//! echo, non-canonical. Disabling XON/XOFF matters most here: 0x11 and
//! 0x13 both occur in frame payloads (0x13 is the SetDimensions opcode).
//!
//! ## Chunked Writes
//!
//! Individual frames are small, but writes are still chunked with a short
//! pause so a burst can never outrun the Bluetooth buffer.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{ConnectError, Connection, SendError, Transport, TransportEndpoint, TransportKind};

/// Default RFCOMM device path
pub const DEFAULT_DEVICE: &str = "/dev/rfcomm0";

/// Highest RFCOMM channel number probed during discovery
const MAX_RFCOMM_CHANNEL: u8 = 9;

/// Chunk size for writes (bytes)
const CHUNK_SIZE: usize = 512;

/// Pause between chunks
const CHUNK_DELAY: Duration = Duration::from_millis(2);

/// # RFCOMM Transport
///
/// Discovers bound RFCOMM device nodes and opens them raw.
pub struct RfcommTransport;

impl RfcommTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RfcommTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for RfcommTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::BluetoothSerial
    }

    /// List bound RFCOMM devices. Binding state lives in the kernel, so
    /// this is a filesystem probe rather than a radio scan; the timeout
    /// parameter is not needed.
    async fn discover(&self, _timeout: Duration) -> Result<Vec<TransportEndpoint>, ConnectError> {
        let mut endpoints = Vec::new();

        // /proc/net/rfcomm lists bound channels with their peer address
        if let Ok(contents) = fs::read_to_string("/proc/net/rfcomm") {
            for line in contents.lines() {
                if let Some(dev_name) = line.split(':').next() {
                    let device = format!("/dev/{}", dev_name.trim());
                    if Path::new(&device).exists() {
                        endpoints.push(TransportEndpoint::Rfcomm { device });
                    }
                }
            }
        }

        // Fall back to probing the device nodes directly
        if endpoints.is_empty() {
            for channel in 0..=MAX_RFCOMM_CHANNEL {
                let device = format!("/dev/rfcomm{}", channel);
                if Path::new(&device).exists() {
                    endpoints.push(TransportEndpoint::Rfcomm { device });
                }
            }
        }

        Ok(endpoints)
    }

    async fn connect(
        &self,
        endpoint: &TransportEndpoint,
        _timeout: Duration,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        let TransportEndpoint::Rfcomm { device } = endpoint else {
            return Err(ConnectError::Rejected(format!(
                "not an RFCOMM endpoint: {}",
                endpoint
            )));
        };

        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => {
                    ConnectError::NotFound(format!("{} does not exist", device))
                }
                io::ErrorKind::PermissionDenied => ConnectError::Busy(format!(
                    "{}: permission denied (dialout group or root required)",
                    device
                )),
                _ => ConnectError::Rejected(format!("{}: {}", device, e)),
            })?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            configure_tty_raw(file.as_raw_fd())
                .map_err(|e| ConnectError::Rejected(format!("{}: {}", device, e)))?;
        }

        tracing::info!(device = %device, "RFCOMM device opened");

        Ok(Box::new(RfcommConnection {
            file,
            device: device.clone(),
        }))
    }
}

struct RfcommConnection {
    file: File,
    device: String,
}

#[async_trait]
impl Connection for RfcommConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        for chunk in bytes.chunks(CHUNK_SIZE) {
            self.file.write_all(chunk).map_err(|e| match e.kind() {
                io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected => {
                    SendError::ConnectionLost(format!("{}: {}", self.device, e))
                }
                _ => SendError::Write(format!("{}: {}", self.device, e)),
            })?;
            if bytes.len() > CHUNK_SIZE {
                tokio::time::sleep(CHUNK_DELAY).await;
            }
        }
        self.file
            .flush()
            .map_err(|e| SendError::Write(format!("{}: flush failed: {}", self.device, e)))
    }

    /// RFCOMM is opened write-only; there is no inbound stream.
    fn notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        None
    }

    async fn disconnect(&mut self) {
        let _ = self.file.flush();
    }
}

/// Configure a file descriptor for raw TTY mode.
///
/// Disables all input/output processing so binary data passes through
/// unmodified. IXON/IXOFF/IXANY must go: 0x11 (XON) and 0x13 (XOFF) occur
/// inside frames.
#[cfg(unix)]
fn configure_tty_raw(fd: i32) -> Result<(), io::Error> {
    use std::mem::MaybeUninit;

    let mut termios = MaybeUninit::uninit();
    if unsafe { libc::tcgetattr(fd, termios.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let mut termios = unsafe { termios.assume_init() };

    // Input flags: no break/CR-LF translation, no software flow control
    termios.c_iflag &= !(libc::IGNBRK
        | libc::BRKINT
        | libc::PARMRK
        | libc::ISTRIP
        | libc::INLCR
        | libc::IGNCR
        | libc::ICRNL
        | libc::IXON
        | libc::IXOFF
        | libc::IXANY);

    // Output flags: no post-processing
    termios.c_oflag &= !libc::OPOST;

    // Local flags: no echo, no canonical mode, no signals
    termios.c_lflag &= !(libc::ECHO | libc::ECHONL | libc::ICANON | libc::ISIG | libc::IEXTEN);

    // Control flags: 8-bit characters, no parity
    termios.c_cflag &= !(libc::CSIZE | libc::PARENB);
    termios.c_cflag |= libc::CS8;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &termios) } != 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

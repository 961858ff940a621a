//! # NIIMBOT Protocol Implementation
//!
//! This module implements the framed binary protocol spoken by NIIMBOT B1
//! label printers. The protocol is vendor-undocumented; the framing and
//! opcode table here are the reproducible, end-to-end-tested variant.
//!
//! ## Module Structure
//!
//! - [`packet`]: Wire framing, checksum, decode of inbound frames
//! - [`commands`]: Typed command set and payload encoding
//!
//! ## Usage Example
//!
//! ```
//! use etiqueta::printer::ProtocolOptions;
//! use etiqueta::protocol::commands::Command;
//!
//! let options = ProtocolOptions::default();
//!
//! // Encode the heartbeat that opens every session
//! let frame = Command::Heartbeat.encode(&options).unwrap();
//! assert_eq!(frame, vec![0x55, 0x55, 0xDC, 0x01, 0x01, 0xDC, 0xAA, 0xAA]);
//! ```

pub mod commands;
pub mod packet;

pub use commands::Command;
pub use packet::{FrameError, Packet};

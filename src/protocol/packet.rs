//! # Packet Framing
//!
//! This module implements the wire framing used by NIIMBOT B1 printers.
//!
//! ## Frame Layout
//!
//! ```text
//! ┌──────┬──────┬─────────┬────────┬─────────────┬──────────┬──────┬──────┐
//! │ 0x55 │ 0x55 │ command │ length │   payload   │ checksum │ 0xAA │ 0xAA │
//! └──────┴──────┴─────────┴────────┴─────────────┴──────────┴──────┴──────┘
//!                  1 byte   1 byte   0-255 bytes    1 byte
//! ```
//!
//! ## Checksum
//!
//! XOR of the command byte, the length byte, and every payload byte.
//!
//! ```text
//! checksum = command ^ length ^ payload[0] ^ ... ^ payload[n-1]
//! ```
//!
//! ## Direction Asymmetry
//!
//! Outbound encoding is correctness-critical; a malformed frame produces a
//! malformed label or none at all. Inbound decoding is advisory only: the
//! device does not reliably acknowledge every command, so responses are
//! decoded for diagnostics and never gate outbound progress.

use thiserror::Error;

/// Frame start sentinel (two bytes)
pub const START_MARKER: [u8; 2] = [0x55, 0x55];

/// Frame end sentinel (two bytes)
pub const END_MARKER: [u8; 2] = [0xAA, 0xAA];

/// Maximum payload size; the length field is a single byte
pub const MAX_PAYLOAD: usize = 255;

/// Bytes of framing overhead around the payload:
/// 2 start + command + length + checksum + 2 end.
pub const FRAME_OVERHEAD: usize = 7;

/// Errors produced by frame encoding and decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Payload exceeds the one-byte length field (encode only)
    #[error("payload of {0} bytes exceeds the 255-byte frame limit")]
    PayloadTooLarge(usize),

    /// Frame does not start with 0x55 0x55 or end with 0xAA 0xAA
    #[error("bad frame marker")]
    BadMarker,

    /// Checksum byte does not match the frame contents
    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    ChecksumMismatch { computed: u8, received: u8 },

    /// Frame is shorter than its header claims (or than the minimum frame)
    #[error("truncated frame: {0} bytes")]
    Truncated(usize),
}

/// # Protocol Packet
///
/// A single framed protocol message: an opcode plus its payload. A `Packet`
/// is a pure immutable value; construction validates the payload length and
/// everything else is derived.
///
/// ## Example
///
/// ```
/// use etiqueta::protocol::Packet;
///
/// let packet = Packet::new(0xDC, vec![0x01]).unwrap();
/// assert_eq!(packet.checksum(), 0xDC ^ 0x01 ^ 0x01);
/// assert_eq!(packet.to_bytes(), vec![0x55, 0x55, 0xDC, 0x01, 0x01, 0xDC, 0xAA, 0xAA]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    command: u8,
    payload: Vec<u8>,
}

impl Packet {
    /// Construct a packet, validating the payload length.
    ///
    /// ## Errors
    ///
    /// Returns [`FrameError::PayloadTooLarge`] if the payload exceeds
    /// 255 bytes.
    pub fn new(command: u8, payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLarge(payload.len()));
        }
        Ok(Self { command, payload })
    }

    /// The 8-bit opcode
    #[inline]
    pub fn command(&self) -> u8 {
        self.command
    }

    /// The payload bytes
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// XOR checksum over command, length, and payload
    pub fn checksum(&self) -> u8 {
        let mut sum = self.command ^ self.payload.len() as u8;
        for byte in &self.payload {
            sum ^= byte;
        }
        sum
    }

    /// Encode the packet into its wire frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(self.payload.len() + FRAME_OVERHEAD);
        frame.extend_from_slice(&START_MARKER);
        frame.push(self.command);
        frame.push(self.payload.len() as u8);
        frame.extend_from_slice(&self.payload);
        frame.push(self.checksum());
        frame.extend_from_slice(&END_MARKER);
        frame
    }

    /// Decode a complete wire frame back into a packet.
    ///
    /// Used for inbound notification frames. The frame must be exactly one
    /// complete packet; leading or trailing garbage is a [`FrameError`].
    ///
    /// ## Errors
    ///
    /// - [`FrameError::Truncated`]: frame shorter than the header's claim
    /// - [`FrameError::BadMarker`]: missing start or end sentinel
    /// - [`FrameError::ChecksumMismatch`]: contents do not match the
    ///   checksum byte
    pub fn from_bytes(frame: &[u8]) -> Result<Self, FrameError> {
        if frame.len() < FRAME_OVERHEAD {
            return Err(FrameError::Truncated(frame.len()));
        }
        if frame[0..2] != START_MARKER || frame[frame.len() - 2..] != END_MARKER {
            return Err(FrameError::BadMarker);
        }

        let command = frame[2];
        let length = frame[3] as usize;
        if frame.len() != length + FRAME_OVERHEAD {
            return Err(FrameError::Truncated(frame.len()));
        }

        let payload = frame[4..4 + length].to_vec();
        let received = frame[4 + length];

        let packet = Self { command, payload };
        let computed = packet.checksum();
        if computed != received {
            return Err(FrameError::ChecksumMismatch { computed, received });
        }

        Ok(packet)
    }
}

/// Encode a command + payload straight to wire bytes.
///
/// Convenience for callers that never need the intermediate [`Packet`].
pub fn encode(command: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    Packet::new(command, payload.to_vec()).map(|p| p.to_bytes())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_heartbeat_golden_frame() {
        // Known-good frame captured from the working driver
        let frame = encode(0xDC, &[0x01]).unwrap();
        assert_eq!(frame, vec![0x55, 0x55, 0xDC, 0x01, 0x01, 0xDC, 0xAA, 0xAA]);
    }

    #[test]
    fn test_dimensions_golden_frame() {
        // SetDimensions 240x384: 0x13 with payload 00 F0 01 80
        let frame = encode(0x13, &[0x00, 0xF0, 0x01, 0x80]).unwrap();
        assert_eq!(
            frame,
            vec![0x55, 0x55, 0x13, 0x04, 0x00, 0xF0, 0x01, 0x80, 0x66, 0xAA, 0xAA]
        );
    }

    #[test]
    fn test_empty_payload() {
        let frame = encode(0x40, &[]).unwrap();
        // checksum = 0x40 ^ 0x00
        assert_eq!(frame, vec![0x55, 0x55, 0x40, 0x00, 0x40, 0xAA, 0xAA]);
    }

    #[test]
    fn test_round_trip() {
        for (command, payload) in [
            (0xDCu8, vec![0x01u8]),
            (0x85, vec![0x00, 0x2A, 0x00, 0x00, 0x00, 0x01, 0xFF, 0x00]),
            (0x15, vec![0x00, 0x03]),
            (0x00, vec![]),
            (0xFF, vec![0xFF; 255]),
        ] {
            let packet = Packet::new(command, payload.clone()).unwrap();
            let decoded = Packet::from_bytes(&packet.to_bytes()).unwrap();
            assert_eq!(decoded.command(), command);
            assert_eq!(decoded.payload(), &payload[..]);
        }
    }

    #[test]
    fn test_payload_too_large() {
        let err = encode(0x85, &[0u8; 256]).unwrap_err();
        assert_eq!(err, FrameError::PayloadTooLarge(256));
        // 255 bytes is exactly at the limit
        assert!(encode(0x85, &[0u8; 255]).is_ok());
    }

    #[test]
    fn test_checksum_single_bit_sensitivity() {
        // Flipping any single payload bit must surface as a checksum mismatch
        let payload = vec![0x12, 0x34, 0x56, 0x78];
        let frame = encode(0x85, &payload).unwrap();

        for byte_idx in 0..payload.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[4 + byte_idx] ^= 1 << bit;
                match Packet::from_bytes(&corrupted) {
                    Err(FrameError::ChecksumMismatch { .. }) => {}
                    other => panic!(
                        "byte {} bit {}: expected checksum mismatch, got {:?}",
                        byte_idx, bit, other
                    ),
                }
            }
        }
    }

    #[test]
    fn test_bad_start_marker() {
        let mut frame = encode(0xDC, &[0x01]).unwrap();
        frame[0] = 0x54;
        assert_eq!(Packet::from_bytes(&frame), Err(FrameError::BadMarker));
    }

    #[test]
    fn test_bad_end_marker() {
        let mut frame = encode(0xDC, &[0x01]).unwrap();
        let last = frame.len() - 1;
        frame[last] = 0xAB;
        assert_eq!(Packet::from_bytes(&frame), Err(FrameError::BadMarker));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = encode(0x13, &[0x00, 0xF0, 0x01, 0x80]).unwrap();
        assert_eq!(
            Packet::from_bytes(&frame[..5]),
            Err(FrameError::Truncated(5))
        );
        assert_eq!(Packet::from_bytes(&[]), Err(FrameError::Truncated(0)));
    }

    #[test]
    fn test_length_field_mismatch_is_truncated() {
        // Header claims 4 payload bytes but the frame only carries 2
        let mut frame = vec![0x55, 0x55, 0x13, 0x04, 0x00, 0xF0];
        frame.push(0x13 ^ 0x04 ^ 0xF0);
        frame.extend_from_slice(&[0xAA, 0xAA]);
        assert_eq!(
            Packet::from_bytes(&frame),
            Err(FrameError::Truncated(frame.len()))
        );
    }

    #[test]
    fn test_packet_accessors() {
        let packet = Packet::new(0x21, vec![0x03]).unwrap();
        assert_eq!(packet.command(), 0x21);
        assert_eq!(packet.payload(), &[0x03]);
        assert_eq!(packet.checksum(), 0x21 ^ 0x01 ^ 0x03);
    }
}

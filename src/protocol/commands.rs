//! # NIIMBOT Command Set
//!
//! This module defines the closed set of commands the driver sends, each as
//! a typed variant carrying its own payload. Adding a command is a
//! compile-time-checked enum addition, not a magic byte scattered across
//! call sites.
//!
//! ## Opcode Table
//!
//! | Command       | Opcode | Payload |
//! |---------------|--------|---------|
//! | Heartbeat     | 0xDC   | 0x01 |
//! | SetDensity    | 0x21   | density (1 byte, clamped 1-5) |
//! | SetLabelType  | 0x23   | label type (1 byte) |
//! | PrintStart    | 0x01   | total pages u16 BE + 1 reserved zero |
//! | PageStart     | 0x03   | 0x01 |
//! | SetDimensions | 0x13   | height u16 BE, width u16 BE |
//! | SetQuantity   | 0x15   | quantity u16 BE |
//! | BitmapRow     | 0x85   | row u16 BE, 3 reserved zeros, repeat u8, row bytes |
//! | PageEnd       | 0xE3   | 0x01 |
//! | PrintEnd      | 0xF3   | 0x01 |
//!
//! ## Byte Order
//!
//! Multi-byte integers use **big-endian** encoding: a `u16` value 0x1234 is
//! sent as `[0x12, 0x34]`.
//!
//! ## Firmware Variants
//!
//! Two fields are firmware-sensitive and routed through
//! [`ProtocolOptions`](crate::printer::ProtocolOptions) rather than being
//! hard-coded: the SetDimensions field order, and the three reserved
//! BitmapRow header bytes (always zero on the validated firmware, emitted
//! from a single place here).

use crate::printer::{DimensionOrder, ProtocolOptions};
use crate::raster::RowPacket;

use super::packet::{FrameError, Packet};

// ============================================================================
// OPCODES
// ============================================================================

/// Heartbeat / keep-alive, opens every session
pub const OP_HEARTBEAT: u8 = 0xDC;
/// Print density selector
pub const OP_SET_DENSITY: u8 = 0x21;
/// Label stock type selector
pub const OP_SET_LABEL_TYPE: u8 = 0x23;
/// Begin a print job
pub const OP_PRINT_START: u8 = 0x01;
/// Begin one page within a job
pub const OP_PAGE_START: u8 = 0x03;
/// Negotiate page dimensions
pub const OP_SET_DIMENSIONS: u8 = 0x13;
/// Set copy count
pub const OP_SET_QUANTITY: u8 = 0x15;
/// One packed scan line of image data
pub const OP_BITMAP_ROW: u8 = 0x85;
/// Finish the current page
pub const OP_PAGE_END: u8 = 0xE3;
/// Finish the print job
pub const OP_PRINT_END: u8 = 0xF3;

/// Valid density range
pub const DENSITY_MIN: u8 = 1;
pub const DENSITY_MAX: u8 = 5;

/// Label stock type, one byte on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LabelType {
    /// Die-cut labels separated by a gap (default)
    #[default]
    Gap,
    /// Continuous stock with a printed black mark between labels
    BlackMark,
    /// Continuous stock with no separator
    Continuous,
}

impl LabelType {
    /// Wire encoding of the label type
    #[inline]
    pub fn code(self) -> u8 {
        match self {
            LabelType::Gap => 1,
            LabelType::BlackMark => 2,
            LabelType::Continuous => 3,
        }
    }
}

/// # Protocol Command
///
/// The closed set of outbound commands, in the order a session sends them.
///
/// ## Example
///
/// ```
/// use etiqueta::printer::ProtocolOptions;
/// use etiqueta::protocol::commands::Command;
///
/// let options = ProtocolOptions::default();
/// let frame = Command::SetQuantity(2).encode(&options).unwrap();
/// assert_eq!(frame, vec![0x55, 0x55, 0x15, 0x02, 0x00, 0x02, 0x15 ^ 0x02 ^ 0x02, 0xAA, 0xAA]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Keep-alive; the firmware expects one before any configuration
    Heartbeat,
    /// Print density, clamped to 1-5 on encode
    SetDensity(u8),
    /// Label stock type
    SetLabelType(LabelType),
    /// Begin a job covering `total_pages` pages
    PrintStart { total_pages: u16 },
    /// Begin a page
    PageStart,
    /// Canvas dimensions of the page in dots
    SetDimensions { height: u16, width: u16 },
    /// Number of copies of the page
    SetQuantity(u16),
    /// One run-length-encoded scan line
    BitmapRow(RowPacket),
    /// Finish the page
    PageEnd,
    /// Finish the job
    PrintEnd,
}

impl Command {
    /// The wire opcode for this command
    pub fn opcode(&self) -> u8 {
        match self {
            Command::Heartbeat => OP_HEARTBEAT,
            Command::SetDensity(_) => OP_SET_DENSITY,
            Command::SetLabelType(_) => OP_SET_LABEL_TYPE,
            Command::PrintStart { .. } => OP_PRINT_START,
            Command::PageStart => OP_PAGE_START,
            Command::SetDimensions { .. } => OP_SET_DIMENSIONS,
            Command::SetQuantity(_) => OP_SET_QUANTITY,
            Command::BitmapRow(_) => OP_BITMAP_ROW,
            Command::PageEnd => OP_PAGE_END,
            Command::PrintEnd => OP_PRINT_END,
        }
    }

    /// Build the payload bytes for this command.
    ///
    /// `options` selects the firmware-variant encodings (dimension field
    /// order); everything else is fixed.
    pub fn payload(&self, options: &ProtocolOptions) -> Vec<u8> {
        match self {
            Command::Heartbeat | Command::PageStart | Command::PageEnd | Command::PrintEnd => {
                vec![0x01]
            }
            Command::SetDensity(density) => {
                vec![(*density).clamp(DENSITY_MIN, DENSITY_MAX)]
            }
            Command::SetLabelType(label_type) => vec![label_type.code()],
            Command::PrintStart { total_pages } => {
                let [hi, lo] = u16_be(*total_pages);
                vec![hi, lo, 0x00]
            }
            Command::SetDimensions { height, width } => {
                let (first, second) = match options.dimension_order {
                    DimensionOrder::HeightWidth => (*height, *width),
                    DimensionOrder::WidthHeight => (*width, *height),
                };
                let [a, b] = u16_be(first);
                let [c, d] = u16_be(second);
                vec![a, b, c, d]
            }
            Command::SetQuantity(quantity) => u16_be(*quantity).to_vec(),
            Command::BitmapRow(row) => {
                let mut payload = Vec::with_capacity(6 + row.bytes.len());
                payload.extend_from_slice(&u16_be(row.row));
                // Reserved header bytes, always zero on this firmware
                payload.extend_from_slice(&[0x00, 0x00, 0x00]);
                payload.push(row.repeat);
                payload.extend_from_slice(&row.bytes);
                payload
            }
        }
    }

    /// Encode this command into a complete wire frame.
    ///
    /// ## Errors
    ///
    /// [`FrameError::PayloadTooLarge`] if the payload exceeds 255 bytes.
    /// With the 48-byte native row this cannot happen for well-formed
    /// input, so hitting it mid-stream indicates an encoder defect.
    pub fn encode(&self, options: &ProtocolOptions) -> Result<Vec<u8>, FrameError> {
        Packet::new(self.opcode(), self.payload(options)).map(|p| p.to_bytes())
    }
}

/// Encode a u16 value as big-endian bytes [high, low]
///
/// ## Example
///
/// ```
/// use etiqueta::protocol::commands::u16_be;
///
/// assert_eq!(u16_be(0x1234), [0x12, 0x34]);
/// assert_eq!(u16_be(384), [0x01, 0x80]);
/// ```
#[inline]
pub const fn u16_be(value: u16) -> [u8; 2] {
    [(value >> 8) as u8, value as u8]
}

// ============================================================================
// TESTS
// ============================================================================

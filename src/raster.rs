//! # Raster Encoder
//!
//! Converts a monochrome source bitmap into printer-native row packets.
//!
//! ## Pipeline
//!
//! 1. **Normalize width**: the B1 printhead is 384 dots wide and the
//!    firmware only accepts full-width rows. Narrower sources are centered
//!    on a blank canvas; height is never touched. (Rescaling was tried and
//!    rejected: it distorts QR codes below the scanning threshold.)
//! 2. **Threshold**: grayscale to print/no-print bits per the configured
//!    [`RasterPolarity`]. Under the canonical convention a dark source
//!    pixel becomes a "print" bit.
//! 3. **Pack**: 1 bit per dot, MSB-first, 48 bytes per row.
//!    Bit 7 = leftmost dot, 1 = print.
//! 4. **Run-length compress**: consecutive identical rows collapse into one
//!    [`RowPacket`] with a repeat count of at most 255; longer runs split.
//!
//! ## Round-Trip Guarantee
//!
//! Replaying the packet sequence row by row (expanding repeats) exactly
//! reconstructs the padded canvas. [`expand_rows`] implements the replay and
//! the tests hold the encoder to it.

use image::GrayImage;

use crate::error::EtiquetaError;
use crate::printer::RasterPolarity;

/// Printhead width of the B1 in dots
pub const NATIVE_WIDTH_DOTS: u16 = 384;

/// Bytes per packed row (NATIVE_WIDTH_DOTS / 8)
pub const NATIVE_ROW_BYTES: usize = (NATIVE_WIDTH_DOTS / 8) as usize;

/// Luma threshold separating "print" from "don't print"
const LUMA_THRESHOLD: u8 = 128;

/// One run-length-encoded scan line, ready to wrap in a BitmapRow command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPacket {
    /// Canvas row where this run starts (0-based)
    pub row: u16,
    /// Number of identical rows this packet stands for (1-255)
    pub repeat: u8,
    /// Packed row bits, exactly [`NATIVE_ROW_BYTES`] long
    pub bytes: Vec<u8>,
}

/// # Raster Image
///
/// A bitmap normalized to the printer's native width, one packed bit per
/// dot. This is the only form image data takes past the encoder; the
/// printer never sees any other width.
///
/// ## Example
///
/// ```
/// use etiqueta::printer::RasterPolarity;
/// use etiqueta::raster::{RasterImage, NATIVE_WIDTH_DOTS};
/// use image::GrayImage;
///
/// // 200-dot-wide all-black label, 30 rows tall
/// let source = GrayImage::from_pixel(200, 30, image::Luma([0u8]));
/// let raster = RasterImage::from_gray(&source, RasterPolarity::InvertThenThreshold).unwrap();
///
/// assert_eq!(raster.width(), NATIVE_WIDTH_DOTS);
/// assert_eq!(raster.height(), 30);
/// // 30 identical rows collapse into a single packet
/// assert_eq!(raster.encode_rows().len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    height: u16,
    rows: Vec<Vec<u8>>,
}

impl RasterImage {
    /// Build a raster image from a grayscale source.
    ///
    /// Sources narrower than 384 dots are centered with "don't print"
    /// padding. Height is preserved unchanged.
    ///
    /// ## Errors
    ///
    /// - Source wider than the printhead (the encoder never rescales)
    /// - Zero-sized source
    /// - Height beyond the u16 row index space
    pub fn from_gray(source: &GrayImage, polarity: RasterPolarity) -> Result<Self, EtiquetaError> {
        let (width, height) = source.dimensions();
        if width == 0 || height == 0 {
            return Err(EtiquetaError::Image(format!(
                "source image is empty ({}x{})",
                width, height
            )));
        }
        if width > NATIVE_WIDTH_DOTS as u32 {
            return Err(EtiquetaError::Image(format!(
                "source width {} exceeds the {}-dot printhead; resize upstream, the \
                 encoder does not rescale",
                width, NATIVE_WIDTH_DOTS
            )));
        }
        if height > u16::MAX as u32 {
            return Err(EtiquetaError::Image(format!(
                "source height {} exceeds the row index space",
                height
            )));
        }

        let x_offset = (NATIVE_WIDTH_DOTS as u32 - width) / 2;
        let mut rows = Vec::with_capacity(height as usize);

        for y in 0..height {
            let mut row = vec![0u8; NATIVE_ROW_BYTES];
            for x in 0..width {
                let luma = source.get_pixel(x, y).0[0];
                if prints(luma, polarity) {
                    let dot = x_offset + x;
                    // MSB-first: bit 7 is the leftmost dot of each byte
                    row[(dot / 8) as usize] |= 0x80 >> (dot % 8);
                }
            }
            rows.push(row);
        }

        Ok(Self {
            height: height as u16,
            rows,
        })
    }

    /// Canvas width in dots, always the native printhead width
    #[inline]
    pub fn width(&self) -> u16 {
        NATIVE_WIDTH_DOTS
    }

    /// Canvas height in rows
    #[inline]
    pub fn height(&self) -> u16 {
        self.height
    }

    /// The packed canvas rows, top to bottom
    #[inline]
    pub fn rows(&self) -> &[Vec<u8>] {
        &self.rows
    }

    /// Run-length encode the canvas into ordered row packets.
    ///
    /// Consecutive identical rows collapse into one packet; runs longer
    /// than 255 rows split. Packet indices are the canvas row where each
    /// run starts, so for consecutive packets
    /// `next.row == prev.row + prev.repeat` and the first packet starts
    /// at row 0.
    pub fn encode_rows(&self) -> Vec<RowPacket> {
        let mut packets = Vec::new();
        let mut y = 0usize;

        while y < self.rows.len() {
            let mut run = 1usize;
            while y + run < self.rows.len()
                && run < u8::MAX as usize
                && self.rows[y + run] == self.rows[y]
            {
                run += 1;
            }

            packets.push(RowPacket {
                row: y as u16,
                repeat: run as u8,
                bytes: self.rows[y].clone(),
            });
            y += run;
        }

        packets
    }
}

/// Replay a packet sequence into the flat row list it encodes.
///
/// Inverse of [`RasterImage::encode_rows`]; the round-trip tests and the
/// preview path use it to reconstruct the canvas.
pub fn expand_rows(packets: &[RowPacket]) -> Vec<Vec<u8>> {
    let mut rows = Vec::new();
    for packet in packets {
        for _ in 0..packet.repeat {
            rows.push(packet.bytes.clone());
        }
    }
    rows
}

/// Decide whether a source luma value burns a dot.
#[inline]
fn prints(luma: u8, polarity: RasterPolarity) -> bool {
    match polarity {
        // Photometric inversion then threshold: 255 - luma >= 128
        RasterPolarity::InvertThenThreshold => luma < LUMA_THRESHOLD,
        RasterPolarity::DirectThreshold => luma >= LUMA_THRESHOLD,
    }
}

// ============================================================================
// TESTS
// ============================================================================

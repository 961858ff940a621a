//! # Printer Configuration
//!
//! This module defines hardware specifications for supported NIIMBOT label
//! printers, plus the small set of protocol knobs that are known to vary
//! between firmware revisions of the same printer family.
//!
//! ## Supported Printers
//!
//! | Model | Printhead (dots) | Resolution | Density |
//! |-------|------------------|------------|---------|
//! | B1    | 384              | 203 DPI    | 1-5     |
//!
//! ## Usage
//!
//! ```
//! use etiqueta::printer::PrinterConfig;
//!
//! let config = PrinterConfig::B1;
//! println!("Print width: {} dots ({} bytes/row)",
//!          config.width_dots,
//!          config.width_bytes);
//! ```

/// # Printer Configuration
///
/// Defines the hardware characteristics of a NIIMBOT thermal label printer.
///
/// ## Physical Properties
///
/// - **width_dots**: Printhead width in dots. Every bitmap row sent to the
///   printer is exactly this wide; narrower images are centered with
///   "don't print" padding by the raster encoder, never rescaled.
/// - **width_bytes**: Row size in bytes (width_dots / 8)
/// - **dpi**: Resolution in dots per inch
///
/// ## Discovery
///
/// - **name_token**: Substring matched against advertised BLE names and
///   serial port descriptors when scanning for the printer
#[derive(Debug, Clone, Copy)]
pub struct PrinterConfig {
    /// Printer model name
    pub name: &'static str,

    /// Printhead width in dots (pixels)
    pub width_dots: u16,

    /// Row width in bytes (width_dots / 8)
    pub width_bytes: u16,

    /// Resolution in dots per inch
    pub dpi: u16,

    /// Substring used to recognize the device during discovery
    pub name_token: &'static str,

    /// Default print density (valid range 1-5)
    pub default_density: u8,
}

impl PrinterConfig {
    /// # NIIMBOT B1 Configuration
    ///
    /// 50mm label printer with a 384-dot printhead.
    ///
    /// | Property | Value |
    /// |----------|-------|
    /// | Print width | 48mm (384 dots) |
    /// | Resolution | 203 DPI |
    /// | Interface | BLE / USB serial / Bluetooth SPP |
    /// | Density | 1-5, default 3 |
    pub const B1: Self = Self {
        name: "NIIMBOT B1",
        width_dots: 384,
        width_bytes: 48,
        dpi: 203,
        name_token: "B1",
        default_density: 3,
    };

    /// Calculate dots per millimeter
    #[inline]
    pub fn dots_per_mm(&self) -> f32 {
        self.dpi as f32 / 25.4
    }

    /// Calculate print width in millimeters
    #[inline]
    pub fn width_mm(&self) -> f32 {
        self.width_dots as f32 / self.dots_per_mm()
    }
}

/// Field order of the SetDimensions payload.
///
/// This is the most error-prone field in the whole protocol: different
/// reference clients for the same firmware family disagree on it, and a
/// swapped order produces labels printed only along one edge. The canonical
/// order for the B1 is height-then-width, but it is kept selectable so a
/// unit that wants the opposite can be driven without a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DimensionOrder {
    /// Height u16 BE, then width u16 BE (canonical for B1)
    #[default]
    HeightWidth,
    /// Width u16 BE, then height u16 BE
    WidthHeight,
}

/// Pixel polarity convention used when converting grayscale to print bits.
///
/// The B1 firmware generation this crate was validated against expects the
/// image data inverted before thresholding; a dark source pixel becomes a
/// "print" bit. Some firmware revisions reportedly want the direct
/// convention instead, so both are exposed by name. Validate against the
/// physical unit before changing this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RasterPolarity {
    /// Photometric inversion, then threshold at 128: a pixel prints when
    /// its source luma is <= 127 (canonical for B1)
    #[default]
    InvertThenThreshold,
    /// Direct threshold at 128: a pixel prints when its source luma is >= 128
    DirectThreshold,
}

/// Firmware-variant protocol options.
///
/// The defaults are the internally-consistent, end-to-end-tested variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolOptions {
    /// SetDimensions field order
    pub dimension_order: DimensionOrder,
    /// Grayscale-to-bit conversion convention
    pub polarity: RasterPolarity,
}

//! # Etiqueta - NIIMBOT Label Printer Library
//!
//! Etiqueta is a Rust library for printing on NIIMBOT B1 thermal label
//! printers over BLE, USB serial, or Bluetooth SPP. It provides:
//!
//! - **Protocol implementation**: NIIMBOT packet framing and command builders
//! - **Raster encoding**: printhead-width normalization, MSB-first bit
//!   packing, and row run-length compression
//! - **Transports**: BLE GATT, USB serial, and RFCOMM backends behind one
//!   async trait
//! - **Orchestration**: transport fallback, per-device locking, timeouts,
//!   and cancellation with structured outcomes
//!
//! ## Quick Start
//!
//! ```no_run
//! use etiqueta::{
//!     job::{Orchestrator, PrintJob},
//!     printer::PrinterConfig,
//!     raster::RasterImage,
//!     transport::{BleTransport, UsbSerialTransport},
//! };
//!
//! # async fn example() -> Result<(), etiqueta::error::EtiquetaError> {
//! // Load and normalize the label image
//! let decoded = image::open("label.png")
//!     .map_err(|e| etiqueta::error::EtiquetaError::Image(e.to_string()))?;
//! let raster = RasterImage::from_gray(&decoded.to_luma8(), Default::default())?;
//!
//! // Try BLE first, then fall back to USB serial
//! let orchestrator = Orchestrator::new(vec![
//!     Box::new(BleTransport::new(PrinterConfig::B1.name_token)),
//!     Box::new(UsbSerialTransport::new("niimbot")),
//! ]);
//!
//! let outcome = orchestrator.print(&PrintJob::new(raster, 1)).await;
//! println!("{}", outcome.summary());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Overview
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`protocol`] | Packet framing and command builders |
//! | [`raster`] | Image-to-bitmap conversion and row compression |
//! | [`transport`] | Communication backends |
//! | [`session`] | The timed print sequence over one connection |
//! | [`job`] | Jobs, outcomes, and the transport-fallback orchestrator |
//! | [`server`] | HTTP print service |
//! | [`printer`] | Printer configurations and protocol variants |
//! | [`error`] | Error types |
//!
//! ## Supported Printers
//!
//! Currently tested with:
//! - NIIMBOT B1 (50mm labels, 384-dot printhead, 203 DPI)
//!
//! Other NIIMBOT printers in the same firmware family should work with
//! appropriate configuration adjustments.

pub mod error;
pub mod job;
pub mod printer;
pub mod protocol;
pub mod raster;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use error::EtiquetaError;
pub use job::{Orchestrator, PrintJob, PrintOutcome};
pub use printer::{PrinterConfig, ProtocolOptions};
pub use raster::RasterImage;
pub use session::PrintSession;

//! # Printer Module
//!
//! This module provides printer-specific configurations.
//!
//! ## Modules
//!
//! - [`config`]: Printer hardware specifications and protocol options

pub mod config;

pub use config::{DimensionOrder, PrinterConfig, ProtocolOptions, RasterPolarity};

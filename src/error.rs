//! # Error Types
//!
//! This module defines the top-level error type used throughout the etiqueta
//! library. It mirrors the failure taxonomy operators actually care about:
//! "no printer found" is a different problem from "wrong port" which is a
//! different problem from "the image is bad."
//!
//! Lower layers define their own focused error enums
//! ([`FrameError`](crate::protocol::packet::FrameError),
//! [`ConnectError`](crate::transport::ConnectError),
//! [`SendError`](crate::transport::SendError)) and convert upward.

use thiserror::Error;

/// Main error type for etiqueta operations
#[derive(Debug, Error)]
pub enum EtiquetaError {
    /// No matching printer was found within the scan timeout (retryable)
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// A device was found but connecting to it failed (retryable on
    /// a different transport)
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Write/read failure on an established connection (aborts the
    /// current session)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Protocol encoding failure: payload too large, malformed dimensions.
    /// Indicates a caller defect, never retried.
    #[error("Protocol encoding error: {0}")]
    Encoding(String),

    /// Another job currently owns the target printer
    #[error("Printer busy: {0}")]
    Busy(String),

    /// Source image processing error
    #[error("Image error: {0}")]
    Image(String),

    /// I/O error wrapper
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error types for mandiag.
//!
//! Only structural failures are errors. A device answering with an
//! unexpected status, a scan that finds nothing and a failed validation are
//! reported as `None` / `false` results instead.

use std::io;
use thiserror::Error;

/// Result type for mandiag operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for mandiag operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, socket).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The connection could not be opened after all configured attempts.
    #[error("Could not connect to {port} after {attempts} attempt(s): {reason}")]
    Connection {
        /// Port name or interface that failed to open.
        port: String,
        /// Number of attempts made.
        attempts: u32,
        /// Last failure reported by the driver.
        reason: String,
    },

    /// Writing to the connection failed (closed port or driver error).
    #[error("Write failed: {0}")]
    Write(String),

    /// A response line could not be split into the expected fields.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A regular-expression scan pattern did not compile.
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Hex text that could not be tokenized into bytes.
    #[error("Invalid hex: {0}")]
    InvalidHex(String),

    /// CAN bus failure (open, send, receive).
    #[error("CAN error: {0}")]
    Can(String),

    /// A CAN frame that violates the 29-bit ID / 8-byte payload limits.
    #[error("Invalid CAN frame: {0}")]
    InvalidCanFrame(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

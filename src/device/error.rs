//! Device-level error types.
//!
//! Errors raised by the device abstraction, separate from the engine's
//! open/send surface so each layer reports in its own terms.

use thiserror::Error;

/// Errors that can occur during serial device operations.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The specified serial device was not found, or is held exclusively
    /// by another process.
    #[error("serial device unavailable: {0}")]
    Unavailable(String),

    /// An I/O error occurred while talking to the device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The line configuration was rejected by the driver.
    #[error("configuration error: {0}")]
    Config(String),

    /// Operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// A driver-specific error occurred.
    #[error("serial driver error: {0}")]
    Serial(#[from] serialport::Error),
}

impl DeviceError {
    /// Create an Unavailable error from a device name.
    pub fn unavailable(name: impl Into<String>) -> Self {
        Self::Unavailable(name.into())
    }

    /// Create a Config error from a message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error is a benign "nothing arrived yet" condition
    /// rather than a device failure.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

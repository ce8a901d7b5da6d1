//! Core trait and line-settings types for the device abstraction.
//!
//! Defines the `SerialDevice` trait that allows both real serial ports and
//! mock implementations to be driven interchangeably by the engine.

use super::error::DeviceError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Baud rate used when the caller leaves the rate unspecified.
pub const DEFAULT_BAUD: u32 = 9600;

/// Framing parameters for a serial line.
///
/// Every field is optional: `None` means "leave the driver's current
/// default untouched", matching the transport's open contract where only
/// explicitly supplied values are applied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    /// Baud rate (bits per second).
    pub baud: Option<u32>,

    /// Number of data bits per character.
    pub data_bits: Option<DataBits>,

    /// Parity checking mode.
    pub parity: Option<Parity>,

    /// Number of stop bits.
    pub stop_bits: Option<StopBits>,
}

impl LineSettings {
    /// Settings with every field left at the driver default.
    pub fn driver_defaults() -> Self {
        Self::default()
    }
}

/// Number of data bits per character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl TryFrom<u8> for DataBits {
    type Error = DeviceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(Self::Five),
            6 => Ok(Self::Six),
            7 => Ok(Self::Seven),
            8 => Ok(Self::Eight),
            other => Err(DeviceError::config(format!(
                "data bits must be 5-8, got {other}"
            ))),
        }
    }
}

/// Parity checking modes.
///
/// `Mark` and `Space` are accepted by the parser for compatibility with
/// legacy command lines, but the driver layer rejects them at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl Parity {
    /// Map to the driver's parity type, if it supports this mode.
    pub fn to_driver(self) -> Result<serialport::Parity, DeviceError> {
        match self {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Even => Ok(serialport::Parity::Even),
            Parity::Mark | Parity::Space => Err(DeviceError::config(format!(
                "parity mode '{self}' is not supported by the driver"
            ))),
        }
    }
}

impl std::fmt::Display for Parity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Parity::None => "none",
            Parity::Odd => "odd",
            Parity::Even => "even",
            Parity::Mark => "mark",
            Parity::Space => "space",
        };
        f.write_str(s)
    }
}

impl FromStr for Parity {
    type Err = DeviceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "odd" => Ok(Self::Odd),
            "even" => Ok(Self::Even),
            "mark" => Ok(Self::Mark),
            "space" => Ok(Self::Space),
            other => Err(DeviceError::config(format!(
                "parity must be none|even|odd|mark|space, got '{other}'"
            ))),
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl TryFrom<u8> for StopBits {
    type Error = DeviceError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(DeviceError::config(format!(
                "stop bits must be 1 or 2, got {other}"
            ))),
        }
    }
}

/// Trait for the duplex byte-stream endpoint owned by the engine.
///
/// Abstracts over synchronous serial operations so both real hardware and
/// in-memory mock devices can sit under the transport engine.
pub trait SerialDevice: Send + std::fmt::Debug {
    /// Submit bytes to the device.
    ///
    /// Returns the number of bytes actually accepted, which may be fewer
    /// than submitted; the engine treats the shortfall as a pending write.
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, DeviceError>;

    /// Read bytes from the device into the provided buffer.
    ///
    /// Returns the number of bytes actually read. A timeout surfaces as a
    /// `DeviceError` for which [`DeviceError::is_timeout`] is true.
    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, DeviceError>;

    /// Number of bytes currently buffered by the driver and ready to read.
    fn bytes_to_read(&self) -> Result<usize, DeviceError>;

    /// Discard any unread inbound data and any unsent outbound data.
    fn clear_buffers(&mut self) -> Result<(), DeviceError>;

    /// Set the blocking timeout for reads and writes.
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), DeviceError>;

    /// Obtain a second handle to the same device.
    ///
    /// Used in polling mode, where a dedicated reader thread and the
    /// engine thread each need their own handle.
    fn try_clone(&self) -> Result<Box<dyn SerialDevice>, DeviceError>;

    /// The name/path of this device.
    fn name(&self) -> &str;
}

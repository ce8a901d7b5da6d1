//! Real serial device backed by the `serialport` crate.
//!
//! Applies the transport's fixed flow-control policy at open time and
//! purges stale bytes in both directions before handing the device to the
//! engine.

use super::error::DeviceError;
use super::traits::{LineSettings, SerialDevice, DEFAULT_BAUD};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

/// A system serial port wrapping `serialport::SerialPort`.
pub struct SystemDevice {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SystemDevice {
    /// Open and configure a serial device.
    ///
    /// Only settings the caller supplied are applied over the driver
    /// defaults. Hardware flow control (output gated on clear-to-send)
    /// is always enabled and software XON/XOFF always disabled; the
    /// policy is fixed because the transport's buffering assumes the
    /// device driver paces transmission itself.
    pub fn open(
        port_name: &str,
        settings: &LineSettings,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let mut builder = serialport::new(port_name, settings.baud.unwrap_or(DEFAULT_BAUD))
            .flow_control(serialport::FlowControl::Hardware)
            .timeout(timeout);

        if let Some(bits) = settings.data_bits {
            builder = builder.data_bits(bits.into());
        }
        if let Some(parity) = settings.parity {
            builder = builder.parity(parity.to_driver()?);
        }
        if let Some(bits) = settings.stop_bits {
            builder = builder.stop_bits(bits.into());
        }

        let port = builder.open().map_err(|e| match e.kind() {
            serialport::ErrorKind::NoDevice => DeviceError::unavailable(port_name),
            serialport::ErrorKind::InvalidInput => DeviceError::config(e.to_string()),
            _ => DeviceError::Serial(e),
        })?;

        debug!(port = port_name, baud = ?settings.baud, "serial device opened");
        Ok(Self {
            port,
            name: port_name.to_string(),
        })
    }
}

impl SerialDevice for SystemDevice {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        self.port.write(data).map_err(DeviceError::Io)
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, DeviceError> {
        self.port.read(buffer).map_err(DeviceError::Io)
    }

    fn bytes_to_read(&self) -> Result<usize, DeviceError> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(DeviceError::Serial)
    }

    fn clear_buffers(&mut self) -> Result<(), DeviceError> {
        self.port
            .clear(serialport::ClearBuffer::All)
            .map_err(DeviceError::Serial)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), DeviceError> {
        self.port.set_timeout(timeout).map_err(DeviceError::Serial)
    }

    fn try_clone(&self) -> Result<Box<dyn SerialDevice>, DeviceError> {
        let port = self.port.try_clone().map_err(DeviceError::Serial)?;
        Ok(Box::new(Self {
            port,
            name: self.name.clone(),
        }))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for SystemDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDevice")
            .field("name", &self.name)
            .field("baud_rate", &self.port.baud_rate().ok())
            .finish()
    }
}

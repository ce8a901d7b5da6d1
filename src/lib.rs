//! uart-comm library
//!
//! A line-based UART transport: open a serial device with configurable
//! framing parameters, stream inbound bytes to a consumer sink, and
//! accept outbound bytes from any thread while coalescing them for
//! transmission. A framed command bridge exposes the same transport over
//! a parent/child byte pipe.
//!
//! # Modules
//!
//! - `device`: serial device abstraction (real hardware and mocks)
//! - `engine`: the per-connection transport engine
//! - `bridge`: length-prefixed command framing for subprocess use
//! - `display`: byte rendering helpers for the interactive CLI

pub mod bridge;
pub mod device;
pub mod display;
pub mod engine;

// Re-export commonly used types for convenience
pub use device::{
    DataBits, DeviceError, LineSettings, MockDevice, Parity, SerialDevice, StopBits, SystemDevice,
};
pub use engine::{
    CloseReason, CloseSink, Connection, OpenError, OverflowPolicy, ReadSink, ReceiveMode,
    SendError, ShutdownTrigger, TransportConfig,
};

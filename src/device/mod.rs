//! Device abstraction layer.
//!
//! Provides the `SerialDevice` trait and implementations for real serial
//! hardware and in-memory mocks, enabling dependency injection and
//! hardware-free testing of the transport engine.

pub mod error;
pub mod mock;
pub mod system;
pub mod traits;

pub use error::DeviceError;
pub use mock::MockDevice;
pub use system::SystemDevice;
pub use traits::*;

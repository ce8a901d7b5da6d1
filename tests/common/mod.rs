//! Shared test utilities for uart-comm integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uart_comm::{
    CloseReason, Connection, MockDevice, ReceiveMode, SerialDevice, TransportConfig,
};

/// Observation points for one connection under test: every read-sink
/// delivery as a distinct chunk, and every close notification.
#[derive(Clone, Default)]
pub struct Probe {
    reads: Arc<Mutex<Vec<Vec<u8>>>>,
    closes: Arc<Mutex<Vec<CloseReason>>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliveries in arrival order, one entry per sink invocation.
    pub fn chunks(&self) -> Vec<Vec<u8>> {
        self.reads.lock().clone()
    }

    /// All delivered bytes concatenated in arrival order.
    pub fn bytes(&self) -> Vec<u8> {
        self.reads.lock().concat()
    }

    pub fn close_reasons(&self) -> Vec<CloseReason> {
        self.closes.lock().clone()
    }

    fn read_sink(&self) -> impl FnMut(&[u8]) + Send {
        let reads = Arc::clone(&self.reads);
        move |bytes: &[u8]| reads.lock().push(bytes.to_vec())
    }

    fn close_sink(&self) -> impl FnMut(CloseReason) + Send {
        let closes = Arc::clone(&self.closes);
        move |reason| closes.lock().push(reason)
    }
}

/// A config with short ticks so tests settle quickly.
pub fn fast_config() -> TransportConfig {
    TransportConfig {
        event_poll_interval_ms: 1,
        poll_interval_ms: 1,
        poll_read_timeout_ms: 20,
        shutdown_wait_ms: 2_000,
        ..TransportConfig::default()
    }
}

/// Open a connection over `device` wired to a fresh [`Probe`].
pub fn open_probed(
    device: &MockDevice,
    mode: ReceiveMode,
    config: TransportConfig,
) -> (Connection, Probe) {
    let probe = Probe::new();
    let conn = Connection::open(
        device.try_clone().expect("mock clone"),
        mode,
        config,
        probe.read_sink(),
        probe.close_sink(),
    )
    .expect("open mock connection");
    (conn, probe)
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

/// Default settling timeout for engine-driven effects.
pub fn settle() -> Duration {
    Duration::from_secs(2)
}

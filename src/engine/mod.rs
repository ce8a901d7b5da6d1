//! The asynchronous transport engine.
//!
//! One engine thread per connection owns the device handle, drains the
//! receive path into the caller's read sink, coalesces outbound bytes
//! through a bounded transmit buffer, and performs orderly shutdown.
//! Producers call [`Connection::send`] from any thread; it appends under
//! a mutex and signals the engine, never blocking on device I/O.

mod receive;
mod signals;
mod txbuf;
mod worker;

pub use txbuf::AppendOutcome;

use crate::device::{DeviceError, LineSettings, SerialDevice, SystemDevice};
use parking_lot::Mutex;
use receive::{EventDrivenReceiver, PollingReceiver};
use serde::{Deserialize, Serialize};
use signals::{ExitGate, SignalSet, SHUTDOWN, WRITE_SIGNAL};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use txbuf::TransmitBuffer;
use worker::EngineState;

/// Default transmit buffer capacity (10 KiB).
pub const DEFAULT_TX_CAPACITY: usize = 10 * 1024;
/// Default receive scratch buffer capacity (2 KiB).
pub const DEFAULT_RX_SCRATCH_CAPACITY: usize = 2 * 1024;
/// Default engine tick while waiting for readiness, in milliseconds.
pub const DEFAULT_EVENT_POLL_INTERVAL_MS: u64 = 5;
/// Default retry sleep for the polling reader, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
/// Default blocking-read timeout handed to the device, in milliseconds.
pub const DEFAULT_POLL_READ_TIMEOUT_MS: u64 = 200;
/// Default bound on waiting for the engine thread to exit, in milliseconds.
pub const DEFAULT_SHUTDOWN_WAIT_MS: u64 = 1000;

/// How the receive path is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiveMode {
    /// The engine thread drains the driver queue on readiness.
    EventDriven,
    /// A dedicated thread performs blocking single-byte reads in a loop.
    Polling,
}

/// What to do when a `send` would overflow the transmit buffer.
///
/// The historical behavior drops the submission and logs; surfacing the
/// backlog to the producer is available as an opt-in policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the overflowing submission, log at warn, report success.
    #[default]
    DropSilently,
    /// Return [`SendError::Backlog`] to the producer.
    Surface,
}

/// Tunables for a connection, fixed at open time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Transmit buffer capacity in bytes.
    pub tx_capacity: usize,
    /// Receive scratch buffer capacity in bytes.
    pub rx_scratch_capacity: usize,
    /// Engine wait tick in event-driven mode, in milliseconds.
    pub event_poll_interval_ms: u64,
    /// Retry sleep after an empty polling read, in milliseconds. A
    /// latency/CPU trade-off, not a correctness requirement.
    pub poll_interval_ms: u64,
    /// Blocking-read timeout for the device, in milliseconds.
    pub poll_read_timeout_ms: u64,
    /// How long `shutdown` waits for the engine thread, in milliseconds.
    pub shutdown_wait_ms: u64,
    /// Overflow handling for `send`.
    pub overflow_policy: OverflowPolicy,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tx_capacity: DEFAULT_TX_CAPACITY,
            rx_scratch_capacity: DEFAULT_RX_SCRATCH_CAPACITY,
            event_poll_interval_ms: DEFAULT_EVENT_POLL_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_read_timeout_ms: DEFAULT_POLL_READ_TIMEOUT_MS,
            shutdown_wait_ms: DEFAULT_SHUTDOWN_WAIT_MS,
            overflow_policy: OverflowPolicy::default(),
        }
    }
}

impl TransportConfig {
    pub fn event_poll_interval(&self) -> Duration {
        Duration::from_millis(self.event_poll_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_read_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_read_timeout_ms)
    }

    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_wait_ms)
    }
}

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloseReason {
    /// Orderly shutdown requested by the caller.
    Shutdown,
    /// An unrecoverable device error ended the session.
    Error,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Shutdown => f.write_str("shutdown"),
            Self::Error => f.write_str("error"),
        }
    }
}

/// Consumer of received bytes, invoked synchronously from the thread
/// that produced the data. Invocations are never concurrent; the byte
/// slice is only valid for the duration of the call.
pub trait ReadSink: Send {
    fn on_read(&mut self, bytes: &[u8]);
}

impl<F> ReadSink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn on_read(&mut self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Notified exactly once when the connection ends, after the device
/// handle has been released.
pub trait CloseSink: Send {
    fn on_close(&mut self, reason: CloseReason);
}

impl<F> CloseSink for F
where
    F: FnMut(CloseReason) + Send,
{
    fn on_close(&mut self, reason: CloseReason) {
        self(reason)
    }
}

/// Errors surfaced by [`Connection::open`].
#[derive(Debug, Error)]
pub enum OpenError {
    /// The device does not exist or is exclusively held elsewhere.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The line configuration was malformed or rejected by the driver.
    #[error("line configuration rejected: {0}")]
    Config(String),

    /// Worker threads could not be started.
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<DeviceError> for OpenError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::Config(msg) => Self::Config(msg),
            other => Self::DeviceUnavailable(other.to_string()),
        }
    }
}

/// Errors surfaced by [`Connection::send`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The submission would overflow the transmit buffer and the
    /// connection's policy is [`OverflowPolicy::Surface`].
    #[error("transmit backlog: {dropped} bytes dropped")]
    Backlog { dropped: usize },
}

/// Requests shutdown of a connection without joining its threads.
///
/// `Clone + Send`, intended to be captured by interrupt handlers in
/// place of a process-wide connection static.
#[derive(Clone)]
pub struct ShutdownTrigger {
    signals: Arc<SignalSet>,
    poll_stop: Arc<AtomicBool>,
}

impl ShutdownTrigger {
    /// Signal the engine to shut down. Safe to call repeatedly.
    pub fn request(&self) {
        self.poll_stop.store(true, Ordering::Relaxed);
        self.signals.raise(SHUTDOWN);
    }
}

/// A live transport session over one serial device.
///
/// Created by [`Connection::open`]; not reusable after shutdown — a
/// fresh open creates a new instance.
pub struct Connection {
    name: String,
    signals: Arc<SignalSet>,
    tx: Arc<Mutex<TransmitBuffer>>,
    overflow_policy: OverflowPolicy,
    shutdown_wait: Duration,
    exit_gate: Arc<ExitGate>,
    poll_stop: Arc<AtomicBool>,
    engine: Mutex<Option<JoinHandle<()>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Connection {
    /// Open a transport session over an already-constructed device.
    ///
    /// Purges stale bytes in both directions, applies the timeout policy
    /// for `mode`, and starts the engine thread (plus the dedicated
    /// reader thread in polling mode). The close sink only becomes
    /// active on success; failures here never invoke it.
    pub fn open<R, C>(
        mut device: Box<dyn SerialDevice>,
        mode: ReceiveMode,
        config: TransportConfig,
        read: R,
        close: C,
    ) -> Result<Self, OpenError>
    where
        R: ReadSink + 'static,
        C: CloseSink + 'static,
    {
        device.clear_buffers()?;
        device.set_timeout(config.poll_read_timeout())?;
        let name = device.name().to_string();

        let signals = Arc::new(SignalSet::new());
        let tx = Arc::new(Mutex::new(TransmitBuffer::new(config.tx_capacity)));
        let exit_gate = Arc::new(ExitGate::new());
        let poll_stop = Arc::new(AtomicBool::new(false));
        let read_sink: Box<dyn ReadSink> = Box::new(read);

        let (receiver, poller) = match mode {
            ReceiveMode::EventDriven => (
                Some(EventDrivenReceiver::new(
                    config.rx_scratch_capacity,
                    read_sink,
                )),
                None,
            ),
            ReceiveMode::Polling => {
                let mut reader = device.try_clone()?;
                reader.set_timeout(config.poll_read_timeout())?;
                let receiver = PollingReceiver::new(
                    reader,
                    read_sink,
                    config.rx_scratch_capacity,
                    Arc::clone(&poll_stop),
                    Arc::clone(&signals),
                    config.poll_interval(),
                );
                let handle = thread::Builder::new()
                    .name(format!("uart-poll-{name}"))
                    .spawn(move || receiver.run())?;
                (None, Some(handle))
            }
        };

        let state = EngineState {
            device,
            signals: Arc::clone(&signals),
            tx: Arc::clone(&tx),
            receiver,
            mode,
            tick: config.event_poll_interval(),
            staging: Vec::new(),
            staged_at: 0,
            write_pending: false,
            poll_stop: Arc::clone(&poll_stop),
        };

        let close_sink: Box<dyn CloseSink> = Box::new(close);
        let gate = Arc::clone(&exit_gate);
        let engine = thread::Builder::new()
            .name(format!("uart-engine-{name}"))
            .spawn(move || {
                state.run(close_sink);
                gate.open();
            })
            .map_err(|e| {
                poll_stop.store(true, Ordering::Relaxed);
                e
            })?;

        debug!(device = %name, ?mode, "connection opened");
        Ok(Self {
            name,
            signals,
            tx,
            overflow_policy: config.overflow_policy,
            shutdown_wait: config.shutdown_wait(),
            exit_gate,
            poll_stop,
            engine: Mutex::new(Some(engine)),
            poller: Mutex::new(poller),
        })
    }

    /// Open and configure a system serial port, then start the engine.
    pub fn open_port<R, C>(
        port: &str,
        settings: &LineSettings,
        mode: ReceiveMode,
        config: TransportConfig,
        read: R,
        close: C,
    ) -> Result<Self, OpenError>
    where
        R: ReadSink + 'static,
        C: CloseSink + 'static,
    {
        let device = SystemDevice::open(port, settings, config.poll_read_timeout())?;
        Self::open(Box::new(device), mode, config, read, close)
    }

    /// Queue bytes for transmission. Callable from any thread; never
    /// blocks beyond the buffer mutex and never performs device I/O.
    ///
    /// An empty submission is an accepted no-op. Bytes from separate
    /// `send` calls may be coalesced into one device write, in call
    /// order.
    pub fn send(&self, bytes: &[u8]) -> Result<(), SendError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let outcome = self.tx.lock().append(bytes);
        self.signals.raise(WRITE_SIGNAL);
        match outcome {
            AppendOutcome::Accepted => Ok(()),
            AppendOutcome::Overflow { dropped } => match self.overflow_policy {
                OverflowPolicy::DropSilently => Ok(()),
                OverflowPolicy::Surface => Err(SendError::Backlog { dropped }),
            },
        }
    }

    /// Request shutdown and wait (bounded) for the engine thread to exit.
    ///
    /// Idempotent from the caller's perspective; the close sink fires at
    /// most once regardless. A timeout is logged, not an error.
    pub fn shutdown(&self) {
        self.poll_stop.store(true, Ordering::Relaxed);
        self.signals.raise(SHUTDOWN);

        let engine = self.engine.lock().take();
        if let Some(handle) = engine {
            if self.exit_gate.wait(self.shutdown_wait) {
                let _ = handle.join();
                if let Some(poller) = self.poller.lock().take() {
                    let _ = poller.join();
                }
            } else {
                warn!(
                    device = %self.name,
                    timeout = ?self.shutdown_wait,
                    "engine thread did not exit in time, detaching"
                );
            }
        }
    }

    /// A handle that requests shutdown without joining, for use in
    /// signal/interrupt handlers.
    pub fn shutdown_trigger(&self) -> ShutdownTrigger {
        ShutdownTrigger {
            signals: Arc::clone(&self.signals),
            poll_stop: Arc::clone(&self.poll_stop),
        }
    }

    /// Total bytes dropped to transmit-buffer overflow so far.
    pub fn tx_dropped(&self) -> usize {
        self.tx.lock().dropped_total()
    }

    /// The device name this connection was opened over.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name)
            .finish()
    }
}

//! Engine thread: the per-connection state machine.
//!
//! One OS thread owns the device handle and multiplexes four wait
//! conditions: shutdown request, data ready, write signal, and write
//! complete. The `serialport` driver has no completion notifications, so
//! the wait carries a short tick; on a tick the engine queries the driver
//! input queue (event-driven mode) and retires any pending partial write,
//! raising the corresponding condition for the next dispatch. Observable
//! behavior is identical to a notification-driven wait: one condition is
//! consumed and handled per iteration, shutdown always first.

use super::receive::EventDrivenReceiver;
use super::signals::{SignalSet, Wake, DATA_READY, WRITE_COMPLETE};
use super::txbuf::TransmitBuffer;
use super::{CloseReason, CloseSink, ReceiveMode};
use crate::device::{DeviceError, SerialDevice};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, trace};

/// Failures that terminate a connection from inside the engine.
#[derive(Debug, Error)]
pub(crate) enum EngineError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// The device returned fewer bytes than the driver reported buffered.
    #[error("short read from device: expected {expected} bytes, got {got}")]
    ShortRead { expected: usize, got: usize },

    /// The polling reader thread hit an unrecoverable device error.
    #[error("reader thread reported a fatal device error")]
    ReaderFailed,
}

pub(crate) struct EngineState {
    pub(crate) device: Box<dyn SerialDevice>,
    pub(crate) signals: Arc<SignalSet>,
    pub(crate) tx: Arc<Mutex<TransmitBuffer>>,
    /// Event-driven mode only; in polling mode the dedicated reader
    /// thread owns the receive pipeline.
    pub(crate) receiver: Option<EventDrivenReceiver>,
    pub(crate) mode: ReceiveMode,
    pub(crate) tick: Duration,
    /// Send-staging buffer; bytes at `staged_at..` await device acceptance.
    pub(crate) staging: Vec<u8>,
    pub(crate) staged_at: usize,
    pub(crate) write_pending: bool,
    /// Stop flag for the polling reader thread, shared with `Connection`.
    pub(crate) poll_stop: Arc<AtomicBool>,
}

impl EngineState {
    /// Run to completion and report how the session ended. Consumes the
    /// state so the device handle is released before the close callback.
    pub(crate) fn run(mut self, mut close: Box<dyn CloseSink>) {
        let reason = match self.run_loop() {
            Ok(()) => {
                debug!(device = self.device.name(), "engine shut down");
                CloseReason::Shutdown
            }
            Err(e) => {
                error!(device = self.device.name(), error = %e, "engine terminated");
                CloseReason::Error
            }
        };

        // Stop the reader thread and release the device handle before
        // announcing the close; after `on_close` the connection is done
        // and the sinks must never fire again.
        self.poll_stop.store(true, Ordering::Relaxed);
        drop(self.device);
        close.on_close(reason);
    }

    fn run_loop(&mut self) -> Result<(), EngineError> {
        loop {
            match self.signals.wait(self.tick) {
                Wake::Shutdown => return Ok(()),
                Wake::ReadFailed => return Err(EngineError::ReaderFailed),
                Wake::DataReady => self.handle_data_ready()?,
                Wake::WriteComplete => {
                    self.retire_pending()?;
                    if !self.write_pending {
                        self.drain_and_flush()?;
                    }
                }
                Wake::WriteSignal => self.drain_and_flush()?,
                Wake::Timeout => self.poll_readiness()?,
            }
        }
    }

    fn handle_data_ready(&mut self) -> Result<(), EngineError> {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.drain(self.device.as_mut()),
            // Polling mode: the reader thread drains the device itself.
            None => {
                trace!("data-ready ignored in polling mode");
                Ok(())
            }
        }
    }

    /// Stand-in for the driver's readiness notifications: raise the
    /// conditions the tick observed and let the main dispatch handle them.
    fn poll_readiness(&mut self) -> Result<(), EngineError> {
        if self.write_pending {
            self.signals.raise(WRITE_COMPLETE);
        }
        if matches!(self.mode, ReceiveMode::EventDriven) && self.device.bytes_to_read()? > 0 {
            self.signals.raise(DATA_READY);
        }
        Ok(())
    }

    /// Copy the transmit buffer out under the lock, then submit the staged
    /// bytes outside it. No-op while a previous submission is pending, so
    /// at most one write is in flight per connection.
    pub(crate) fn drain_and_flush(&mut self) -> Result<(), EngineError> {
        if self.write_pending {
            return Ok(());
        }

        {
            let mut tx = self.tx.lock();
            if tx.is_empty() {
                return Ok(());
            }
            tx.take_into(&mut self.staging);
            self.staged_at = 0;
        }

        trace!(bytes = self.staging.len(), "submitting staged bytes");
        self.submit_staged()
    }

    /// Retire a pending partial submission; clears the pending flag once
    /// the whole staging buffer has been accepted by the device.
    pub(crate) fn retire_pending(&mut self) -> Result<(), EngineError> {
        if !self.write_pending {
            return Ok(());
        }
        self.write_pending = false;
        self.submit_staged()
    }

    fn submit_staged(&mut self) -> Result<(), EngineError> {
        while self.staged_at < self.staging.len() {
            match self.device.write_bytes(&self.staging[self.staged_at..]) {
                Ok(0) => {
                    self.write_pending = true;
                    return Ok(());
                }
                Ok(n) => self.staged_at += n,
                Err(e) if e.is_timeout() => {
                    self.write_pending = true;
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
            if self.staged_at < self.staging.len() {
                // Partial acceptance: leave the remainder staged and let
                // the write-complete path pick it up.
                self.write_pending = true;
                return Ok(());
            }
        }
        self.staging.clear();
        self.staged_at = 0;
        Ok(())
    }
}

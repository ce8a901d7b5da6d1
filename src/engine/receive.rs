//! Receive pipeline strategies.
//!
//! Two mutually exclusive strategies share one delivery contract: chunks
//! are handed to the read sink exactly as the driver surfaced them, sink
//! invocations are strictly sequential, and the scratch buffer is never
//! referenced past the sink call.
//!
//! `EventDrivenReceiver` runs inside the engine thread and drains the
//! driver's input queue when a data-ready wake fires. `PollingReceiver`
//! owns a dedicated thread that issues blocking single-byte reads and
//! batches any backlog behind the first byte.

use super::signals::{SignalSet, READ_FAILED};
use super::worker::EngineError;
use super::ReadSink;
use crate::device::SerialDevice;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Drains the driver input queue on data-ready notifications.
pub(crate) struct EventDrivenReceiver {
    scratch: Vec<u8>,
    sink: Box<dyn ReadSink>,
}

impl EventDrivenReceiver {
    pub(crate) fn new(scratch_capacity: usize, sink: Box<dyn ReadSink>) -> Self {
        Self {
            scratch: vec![0; scratch_capacity],
            sink,
        }
    }

    /// Drain whatever the driver had buffered at the moment of the wake.
    ///
    /// Zero available bytes is a benign spurious wake. Each iteration
    /// reads at most one scratch buffer's worth and delivers it
    /// immediately, never coalescing across iterations. A short read is
    /// a protocol violation and fatal to the connection.
    pub(crate) fn drain(&mut self, device: &mut dyn SerialDevice) -> Result<(), EngineError> {
        let mut available = device.bytes_to_read()?;
        if available == 0 {
            trace!("spurious data-ready wake, nothing buffered");
            return Ok(());
        }

        while available > 0 {
            let want = available.min(self.scratch.len());
            let got = device.read_bytes(&mut self.scratch[..want])?;
            if got != want {
                return Err(EngineError::ShortRead {
                    expected: want,
                    got,
                });
            }
            self.sink.on_read(&self.scratch[..got]);
            available -= got;
        }
        Ok(())
    }
}

/// Dedicated reader thread performing blocking single-byte reads.
pub(crate) struct PollingReceiver {
    device: Box<dyn SerialDevice>,
    sink: Box<dyn ReadSink>,
    scratch: Vec<u8>,
    stop: Arc<AtomicBool>,
    signals: Arc<SignalSet>,
    poll_interval: Duration,
}

impl PollingReceiver {
    pub(crate) fn new(
        device: Box<dyn SerialDevice>,
        sink: Box<dyn ReadSink>,
        scratch_capacity: usize,
        stop: Arc<AtomicBool>,
        signals: Arc<SignalSet>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            device,
            sink,
            scratch: vec![0; scratch_capacity],
            stop,
            signals,
            poll_interval,
        }
    }

    /// Loop until the engine requests a stop or the device fails hard.
    ///
    /// A received byte is never delivered alone when more are already
    /// buffered: the backlog is read into scratch and delivered together
    /// with the first byte as one sink invocation.
    pub(crate) fn run(mut self) {
        let mut first = [0u8; 1];
        while !self.stop.load(Ordering::Relaxed) {
            match self.device.read_bytes(&mut first) {
                Ok(0) => thread::sleep(self.poll_interval),
                Ok(_) => {
                    if let Err(e) = self.deliver_batch(first[0]) {
                        error!(error = %e, "polling reader failed");
                        self.signals.raise(READ_FAILED);
                        return;
                    }
                }
                Err(e) if e.is_timeout() => thread::sleep(self.poll_interval),
                Err(e) => {
                    error!(error = %e, "polling reader failed");
                    self.signals.raise(READ_FAILED);
                    return;
                }
            }
        }
        debug!("polling reader stopped");
    }

    fn deliver_batch(&mut self, first: u8) -> Result<(), EngineError> {
        self.scratch[0] = first;
        let mut filled = 1;

        let backlog = self.device.bytes_to_read()?;
        let extra = backlog.min(self.scratch.len() - 1);
        if extra > 0 {
            let got = self.device.read_bytes(&mut self.scratch[1..1 + extra])?;
            filled += got;
        }

        self.sink.on_read(&self.scratch[..filled]);
        Ok(())
    }
}

//! Mock serial device for testing.
//!
//! Simulates a duplex serial line without hardware. Inbound data is staged
//! as discrete chunks so tests can model what the driver had buffered at a
//! given instant: `bytes_to_read` reports only the chunk at the head of
//! the queue, the way a real driver reports its input queue between
//! arrivals. Writes are recorded as distinct submissions so tests can
//! assert coalescing and back-pressure behavior.

use super::error::DeviceError;
use super::traits::SerialDevice;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    /// Inbound data, segmented into arrival chunks.
    chunks: VecDeque<VecDeque<u8>>,
    /// Every write submission, in order, with exactly the bytes accepted.
    submissions: Vec<Vec<u8>>,
    /// Per-submission acceptance cap; forces partial writes when set.
    write_cap: Option<usize>,
    /// Fail the next read with a non-timeout error.
    fail_next_read: bool,
    /// Fail the next write with a non-timeout error.
    fail_next_write: bool,
    /// Echo accepted writes back as inbound chunks.
    loopback: bool,
    /// Whether buffers have been purged since construction.
    cleared: bool,
    timeout: Duration,
}

/// In-memory serial device with instrumentation hooks.
///
/// `Clone` hands out another handle to the same underlying state, so a
/// test can keep a probe while the engine owns the device.
#[derive(Clone)]
pub struct MockDevice {
    name: String,
    state: Arc<Mutex<MockState>>,
    /// Write submissions currently executing, counted outside the state
    /// lock so overlapping callers from different handles are visible.
    writes_in_flight: Arc<AtomicUsize>,
    /// Highest concurrent write count ever observed.
    write_high_water: Arc<AtomicUsize>,
}

impl MockDevice {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(Mutex::new(MockState {
                timeout: Duration::from_secs(1),
                ..Default::default()
            })),
            writes_in_flight: Arc::new(AtomicUsize::new(0)),
            write_high_water: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A device that echoes every accepted write back as inbound data.
    pub fn loopback(name: impl Into<String>) -> Self {
        let device = Self::new(name);
        device.state.lock().loopback = true;
        device
    }

    /// Stage one inbound chunk, modelling a single arrival burst.
    pub fn push_chunk(&self, data: &[u8]) {
        self.state.lock().chunks.push_back(data.iter().copied().collect());
    }

    /// Cap how many bytes each write submission accepts.
    pub fn set_write_cap(&self, cap: Option<usize>) {
        self.state.lock().write_cap = cap;
    }

    /// Make the next read fail with a hard (non-timeout) error.
    pub fn fail_next_read(&self) {
        self.state.lock().fail_next_read = true;
    }

    /// Make the next write fail with a hard (non-timeout) error.
    pub fn fail_next_write(&self) {
        self.state.lock().fail_next_write = true;
    }

    /// Every write submission so far, in order.
    pub fn submissions(&self) -> Vec<Vec<u8>> {
        self.state.lock().submissions.clone()
    }

    /// All submitted bytes concatenated in submission order.
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state.lock().submissions.concat()
    }

    /// Whether `clear_buffers` has been called.
    pub fn was_cleared(&self) -> bool {
        self.state.lock().cleared
    }

    /// Highest number of write submissions that were ever executing at
    /// the same instant, across all handles to this device.
    pub fn write_high_water(&self) -> usize {
        self.write_high_water.load(Ordering::SeqCst)
    }

    /// Total inbound bytes not yet read, across all staged chunks.
    pub fn unread_bytes(&self) -> usize {
        self.state.lock().chunks.iter().map(|c| c.len()).sum()
    }

    fn timeout_error(timeout: Duration) -> DeviceError {
        let _ = timeout;
        DeviceError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "no data within timeout",
        ))
    }

    fn write_locked(&self, data: &[u8]) -> Result<usize, DeviceError> {
        let mut state = self.state.lock();
        if state.fail_next_write {
            state.fail_next_write = false;
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected write failure",
            )));
        }

        let accepted = match state.write_cap {
            Some(cap) => data.len().min(cap),
            None => data.len(),
        };
        state.submissions.push(data[..accepted].to_vec());
        if state.loopback && accepted > 0 {
            let echoed: VecDeque<u8> = data[..accepted].iter().copied().collect();
            state.chunks.push_back(echoed);
        }
        Ok(accepted)
    }
}

impl SerialDevice for MockDevice {
    fn write_bytes(&mut self, data: &[u8]) -> Result<usize, DeviceError> {
        let in_flight = self.writes_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.write_high_water.fetch_max(in_flight, Ordering::SeqCst);
        let result = self.write_locked(data);
        self.writes_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn read_bytes(&mut self, buffer: &mut [u8]) -> Result<usize, DeviceError> {
        let mut state = self.state.lock();
        if state.fail_next_read {
            state.fail_next_read = false;
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "injected read failure",
            )));
        }

        let Some(chunk) = state.chunks.front_mut() else {
            return Err(Self::timeout_error(state.timeout));
        };

        let mut read = 0;
        for slot in buffer.iter_mut() {
            match chunk.pop_front() {
                Some(byte) => {
                    *slot = byte;
                    read += 1;
                }
                None => break,
            }
        }
        if chunk.is_empty() {
            state.chunks.pop_front();
        }
        if read == 0 {
            return Err(Self::timeout_error(state.timeout));
        }
        Ok(read)
    }

    fn bytes_to_read(&self) -> Result<usize, DeviceError> {
        let state = self.state.lock();
        Ok(state.chunks.front().map_or(0, |c| c.len()))
    }

    fn clear_buffers(&mut self) -> Result<(), DeviceError> {
        let mut state = self.state.lock();
        state.chunks.clear();
        state.cleared = true;
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), DeviceError> {
        self.state.lock().timeout = timeout;
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn SerialDevice>, DeviceError> {
        Ok(Box::new(self.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for MockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDevice")
            .field("name", &self.name)
            .field("unread_bytes", &self.unread_bytes())
            .finish()
    }
}

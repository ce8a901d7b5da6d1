//! Bounded transmit buffer shared between producer callers and the
//! engine thread.
//!
//! Appends are all-or-nothing: a submission that would overflow the
//! fixed capacity is dropped in its entirety so no partial byte sequence
//! ever reaches the device. The engine drains with `take_into`, which
//! moves the used bytes to a staging buffer so producers can append again
//! without waiting for the in-flight write.

use tracing::warn;

/// Outcome of appending to the transmit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    /// The whole submission was dropped; `dropped` is its length.
    Overflow { dropped: usize },
}

#[derive(Debug)]
pub(crate) struct TransmitBuffer {
    buf: Vec<u8>,
    capacity: usize,
    dropped_total: usize,
}

impl TransmitBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
            dropped_total: 0,
        }
    }

    /// Append the submission if it fits; otherwise drop it whole.
    pub(crate) fn append(&mut self, bytes: &[u8]) -> AppendOutcome {
        if self.buf.len() + bytes.len() > self.capacity {
            self.dropped_total += bytes.len();
            warn!(
                dropped = bytes.len(),
                used = self.buf.len(),
                capacity = self.capacity,
                "transmit buffer overflow, submission dropped"
            );
            return AppendOutcome::Overflow {
                dropped: bytes.len(),
            };
        }
        self.buf.extend_from_slice(bytes);
        AppendOutcome::Accepted
    }

    /// Move all used bytes into `staging` and reset to empty.
    pub(crate) fn take_into(&mut self, staging: &mut Vec<u8>) {
        staging.clear();
        staging.append(&mut self.buf);
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub(crate) fn used(&self) -> usize {
        self.buf.len()
    }

    /// Bytes dropped to overflow since the connection opened.
    pub(crate) fn dropped_total(&self) -> usize {
        self.dropped_total
    }
}

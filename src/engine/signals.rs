//! Readiness multiplexer for the engine thread.
//!
//! A small wait-primitive set: independent signal conditions recorded as
//! bits under one mutex, with a condvar to wake the engine on whichever
//! fires first. Raised signals accumulate until consumed; `wait` consumes
//! exactly one per return, highest priority first, so a raise is never
//! lost even when several conditions fire between wakes.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

pub(crate) const SHUTDOWN: u8 = 1 << 0;
pub(crate) const DATA_READY: u8 = 1 << 1;
pub(crate) const WRITE_COMPLETE: u8 = 1 << 2;
pub(crate) const WRITE_SIGNAL: u8 = 1 << 3;
pub(crate) const READ_FAILED: u8 = 1 << 4;

/// What a wait returned: one consumed condition, or the poll tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Wake {
    Shutdown,
    ReadFailed,
    DataReady,
    WriteComplete,
    WriteSignal,
    Timeout,
}

#[derive(Debug, Default)]
pub(crate) struct SignalSet {
    flags: Mutex<u8>,
    cond: Condvar,
}

impl SignalSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Set a condition and wake the engine.
    pub(crate) fn raise(&self, flag: u8) {
        let mut flags = self.flags.lock();
        *flags |= flag;
        self.cond.notify_all();
    }

    /// Block until a condition is raised or the tick interval elapses.
    pub(crate) fn wait(&self, tick: Duration) -> Wake {
        let mut flags = self.flags.lock();
        loop {
            if let Some(wake) = Self::consume(&mut flags) {
                return wake;
            }
            if self.cond.wait_for(&mut flags, tick).timed_out() {
                return Self::consume(&mut flags).unwrap_or(Wake::Timeout);
            }
        }
    }

    /// Consume the highest-priority pending condition. Shutdown always
    /// wins so the engine observes it on its very next wake.
    fn consume(flags: &mut u8) -> Option<Wake> {
        for (bit, wake) in [
            (SHUTDOWN, Wake::Shutdown),
            (READ_FAILED, Wake::ReadFailed),
            (DATA_READY, Wake::DataReady),
            (WRITE_COMPLETE, Wake::WriteComplete),
            (WRITE_SIGNAL, Wake::WriteSignal),
        ] {
            if *flags & bit != 0 {
                *flags &= !bit;
                return Some(wake);
            }
        }
        None
    }
}

/// One-shot gate the engine thread opens just before it exits, so
/// `shutdown` can wait for thread exit with a bound instead of an
/// unbounded `join`.
#[derive(Debug, Default)]
pub(crate) struct ExitGate {
    done: Mutex<bool>,
    cond: Condvar,
}

impl ExitGate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn open(&self) {
        let mut done = self.done.lock();
        *done = true;
        self.cond.notify_all();
    }

    /// Wait until the gate opens; returns false on timeout.
    pub(crate) fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock();
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            if self.cond.wait_for(&mut done, deadline - now).timed_out() {
                return *done;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_timeout_when_nothing_raised() {
        let signals = SignalSet::new();
        assert_eq!(signals.wait(Duration::from_millis(5)), Wake::Timeout);
    }

    #[test]
    fn test_raised_signal_consumed_once() {
        let signals = SignalSet::new();
        signals.raise(WRITE_SIGNAL);
        assert_eq!(signals.wait(Duration::from_millis(5)), Wake::WriteSignal);
        assert_eq!(signals.wait(Duration::from_millis(5)), Wake::Timeout);
    }

    #[test]
    fn test_shutdown_has_priority() {
        let signals = SignalSet::new();
        signals.raise(WRITE_SIGNAL);
        signals.raise(DATA_READY);
        signals.raise(SHUTDOWN);
        assert_eq!(signals.wait(Duration::from_millis(5)), Wake::Shutdown);
        // Remaining conditions are still pending afterwards.
        assert_eq!(signals.wait(Duration::from_millis(5)), Wake::DataReady);
        assert_eq!(signals.wait(Duration::from_millis(5)), Wake::WriteSignal);
    }

    #[test]
    fn test_raise_wakes_blocked_waiter() {
        let signals = Arc::new(SignalSet::new());
        let waiter = {
            let signals = Arc::clone(&signals);
            thread::spawn(move || signals.wait(Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(10));
        signals.raise(DATA_READY);
        assert_eq!(waiter.join().unwrap(), Wake::DataReady);
    }

    #[test]
    fn test_exit_gate() {
        let gate = Arc::new(ExitGate::new());
        assert!(!gate.wait(Duration::from_millis(5)));

        let opener = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                gate.open();
            })
        };
        assert!(gate.wait(Duration::from_secs(5)));
        opener.join().unwrap();
        // Already open: returns immediately.
        assert!(gate.wait(Duration::from_millis(1)));
    }
}

//! End-to-end engine tests over the mock device: transmit coalescing,
//! back-pressure, receive delivery in both modes, and close semantics.

mod common;

use common::{fast_config, open_probed, settle, wait_for};
use pretty_assertions::assert_eq;
use std::time::Duration;
use uart_comm::{CloseReason, MockDevice, OverflowPolicy, ReceiveMode, SendError};

#[test]
fn test_sent_bytes_reach_device_in_order() {
    let device = MockDevice::new("MOCK0");
    let (conn, _probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    conn.send(b"first ").unwrap();
    conn.send(b"second ").unwrap();
    conn.send(b"third").unwrap();

    assert!(wait_for(settle(), || device.written_bytes().len() == 18));
    assert_eq!(device.written_bytes(), b"first second third".to_vec());
    conn.shutdown();
}

#[test]
fn test_partial_writes_preserve_order() {
    let device = MockDevice::new("MOCK0");
    // Device accepts at most 3 bytes per submission, forcing the engine
    // to retire the remainder across later submissions.
    device.set_write_cap(Some(3));
    let (conn, _probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    conn.send(b"ABCDEFGHI").unwrap();

    assert!(wait_for(settle(), || device.written_bytes().len() == 9));
    assert_eq!(device.written_bytes(), b"ABCDEFGHI".to_vec());
    for submission in device.submissions() {
        assert!(submission.len() <= 3);
    }
    conn.shutdown();
}

#[test]
fn test_staged_remainder_flushes_before_new_data() {
    let device = MockDevice::new("MOCK0");
    device.set_write_cap(Some(2));
    let (conn, _probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    conn.send(b"AAAA").unwrap();
    assert!(wait_for(settle(), || !device.submissions().is_empty()));
    conn.send(b"BBBB").unwrap();

    assert!(wait_for(settle(), || device.written_bytes().len() == 8));
    // All of the first submission's bytes drain before any of the second's.
    assert_eq!(device.written_bytes(), b"AAAABBBB".to_vec());
    conn.shutdown();
}

#[test]
fn test_overflow_surfaces_backlog_when_configured() {
    let device = MockDevice::new("MOCK0");
    // Nothing is ever accepted, so the first submission stays in flight
    // and later sends accumulate in the transmit buffer.
    device.set_write_cap(Some(0));
    let mut config = fast_config();
    config.tx_capacity = 4;
    config.overflow_policy = OverflowPolicy::Surface;
    let (conn, _probe) = open_probed(&device, ReceiveMode::EventDriven, config);

    conn.send(b"AB").unwrap();
    // Wait until the engine has staged those bytes, freeing the buffer.
    assert!(wait_for(settle(), || !device.submissions().is_empty()));

    conn.send(b"WXYZ").unwrap();
    assert_eq!(conn.send(b"!"), Err(SendError::Backlog { dropped: 1 }));
    // Rejection is all-or-nothing: the buffered bytes are untouched.
    assert_eq!(conn.tx_dropped(), 1);
    conn.shutdown();
}

#[test]
fn test_overflow_drops_silently_by_default() {
    let device = MockDevice::new("MOCK0");
    device.set_write_cap(Some(0));
    let mut config = fast_config();
    config.tx_capacity = 4;
    let (conn, _probe) = open_probed(&device, ReceiveMode::EventDriven, config);

    conn.send(b"AB").unwrap();
    assert!(wait_for(settle(), || !device.submissions().is_empty()));

    conn.send(b"WXYZ").unwrap();
    assert_eq!(conn.send(b"!!"), Ok(()));
    assert_eq!(conn.tx_dropped(), 2);
    conn.shutdown();
}

#[test]
fn test_at_most_one_write_in_flight() {
    let device = MockDevice::new("MOCK0");
    // Partial acceptance keeps a submission pending across many retire
    // cycles, maximizing the chance for an overlapping write to show up
    // if one were possible.
    device.set_write_cap(Some(2));
    let (conn, _probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..5 {
                    conn.send(b"abcdefgh").unwrap();
                }
            });
        }
    });

    assert!(wait_for(settle(), || device.written_bytes().len() == 160));
    assert_eq!(device.write_high_water(), 1);
    conn.shutdown();
}

#[test]
fn test_event_driven_delivers_chunks_in_order() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    device.push_chunk(b"12345");
    device.push_chunk(b"678");
    device.push_chunk(b"9ABCDEF");

    assert!(wait_for(settle(), || probe.bytes().len() == 15));
    assert_eq!(probe.bytes(), b"123456789ABCDEF".to_vec());
    // One delivery per driver chunk, sizes preserved.
    let sizes: Vec<usize> = probe.chunks().iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![5, 3, 7]);
    conn.shutdown();
}

#[test]
fn test_polling_mode_delivers_pushed_data() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::Polling, fast_config());

    device.push_chunk(b"hello");
    assert!(wait_for(settle(), || probe.bytes() == b"hello"));

    device.push_chunk(b"world");
    assert!(wait_for(settle(), || probe.bytes() == b"helloworld"));
    conn.shutdown();
}

#[test]
fn test_loopback_round_trip() {
    let device = MockDevice::loopback("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    conn.send(b"PING\r\n").unwrap();
    assert!(wait_for(settle(), || probe.bytes() == b"PING\r\n"));

    conn.shutdown();
    assert_eq!(probe.close_reasons(), vec![CloseReason::Shutdown]);
}

#[test]
fn test_shutdown_is_idempotent_and_close_fires_once() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    conn.shutdown();
    conn.shutdown();
    drop(conn);

    assert_eq!(probe.close_reasons(), vec![CloseReason::Shutdown]);
}

#[test]
fn test_drop_closes_connection() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    drop(conn);
    assert_eq!(probe.close_reasons(), vec![CloseReason::Shutdown]);
}

#[test]
fn test_read_failure_closes_with_error() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    device.fail_next_read();
    device.push_chunk(b"x");

    assert!(wait_for(settle(), || !probe.close_reasons().is_empty()));
    assert_eq!(probe.close_reasons(), vec![CloseReason::Error]);

    // Shutting down after an error close must not notify again.
    conn.shutdown();
    assert_eq!(probe.close_reasons(), vec![CloseReason::Error]);
}

#[test]
fn test_polling_read_failure_closes_with_error() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::Polling, fast_config());

    device.fail_next_read();
    device.push_chunk(b"x");

    assert!(wait_for(settle(), || !probe.close_reasons().is_empty()));
    assert_eq!(probe.close_reasons(), vec![CloseReason::Error]);
    conn.shutdown();
}

#[test]
fn test_error_close_stops_polling_reader() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::Polling, fast_config());

    // Kill the engine through the write path; the reader thread itself
    // never sees the failure.
    device.fail_next_write();
    conn.send(b"doomed").unwrap();

    assert!(wait_for(settle(), || !probe.close_reasons().is_empty()));
    assert_eq!(probe.close_reasons(), vec![CloseReason::Error]);

    // The error close must take the reader thread down with it; data
    // arriving afterwards stays undelivered.
    device.push_chunk(b"ghost");
    std::thread::sleep(Duration::from_millis(50));
    assert!(probe.bytes().is_empty());
    conn.shutdown();
}

#[test]
fn test_write_failure_closes_with_error() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    device.fail_next_write();
    conn.send(b"doomed").unwrap();

    assert!(wait_for(settle(), || !probe.close_reasons().is_empty()));
    assert_eq!(probe.close_reasons(), vec![CloseReason::Error]);
    conn.shutdown();
}

#[test]
fn test_shutdown_trigger_from_another_thread() {
    let device = MockDevice::new("MOCK0");
    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());

    let trigger = conn.shutdown_trigger();
    std::thread::spawn(move || trigger.request());

    assert!(wait_for(settle(), || !probe.close_reasons().is_empty()));
    assert_eq!(probe.close_reasons(), vec![CloseReason::Shutdown]);

    // Joining after the trigger fired completes immediately.
    conn.shutdown();
}

#[test]
fn test_stale_bytes_purged_on_open() {
    let device = MockDevice::new("MOCK0");
    device.push_chunk(b"stale noise");

    let (conn, probe) = open_probed(&device, ReceiveMode::EventDriven, fast_config());
    assert!(device.was_cleared());

    device.push_chunk(b"fresh");
    assert!(wait_for(settle(), || probe.bytes() == b"fresh"));
    conn.shutdown();
}

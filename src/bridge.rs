//! Command bridge: length-prefixed framing over a parent/child byte pipe.
//!
//! Lets a parent program drive the transport as a subprocess. Each frame
//! is a 2-byte big-endian length followed by that many payload bytes; the
//! first payload byte is a command tag, the remainder the body. Inbound
//! frames carry write and shutdown commands; received device bytes and
//! diagnostic text flow back out with the same framing.

use crate::engine::Connection;
use parking_lot::Mutex;
use std::io::{Read, Write};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Inbound: body is bytes to transmit on the device.
pub const TAG_WRITE: u8 = 0;
/// Outbound: body is bytes received from the device.
pub const TAG_READ: u8 = 1;
/// Outbound: body is diagnostic text.
pub const TAG_DEBUG: u8 = 2;
/// Inbound: request orderly shutdown; body ignored.
pub const TAG_SHUTDOWN: u8 = 3;

/// Largest payload (tag + body) a 2-byte length prefix can carry.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Errors from frame encoding/decoding.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Payload exceeds what the length prefix can express.
    #[error("frame payload too large: {0} bytes (max {MAX_FRAME_PAYLOAD})")]
    Oversize(usize),

    /// A frame with a zero-length payload has no command tag.
    #[error("empty frame")]
    Empty,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: u8,
    pub body: Vec<u8>,
}

/// Encode and write one frame.
pub fn write_frame<W: Write>(writer: &mut W, tag: u8, body: &[u8]) -> Result<(), FrameError> {
    let payload_len = body.len() + 1;
    if payload_len > MAX_FRAME_PAYLOAD {
        return Err(FrameError::Oversize(payload_len));
    }
    writer.write_all(&(payload_len as u16).to_be_bytes())?;
    writer.write_all(&[tag])?;
    writer.write_all(body)?;
    writer.flush()?;
    Ok(())
}

/// Read and decode one frame.
///
/// Returns `Ok(None)` on a clean EOF at a frame boundary. EOF inside a
/// frame is an error.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Frame>, FrameError> {
    let mut header = [0u8; 2];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "EOF inside frame header",
            )
            .into());
        }
        filled += n;
    }

    let len = u16::from_be_bytes(header) as usize;
    if len == 0 {
        return Err(FrameError::Empty);
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(Frame {
        tag: payload[0],
        body: payload[1..].to_vec(),
    }))
}

/// Shared, serialized writer for outbound frames.
///
/// The read sink runs on the engine thread while the command loop runs on
/// the main thread, so all outbound framing goes through one mutex.
pub struct FrameWriter<W: Write + Send> {
    inner: Arc<Mutex<W>>,
}

impl<W: Write + Send> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    pub fn send(&self, tag: u8, body: &[u8]) -> Result<(), FrameError> {
        let mut writer = self.inner.lock();
        write_frame(&mut *writer, tag, body)
    }
}

impl<W: Write + Send> Clone for FrameWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// An `io::Write` that frames everything it receives as debug messages,
/// so a tracing subscriber can emit diagnostics through the pipe instead
/// of stderr.
pub struct DebugFrameWriter<W: Write + Send> {
    writer: FrameWriter<W>,
}

impl<W: Write + Send> DebugFrameWriter<W> {
    pub fn new(writer: FrameWriter<W>) -> Self {
        Self { writer }
    }
}

impl<W: Write + Send> Write for DebugFrameWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        // Diagnostics are best-effort; cap rather than fail on huge lines.
        let take = buf.len().min(MAX_FRAME_PAYLOAD - 1);
        self.writer
            .send(TAG_DEBUG, &buf[..take])
            .map_err(|e| match e {
                FrameError::Io(io) => io,
                other => std::io::Error::new(std::io::ErrorKind::InvalidData, other.to_string()),
            })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Relay inbound command frames to the connection until EOF.
///
/// Tag 0 queues bytes for the device, tag 3 requests shutdown; unknown
/// inbound tags are ignored. EOF on the command pipe is treated as a
/// shutdown request. The caller's close sink is responsible for
/// terminating the process once the connection reports closed.
pub fn run_command_loop<R: Read>(input: &mut R, conn: &Connection) -> Result<(), FrameError> {
    loop {
        let Some(frame) = read_frame(input)? else {
            debug!("command pipe EOF, shutting down");
            conn.shutdown();
            return Ok(());
        };
        match frame.tag {
            TAG_WRITE => {
                let _ = conn.send(&frame.body);
            }
            TAG_SHUTDOWN => conn.shutdown(),
            other => debug!(tag = other, "ignoring unknown inbound command tag"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encode_write_command() {
        let mut out = Vec::new();
        write_frame(&mut out, TAG_WRITE, b"AT\r\n").unwrap();
        assert_eq!(out, vec![0x00, 0x05, 0x00, 0x41, 0x54, 0x0D, 0x0A]);
    }

    #[test]
    fn test_round_trip() {
        let mut out = Vec::new();
        write_frame(&mut out, TAG_WRITE, b"AT\r\n").unwrap();

        let mut cursor = &out[..];
        let frame = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(frame.tag, TAG_WRITE);
        assert_eq!(frame.body, b"AT\r\n");
        // Nothing left after one frame.
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_multiple_frames_in_sequence() {
        let mut out = Vec::new();
        write_frame(&mut out, TAG_READ, b"pong").unwrap();
        write_frame(&mut out, TAG_DEBUG, b"note").unwrap();
        write_frame(&mut out, TAG_SHUTDOWN, b"").unwrap();

        let mut cursor = &out[..];
        let first = read_frame(&mut cursor).unwrap().unwrap();
        let second = read_frame(&mut cursor).unwrap().unwrap();
        let third = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!((first.tag, first.body.as_slice()), (TAG_READ, &b"pong"[..]));
        assert_eq!(
            (second.tag, second.body.as_slice()),
            (TAG_DEBUG, &b"note"[..])
        );
        assert_eq!((third.tag, third.body.as_slice()), (TAG_SHUTDOWN, &b""[..]));
    }

    #[test]
    fn test_eof_at_boundary_is_clean() {
        let mut empty: &[u8] = &[];
        assert!(read_frame(&mut empty).unwrap().is_none());
    }

    #[test]
    fn test_eof_inside_frame_is_error() {
        // Header promises 5 payload bytes but only 2 follow.
        let mut truncated: &[u8] = &[0x00, 0x05, 0x00, 0x41];
        assert!(matches!(
            read_frame(&mut truncated),
            Err(FrameError::Io(_))
        ));

        // Header itself truncated.
        let mut half_header: &[u8] = &[0x00];
        assert!(matches!(
            read_frame(&mut half_header),
            Err(FrameError::Io(_))
        ));
    }

    #[test]
    fn test_zero_length_payload_rejected() {
        let mut bad: &[u8] = &[0x00, 0x00];
        assert!(matches!(read_frame(&mut bad), Err(FrameError::Empty)));
    }

    #[test]
    fn test_oversize_body_rejected() {
        let body = vec![0u8; MAX_FRAME_PAYLOAD];
        let mut out = Vec::new();
        assert!(matches!(
            write_frame(&mut out, TAG_WRITE, &body),
            Err(FrameError::Oversize(_))
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_largest_body_accepted() {
        let body = vec![0xAB; MAX_FRAME_PAYLOAD - 1];
        let mut out = Vec::new();
        write_frame(&mut out, TAG_READ, &body).unwrap();
        let mut cursor = &out[..];
        let frame = read_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(frame.body.len(), MAX_FRAME_PAYLOAD - 1);
    }

    #[test]
    fn test_frame_writer_serializes_output() {
        let writer = FrameWriter::new(Vec::new());
        writer.send(TAG_READ, b"one").unwrap();
        writer.clone().send(TAG_READ, b"two").unwrap();

        let buf = writer.inner.lock().clone();
        let mut cursor = &buf[..];
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap().body, b"one");
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap().body, b"two");
    }
}

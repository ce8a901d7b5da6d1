//! Rendering of received bytes and line-ending translation for the CLI.

use std::io::{self, Write};
use std::str::FromStr;

/// Line terminator appended to outbound keyboard input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    Cr,
    Lf,
    CrLf,
    LfCr,
}

impl LineEnding {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Self::Cr => b"\r",
            Self::Lf => b"\n",
            Self::CrLf => b"\r\n",
            Self::LfCr => b"\n\r",
        }
    }
}

impl FromStr for LineEnding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cr" => Ok(Self::Cr),
            "lf" => Ok(Self::Lf),
            "crlf" => Ok(Self::CrLf),
            "lfcr" => Ok(Self::LfCr),
            other => Err(format!("line ending must be cr|lf|crlf|lfcr, got '{other}'")),
        }
    }
}

/// Renders received byte batches as text or hex, optionally prefixed with
/// a timestamp per batch.
///
/// In hex mode the column counter carries across batches so the 32-column
/// layout is stable regardless of how the driver chunked the data.
pub struct Renderer {
    hex: bool,
    timestamp: bool,
    hex_column: usize,
}

const HEX_COLUMNS: usize = 32;

impl Renderer {
    pub fn new(hex: bool, timestamp: bool) -> Self {
        Self {
            hex,
            timestamp,
            hex_column: 0,
        }
    }

    /// Render one received batch.
    pub fn render(&mut self, out: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        if self.timestamp {
            let now = chrono::Local::now();
            write!(out, "[{}] ", now.format("%H:%M:%S%.3f"))?;
        }
        if self.hex {
            for byte in bytes {
                write!(out, "{byte:02X} ")?;
                self.hex_column += 1;
                if self.hex_column % HEX_COLUMNS == 0 {
                    writeln!(out)?;
                }
            }
        } else {
            out.write_all(String::from_utf8_lossy(bytes).as_bytes())?;
        }
        out.flush()
    }
}

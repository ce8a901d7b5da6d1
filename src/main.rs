//! Interactive UART terminal.
//!
//! Opens a serial device, echoes received bytes to stdout (plain, hex,
//! or timestamped), and forwards keyboard input to the device with
//! configurable line-ending translation. Ctrl+C closes the port and
//! exits.

use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, Write};
use std::process;
use tracing_subscriber::EnvFilter;
use uart_comm::display::{LineEnding, Renderer};
use uart_comm::{
    CloseReason, Connection, DataBits, LineSettings, Parity, ReceiveMode, StopBits,
    TransportConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "uart-comm",
    version,
    about = "Interactive terminal for serial devices",
    long_about = "Opens a serial port, streams received bytes to the console, and sends \
typed input to the device. Supports hex and timestamped display, line-ending \
translation, and a polling receive mode for drivers without reliable readiness \
reporting."
)]
struct Args {
    /// Serial device path, e.g. /dev/ttyUSB0 or COM3
    #[arg(short, long)]
    port: String,

    /// Baud rate; omit to keep the driver default
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5-8); omit to keep the driver default
    #[arg(long)]
    data_bits: Option<u8>,

    /// Stop bits (1 or 2); omit to keep the driver default
    #[arg(long)]
    stop_bits: Option<u8>,

    /// Parity: none | even | odd | mark | space
    #[arg(long)]
    parity: Option<String>,

    /// Display received bytes as hex
    #[arg(long)]
    hex: bool,

    /// Prefix each received batch with a timestamp
    #[arg(long)]
    timestamp: bool,

    /// Line ending appended to outbound input: cr | lf | crlf | lfcr
    #[arg(long, default_value = "cr")]
    line_ending: String,

    /// Keyboard input mode
    #[arg(long, value_enum, default_value_t = InputMode::Line)]
    input: InputMode,

    /// Use a dedicated polling reader thread instead of event-driven receive
    #[arg(long)]
    poll: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum InputMode {
    /// Line-buffered: send on Enter
    Line,
    /// Raw: forward each keystroke immediately
    Raw,
}

fn build_settings(args: &Args) -> Result<LineSettings, String> {
    let data_bits = match args.data_bits {
        Some(n) => Some(DataBits::try_from(n).map_err(|e| e.to_string())?),
        None => None,
    };
    let stop_bits = match args.stop_bits {
        Some(n) => Some(StopBits::try_from(n).map_err(|e| e.to_string())?),
        None => None,
    };
    let parity = match args.parity.as_deref() {
        // An empty parity string keeps the driver default, same as omitting it.
        Some("") | None => None,
        Some(s) => Some(s.parse::<Parity>().map_err(|e| e.to_string())?),
    };
    Ok(LineSettings {
        baud: args.baud,
        data_bits,
        parity,
        stop_bits,
    })
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let settings = match build_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    let line_ending = match args.line_ending.parse::<LineEnding>() {
        Ok(ending) => ending,
        Err(e) => {
            eprintln!("{e}");
            process::exit(1);
        }
    };
    let mode = if args.poll {
        ReceiveMode::Polling
    } else {
        ReceiveMode::EventDriven
    };

    let mut renderer = Renderer::new(args.hex, args.timestamp);
    let raw_input = args.input == InputMode::Raw;
    let read = move |bytes: &[u8]| {
        let _ = renderer.render(&mut io::stdout().lock(), bytes);
    };
    let close = move |reason: CloseReason| {
        if raw_input {
            let _ = terminal::disable_raw_mode();
        }
        match reason {
            CloseReason::Shutdown => {
                eprintln!("\nPort closed.");
                process::exit(0);
            }
            CloseReason::Error => {
                eprintln!("\nPort closed: device error.");
                process::exit(1);
            }
        }
    };

    let conn = match Connection::open_port(
        &args.port,
        &settings,
        mode,
        TransportConfig::default(),
        read,
        close,
    ) {
        Ok(conn) => conn,
        Err(e) => {
            eprintln!("Failed to open {}: {e}", args.port);
            process::exit(1);
        }
    };

    eprintln!(
        "Port {} is open. Input mode: {:?}. Use Ctrl+C to close and exit.",
        args.port, args.input
    );

    let trigger = conn.shutdown_trigger();
    if let Err(e) = ctrlc::set_handler(move || trigger.request()) {
        eprintln!("warning: could not install Ctrl+C handler: {e}");
    }

    match args.input {
        InputMode::Line => run_line_input(&conn, line_ending),
        InputMode::Raw => run_raw_input(&conn, line_ending),
    }

    // EOF or raw-mode exit: close the port; the close sink terminates
    // the process.
    conn.shutdown();
}

fn run_line_input(conn: &Connection, ending: LineEnding) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let mut bytes = line.into_bytes();
        bytes.extend_from_slice(ending.bytes());
        let _ = conn.send(&bytes);
    }
}

fn run_raw_input(conn: &Connection, ending: LineEnding) {
    if let Err(e) = terminal::enable_raw_mode() {
        eprintln!("warning: raw mode unavailable ({e}), falling back to line input");
        run_line_input(conn, ending);
        return;
    }

    loop {
        let Ok(ev) = event::read() else { break };
        let Event::Key(key) = ev else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        match (key.code, key.modifiers) {
            (KeyCode::Char('c'), mods) if mods.contains(KeyModifiers::CONTROL) => break,
            (KeyCode::Enter, _) => {
                let _ = conn.send(ending.bytes());
                print!("\r\n");
                let _ = io::stdout().flush();
            }
            (KeyCode::Char(c), _) => {
                let mut buf = [0u8; 4];
                let _ = conn.send(c.encode_utf8(&mut buf).as_bytes());
                print!("{c}");
                let _ = io::stdout().flush();
            }
            (code, _) => {
                if let Some(bytes) = control_key_bytes(code) {
                    let _ = conn.send(bytes);
                }
            }
        }
    }

    let _ = terminal::disable_raw_mode();
}

/// Raw-mode byte translation for non-printing keys the device should
/// still see.
fn control_key_bytes(code: KeyCode) -> Option<&'static [u8]> {
    match code {
        KeyCode::Backspace => Some(b"\x08"),
        KeyCode::Tab => Some(b"\t"),
        KeyCode::Esc => Some(b"\x1b"),
        _ => None,
    }
}

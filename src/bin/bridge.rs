//! Framed subprocess bridge.
//!
//! Runs the UART transport behind stdin/stdout for a parent program.
//! Inbound frames on stdin carry write and shutdown commands; received
//! device bytes and diagnostic text are framed back out on stdout. All
//! output, including tracing, goes through the frame writer so stdout
//! stays a clean frame stream.

use clap::Parser;
use std::io;
use std::process;
use tracing_subscriber::EnvFilter;
use uart_comm::bridge::{self, DebugFrameWriter, FrameWriter, TAG_DEBUG, TAG_READ};
use uart_comm::{
    CloseReason, Connection, DataBits, LineSettings, Parity, ReceiveMode, StopBits,
    TransportConfig,
};

#[derive(Parser, Debug)]
#[command(
    name = "uart-bridge",
    version,
    about = "Serial transport bridge driven over stdin/stdout frames"
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

    /// Use a dedicated polling reader thread instead of event-driven receive
    #[arg(long)]
    poll: bool,
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
    let args = Args::parse();
    let frames = FrameWriter::new(io::stdout());

    // Route tracing through debug frames so stdout carries nothing but
    // well-formed frames.
    let log_frames = frames.clone();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(false)
        .with_writer(move || DebugFrameWriter::new(log_frames.clone()))
        .init();

    let settings = match build_settings(&args) {
        Ok(settings) => settings,
        Err(e) => {
            let _ = frames.send(TAG_DEBUG, e.as_bytes());
            process::exit(1);
        }
    };
    let mode = if args.poll {
        ReceiveMode::Polling
    } else {
        ReceiveMode::EventDriven
    };

    let read_frames = frames.clone();
    let read = move |bytes: &[u8]| {
        let _ = read_frames.send(TAG_READ, bytes);
    };
    let close_frames = frames.clone();
    let close = move |reason: CloseReason| {
        let note = format!("port closed: {reason}");
        let _ = close_frames.send(TAG_DEBUG, note.as_bytes());
        match reason {
            CloseReason::Shutdown => process::exit(0),
            CloseReason::Error => process::exit(1),
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
            let note = format!("failed to open {}: {e}", args.port);
            let _ = frames.send(TAG_DEBUG, note.as_bytes());
            process::exit(1);
        }
    };

    let trigger = conn.shutdown_trigger();
    if let Err(e) = ctrlc::set_handler(move || trigger.request()) {
        tracing::warn!("could not install Ctrl+C handler: {e}");
    }

    let mut stdin = io::stdin().lock();
    if let Err(e) = bridge::run_command_loop(&mut stdin, &conn) {
        let note = format!("command pipe error: {e}");
        let _ = frames.send(TAG_DEBUG, note.as_bytes());
        conn.shutdown();
    }

    // The close sink exits the process once the engine thread reports
    // closed; if shutdown had to detach, fall through and exit cleanly.
    process::exit(0);
}

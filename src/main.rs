use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::fs::File;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use nirscan_rs::protocol::{
    ENDPOINT_IN, ENDPOINT_OUT, PID, REPORT_SIZE, VID, hexify, parse_hex_list,
};
use nirscan_rs::{DeviceSelector, HidTransport, Spectrometer, Timing};

/// Control a DLP NIRscan-class spectrometer over USB HID.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Action,
    /// USB vendor id of the spectrometer.
    #[arg(long, value_parser = parse_u16, default_value_t = VID)]
    vid: u16,
    /// USB product id of the spectrometer.
    #[arg(long, value_parser = parse_u16, default_value_t = PID)]
    pid: u16,
    /// HID interface number to claim.
    #[arg(long, default_value_t = 0)]
    interface: u8,
    /// Interrupt IN endpoint address.
    #[arg(long, value_parser = parse_u8, default_value_t = ENDPOINT_IN)]
    endpoint_in: u8,
    /// Interrupt OUT endpoint address.
    #[arg(long, value_parser = parse_u8, default_value_t = ENDPOINT_OUT)]
    endpoint_out: u8,
    /// HID report size in bytes.
    #[arg(long, default_value_t = REPORT_SIZE)]
    report_size: usize,
    /// Delay after each command before expecting a reply, in milliseconds.
    #[arg(long, default_value_t = 10)]
    settle_ms: u64,
    /// Bound on the first stage of a response, in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    response_timeout_ms: u64,
    /// Bound on each continuation chunk, in milliseconds.
    #[arg(long, default_value_t = 5_000)]
    chunk_timeout_ms: u64,
    /// Maximum chunk requests per file transfer.
    #[arg(long, default_value_t = 4096)]
    max_file_chunks: u32,
    /// Optional path to a file to write logs to, in addition to the console.
    #[arg(short, long)]
    log_file: Option<PathBuf>,
    #[command(flatten)]
    verbose: Verbosity<InfoLevel>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Start a scan with the active configuration.
    Scan,
    /// Read and print the active scan configuration.
    Config,
    /// Download a device file and print it as a hex dump.
    File {
        /// File identifier.
        #[arg(value_parser = parse_u8)]
        id: u8,
    },
    /// Send a raw frame given as comma-separated hex bytes, e.g. "c0,00,02,00,23,02",
    /// then print incoming reports until the device goes quiet.
    Raw {
        frame: String,
        /// Stop listening after this many milliseconds without a report.
        #[arg(long, default_value_t = 1_000)]
        listen_ms: u64,
    },
}

impl Cli {
    fn selector(&self) -> DeviceSelector {
        DeviceSelector {
            vendor_id: self.vid,
            product_id: self.pid,
            interface: self.interface,
            endpoint_in: self.endpoint_in,
            endpoint_out: self.endpoint_out,
            report_size: self.report_size,
        }
    }

    fn timing(&self) -> Timing {
        Timing {
            settle_delay: Duration::from_millis(self.settle_ms),
            first_chunk_timeout: Duration::from_millis(self.response_timeout_ms),
            continuation_timeout: Duration::from_millis(self.chunk_timeout_ms),
            max_file_chunks: self.max_file_chunks,
        }
    }
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid value '{s}': {e}"))
}

fn parse_u8(s: &str) -> Result<u8, String> {
    let value = parse_u16(s)?;
    u8::try_from(value).map_err(|_| format!("value '{s}' does not fit in a byte"))
}

fn setup_logging(
    log_file_path: Option<PathBuf>,
    verbosity: &Verbosity<InfoLevel>,
) -> Result<Option<WorkerGuard>> {
    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    let (file_layer, guard) = if let Some(ref path) = log_file_path {
        let log_file = File::create(path)
            .with_context(|| format!("Failed to create log file at: {:?}", path))?;
        let (non_blocking_writer, guard) = tracing_appender::non_blocking(log_file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking_writer)
            .with_ansi(false)
            .with_target(false);
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    // INFO by default, DEBUG with -v, TRACE with -vv; RUST_LOG still wins.
    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    if let Some(path) = log_file_path {
        info!("Logging to file: {:?}", path);
    }

    Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.log_file.clone(), &cli.verbose)?;

    tokio::select! {
        res = run(cli) => {
            if let Err(e) = res {
                error!("Application failed: {:?}", e);
                process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down.");
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let transport = HidTransport::new(cli.selector());
    let mut device = Spectrometer::with_timing(transport, cli.timing());
    device.connect().await.context("Failed to connect to the spectrometer")?;

    match cli.command {
        Action::Scan => {
            device.perform_scan().await.context("Failed to start scan")?;
            println!("Scan started.");
        }
        Action::Config => {
            let config = device
                .get_configuration()
                .await
                .context("Failed to read configuration")?;
            println!("{config}");
        }
        Action::File { id } => {
            let data = device
                .get_file(id)
                .await
                .with_context(|| format!("Failed to download file {id}"))?;
            for (i, line) in data.chunks(16).enumerate() {
                println!("{:08x}  {}", i * 16, hex::encode(line));
            }
            info!(file_id = id, bytes = data.len(), "File downloaded");
        }
        Action::Raw { frame, listen_ms } => {
            let bytes = parse_hex_list(&frame)?;
            device.send_raw(&bytes).await.context("Failed to send raw frame")?;
            println!("Sent {} bytes.", bytes.len());
            let reports = device
                .read_reports(Duration::from_millis(listen_ms))
                .await
                .context("Failed to read reports")?;
            for report in &reports {
                println!("{}", hexify(report));
            }
            info!(count = reports.len(), "Listening finished");
        }
    }

    device.disconnect();
    Ok(())
}

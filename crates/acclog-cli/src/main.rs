//! `accdump`: talk to an ACCLOG logger over USB serial and convert its files.

use acclog_core::datalog::{convert_file, decode_file, estimate_start_time, write_csv};
use acclog_core::protocol::{
    self, control, head, list_ports, negotiate, regs, with_link, Command, DumpEvent, DumpTransfer,
    HeaderSync, LinkConfig, SystemPorts,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Dump, inspect and convert logs from ACCLOG motion-sensor loggers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Serial port; defaults to the first port that looks like a logger
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// JSON file with link settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Baud rate to try; repeat to give several, fastest first
    #[arg(short, long = "baud", global = true)]
    bauds: Vec<u32>,

    /// More logging (-v debug, -vv trace); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// List serial ports
    Ports,
    /// Print the device status
    Info {
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the first bytes of the stored log
    Head,
    /// Download the stored log
    Dump {
        /// Output file
        #[arg(short, long, default_value = "ACCLOG.bin")]
        out: PathBuf,
        /// Also write a CSV next to the output file
        #[arg(long)]
        csv: bool,
        /// Write the transfer session (clock pair, sync outcome) as JSON
        #[arg(long)]
        session: Option<PathBuf>,
    },
    /// Decode a captured file to CSV
    Convert {
        input: PathBuf,
        /// CSV path; defaults to the input with a .csv extension
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Write CSV to stdout instead of a file
        #[arg(long, conflicts_with = "out")]
        stdout: bool,
    },
    /// Delete the stored log
    Erase,
    /// Start recording
    Start,
    /// Stop recording
    Stop,
    /// Print the IMU register dump
    Regs,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<LinkConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Invalid config {}", path.display()))?
        }
        None => LinkConfig::default(),
    };
    if !cli.bauds.is_empty() {
        config.candidate_bauds = cli.bauds.clone();
    }
    Ok(config)
}

fn resolve_port(requested: Option<&str>) -> Result<String> {
    if let Some(port) = requested {
        return Ok(port.to_string());
    }
    let ports = list_ports();
    let chosen = ports
        .iter()
        .find(|p| p.is_likely_logger())
        .or_else(|| ports.first())
        .context("No serial ports found. Is the logger plugged in?")?;
    info!(port = %chosen.name, "Using port");
    Ok(chosen.name.clone())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Cmd::Ports => cmd_ports(),
        Cmd::Convert { input, out, stdout } => cmd_convert(input, out.as_deref(), *stdout),
        Cmd::Info { json } => {
            let config = load_config(&cli)?;
            let port = resolve_port(cli.port.as_deref())?;
            let record = protocol::info(&SystemPorts, &port, &config)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&record)?);
            } else {
                println!("{}", record);
            }
            Ok(())
        }
        Cmd::Head => {
            let config = load_config(&cli)?;
            let port = resolve_port(cli.port.as_deref())?;
            let peek = with_link(&SystemPorts, &port, &config, head)?;
            if peek.bytes.is_empty() {
                println!("No log stored");
                return Ok(());
            }
            for (i, row) in peek.bytes.chunks(16).enumerate() {
                println!("{:04x}  {}", i * 16, hex_row(row));
            }
            match peek.header {
                Some(h) => println!(
                    "format=0x{:04X} uid=0x{:016X} odr={}Hz range=±{}g gyro=±{}dps samples={} dropped={}",
                    h.format_ver,
                    h.device_uid,
                    h.odr_hz,
                    h.range_g,
                    h.gyro_range_dps,
                    h.total_samples,
                    h.dropped_samples
                ),
                None => println!("No valid header in the first bytes"),
            }
            Ok(())
        }
        Cmd::Dump { out, csv, session } => {
            let config = load_config(&cli)?;
            let port = resolve_port(cli.port.as_deref())?;
            cmd_dump(&port, &config, out, *csv, session.as_deref())
        }
        Cmd::Erase | Cmd::Start | Cmd::Stop => {
            let cmd = match cli.command {
                Cmd::Erase => Command::Erase,
                Cmd::Start => Command::Start,
                _ => Command::Stop,
            };
            let config = load_config(&cli)?;
            let port = resolve_port(cli.port.as_deref())?;
            with_link(&SystemPorts, &port, &config, |link| control(link, cmd))?;
            println!("{} OK", cmd.as_str());
            Ok(())
        }
        Cmd::Regs => {
            let config = load_config(&cli)?;
            let port = resolve_port(cli.port.as_deref())?;
            println!("{}", with_link(&SystemPorts, &port, &config, regs)?);
            Ok(())
        }
    }
}

fn hex_row(row: &[u8]) -> String {
    row.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

fn cmd_ports() -> Result<()> {
    let ports = list_ports();
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for p in ports {
        let ids = match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => format!("{:04x}:{:04x}", vid, pid),
            _ => "-".to_string(),
        };
        let mark = if p.is_likely_logger() { "*" } else { " " };
        println!(
            "{} {:<16} {:<10} {}",
            mark,
            p.name,
            ids,
            p.product.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn cmd_convert(input: &Path, out: Option<&Path>, to_stdout: bool) -> Result<()> {
    if to_stdout {
        let log = decode_file(input).with_context(|| format!("Failed to decode {}", input.display()))?;
        write_csv(io::stdout().lock(), &log)?;
        return Ok(());
    }
    let (log, csv_path) =
        convert_file(input, out).with_context(|| format!("Failed to convert {}", input.display()))?;
    if log.source.is_synthesized() {
        warn!("File has no header; assumed {} Hz, ±{} g", log.header.odr_hz, log.header.range_g);
    }
    println!(
        "{} samples ({:.1} s) -> {}",
        log.samples.len(),
        log.duration_secs(),
        csv_path.display()
    );
    Ok(())
}

fn cmd_dump(
    port: &str,
    config: &LinkConfig,
    out: &Path,
    csv: bool,
    session_path: Option<&Path>,
) -> Result<()> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = File::create(out).with_context(|| format!("Failed to create {}", out.display()))?;

    let (mut link, baud) = negotiate(&SystemPorts, port, config)?;
    info!(port, baud, "Connected");

    let mut session = None;
    let mut last_pct = None;
    for event in DumpTransfer::new(&mut link, BufWriter::new(file), config) {
        match event.with_context(|| format!("Dump failed; partial data left in {}", out.display()))? {
            DumpEvent::Accepted { total_bytes, .. } => {
                info!(total_bytes, "Device is sending its log");
            }
            DumpEvent::Synced(HeaderSync::Aligned { preamble, .. }) if preamble > 0 => {
                info!(preamble, "Skipped bytes before the log header");
            }
            DumpEvent::Synced(HeaderSync::BestEffort { .. }) => {
                warn!("Log header not found in the stream; saved bytes as received");
            }
            DumpEvent::Synced(_) => {}
            DumpEvent::Progress { done, total } => {
                let pct = done * 100 / total.max(1);
                if last_pct != Some(pct) {
                    eprint!("\r{:>3}% {}/{} bytes", pct, done, total);
                    last_pct = Some(pct);
                }
            }
            DumpEvent::Completed(s) => session = Some(s),
        }
    }
    if last_pct.is_some() {
        eprintln!();
    }
    drop(link);

    let session = match session {
        Some(s) => s,
        None => bail!("Transfer ended without DONE"),
    };
    println!("Saved {} bytes to {}", session.total_bytes, out.display());

    if let Some(path) = session_path {
        let json = serde_json::to_string_pretty(&session)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    }

    if csv && session.total_bytes > 0 {
        let (log, csv_path) = convert_file(out, None)
            .with_context(|| format!("Failed to convert {}", out.display()))?;
        println!("{} samples -> {}", log.samples.len(), csv_path.display());
        if let Some(est) = estimate_start_time(&log.header, log.samples.len(), Some(&session)) {
            println!("Recording started around {} ({:?})", est.start, est.basis);
        }
    }
    Ok(())
}

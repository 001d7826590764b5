//! CAN DBC Decoder CLI Application
//!
//! Command-line front end for the can-dbc-decoder library:
//! - Load a DBC file and print the signal schema
//! - Decode candump log files (in parallel) to physical signal values
//! - Encode single frames from `NAME=VALUE` pairs

use anyhow::{bail, Context, Result};
use can_dbc_decoder::{FrameDecoder, Schema};
use clap::Parser;
use rayon::prelude::*;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

mod config;
mod logfile;
mod report;

use config::{AppConfig, OutputFormat};

/// CAN DBC Decoder - Decode and encode CAN frames with a DBC signal database
#[derive(Parser, Debug)]
#[command(name = "can-dbc-cli")]
#[command(about = "Decode and encode CAN frames using a DBC file", long_about = None)]
#[command(version)]
struct Args {
    /// Path to the DBC file
    #[arg(long, value_name = "FILE")]
    dbc: Option<PathBuf>,

    /// Path to candump log file(s) to decode (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    log: Vec<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format for decoded frames
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Encode one frame for this message ID (decimal or 0x-prefixed hex)
    #[arg(long, value_name = "ID", value_parser = parse_can_id)]
    encode: Option<u32>,

    /// Signal value for --encode (can be repeated)
    #[arg(long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    set: Vec<(String, f64)>,

    /// Only decode these message IDs (can be repeated)
    #[arg(long = "message-id", value_name = "ID", value_parser = parse_can_id)]
    message_id: Vec<u32>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN DBC Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", can_dbc_decoder::VERSION);

    let mut app_config = match &args.config {
        Some(path) => config::load_config(path)?,
        None => AppConfig::default(),
    };
    apply_overrides(&mut app_config, &args);

    let Some(dbc_path) = app_config.input.dbc_files.first().cloned() else {
        bail!("No DBC file given: use --dbc or [input] dbc_files in the config file");
    };
    let schema = Schema::from_file(&dbc_path)
        .with_context(|| format!("Failed to load DBC file: {:?}", dbc_path))?;

    if let Some(can_id) = args.encode {
        encode_mode(&schema, can_id, &args.set)
    } else if !app_config.input.log_files.is_empty() {
        for log_path in &app_config.input.log_files {
            decode_mode(&schema, log_path, &app_config)?;
        }
        Ok(())
    } else {
        print!("{}", report::schema_summary(&schema));
        Ok(())
    }
}

/// Command-line flags take precedence over the config file
fn apply_overrides(config: &mut AppConfig, args: &Args) {
    if let Some(dbc) = &args.dbc {
        config.input.dbc_files = vec![dbc.clone()];
    }
    if !args.log.is_empty() {
        config.input.log_files = args.log.clone();
    }
    if !args.message_id.is_empty() {
        config.filtering.message_ids = Some(args.message_id.clone());
    }
    if let Some(format) = args.format {
        config.output.format = format;
    }
}

/// Decode mode - read a log, decode all frames in parallel, print in order
fn decode_mode(schema: &Schema, log_path: &Path, config: &AppConfig) -> Result<()> {
    let entries = logfile::read_log(log_path)?;
    let decoder = FrameDecoder::new(schema, config.decoder_config());

    let outcomes: Vec<_> = entries
        .par_iter()
        .map(|entry| decoder.decode_frame(&entry.frame))
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failures = 0usize;
    for (entry, outcome) in entries.iter().zip(&outcomes) {
        if outcome.is_err() {
            failures += 1;
        }
        if let Some(line) = report::render_entry(schema, entry, outcome, config.output.format) {
            writeln!(out, "{}", line)?;
        }
    }

    log::info!(
        "Decoded {} frames from {:?} ({} failed)",
        entries.len(),
        log_path,
        failures
    );
    Ok(())
}

/// Encode mode - build one frame and print it in candump notation
fn encode_mode(schema: &Schema, can_id: u32, assignments: &[(String, f64)]) -> Result<()> {
    let values: HashMap<String, f64> = assignments.iter().cloned().collect();
    let frame = schema
        .encode_frame(can_id, &values)
        .with_context(|| format!("Failed to encode message 0x{:X}", can_id))?;

    println!("{}", logfile::format_frame(&frame));
    Ok(())
}

fn parse_can_id(text: &str) -> std::result::Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid CAN ID '{}': {}", text, e))
}

fn parse_assignment(text: &str) -> std::result::Result<(String, f64), String> {
    let (name, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", text))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("invalid value for {}: {}", name, e))?;
    Ok((name.trim().to_string(), value))
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

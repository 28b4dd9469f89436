//! Command-line front-end: reads a capture file, drives the decoder
//! worker over it block by block, prints each decoded frame, and
//! optionally persists everything it saw to a JSON frame archive.

mod config;
mod logging;

use std::path::PathBuf;
use std::time::Instant;

use clap::Parser;
use color_eyre::eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};

use config::{CliConfig, LogLevel};
use logging::StructuredLogger;
use rfid_core::{archive, capture, DecoderWorker, SampleBlock};

/// Decode NFC-A/B/F/V traffic out of a captured I/Q recording.
#[derive(Debug, Parser)]
#[command(name = "rfid-decode", version, about)]
struct Cli {
    /// Capture file to decode (RIFF/WAVE with an optional META chunk).
    input: PathBuf,

    /// Path to a TOML configuration file; unset fields keep their defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write every decoded frame to this path as a JSON archive.
    #[arg(short, long)]
    archive_output: Option<PathBuf>,

    /// Stop after this many seconds of capture time; -1 decodes the whole file.
    #[arg(short = 't', long, default_value_t = -1.0)]
    time_limit: f64,

    /// Record the optional per-sample debug tap channels (§4.I).
    #[arg(long)]
    debug: bool,

    /// Raise the log level to debug and switch to verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit log events as JSON lines instead of pretty-printed text.
    #[arg(long)]
    json_log: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut app_config = match &cli.config {
        Some(path) => CliConfig::from_file(path)?,
        None => CliConfig::default(),
    };

    if cli.debug {
        app_config.decoder.debug_channels_enabled = true;
    }
    if cli.verbose {
        app_config.logging.level = LogLevel::Debug;
    }
    if cli.json_log {
        app_config.logging.format = config::LogFormat::Json;
    }

    let logger = StructuredLogger::new(app_config.logging.format);

    let capture_file = capture::read(&cli.input)
        .with_context(|| format!("failed to read capture file {}", cli.input.display()))?;

    app_config.decoder.sample_rate = capture_file.sample_rate;
    let mut worker = DecoderWorker::new(app_config.decoder.clone())?;

    let time_limit_samples = if cli.time_limit < 0.0 {
        None
    } else {
        Some((cli.time_limit * f64::from(capture_file.sample_rate)) as usize)
    };

    let total = time_limit_samples
        .unwrap_or(capture_file.samples.len())
        .min(capture_file.samples.len());

    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} samples ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let (frame_tx, frame_rx) = crossbeam_channel::unbounded();
    let started = Instant::now();
    let mut frames = Vec::new();

    for chunk in capture_file.samples[..total].chunks(app_config.block_size) {
        let block = SampleBlock {
            sample_rate: capture_file.sample_rate,
            first_sample: 0,
            first_sample_time: chrono::Utc::now(),
            channel_layout: capture_file.channel_layout,
            samples: chunk.to_vec(),
        };
        worker.process_block(&block, &frame_tx);
        progress.inc(chunk.len() as u64);

        while let Ok(frame) = frame_rx.try_recv() {
            logger.frame(&frame);
            frames.push(frame);
        }
    }

    // Flush whatever was still in flight at end of capture.
    let eof_block = SampleBlock {
        sample_rate: capture_file.sample_rate,
        first_sample: 0,
        first_sample_time: chrono::Utc::now(),
        channel_layout: capture_file.channel_layout,
        samples: Vec::new(),
    };
    worker.process_block(&eof_block, &frame_tx);
    while let Ok(frame) = frame_rx.try_recv() {
        logger.frame(&frame);
        frames.push(frame);
    }

    progress.finish_and_clear();
    logger.info(format!(
        "decoded {} frame(s) from {} sample(s) in {:.2}s",
        frames.len(),
        total,
        started.elapsed().as_secs_f64()
    ));

    if let Some(path) = &cli.archive_output {
        let json = archive::to_json(&frames)?;
        std::fs::write(path, json).with_context(|| format!("failed to write archive to {}", path.display()))?;
        logger.info(format!("wrote archive to {}", path.display()));
    }

    Ok(())
}

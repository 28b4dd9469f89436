//! Decoder error types with granular categories.
//!
//! Per the error-handling design, problems that occur *inside* a frame are
//! never represented here — they become flags on the emitted
//! [`crate::types::RawFrame`]. This module covers pre-session configuration
//! problems, session-fatal device failures, and I/O problems in the two
//! data-format codecs the core owns (capture files, frame archives); the
//! CLI crate only adds path/argument context on top via `color_eyre`.

use thiserror::Error;

/// Top-level error type for all decoder operations.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("device error: {0}")]
    Device(#[from] DeviceError),

    #[error("capture file error: {0}")]
    Capture(#[from] CaptureError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),
}

/// Pre-session configuration errors. The session is never started if one
/// of these is returned.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid sample rate: {rate} Hz (must be > 0)")]
    InvalidSampleRate { rate: u32 },

    #[error("invalid modulation depth range for {tech}: min={min}, max={max}")]
    InvalidModulationRange { tech: &'static str, min: f32, max: f32 },

    #[error("invalid correlation threshold for {tech}: {value} (must be in (0, 1])")]
    InvalidCorrelationThreshold { tech: &'static str, value: f32 },

    #[error("unknown device source: {name}")]
    UnknownDevice { name: String },
}

/// Session-fatal device errors (open failure, disconnect mid-stream).
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("failed to open device {name}: {reason}")]
    OpenFailed { name: String, reason: String },

    #[error("device disconnected mid-stream: {reason}")]
    Disconnected { reason: String },
}

/// Capture-file codec errors (RIFF/WAVE + `META` chunk, §6).
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV codec error: {0}")]
    Wav(#[from] hound::Error),

    #[error("not a RIFF/WAVE file")]
    NotRiff,

    #[error("missing required chunk: {0}")]
    MissingChunk(&'static str),

    #[error("unsupported sample format: audio_format={audio_format}, bits_per_sample={bits_per_sample}")]
    UnsupportedFormat { audio_format: u16, bits_per_sample: u16 },

    #[error("truncated chunk: {0}")]
    TruncatedChunk(&'static str),
}

/// JSON frame archive codec errors (§6).
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid hex byte sequence: {0:?}")]
    InvalidHex(String),
}

/// Result type alias for decoder operations.
pub type Result<T> = std::result::Result<T, DecoderError>;

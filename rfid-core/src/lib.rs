//! Signal-to-frame decoder pipeline for NFC-A/B/F/V and ISO 7816-3.
//!
//! This crate has no knowledge of SDR hardware, WAV files, or CLI
//! argument parsing: it consumes [`types::SampleBlock`]s and emits
//! [`types::RawFrame`]s (or, for contact cards, consumes
//! [`iso7816::CardEvent`]s through [`iso7816::Iso7816Decoder`]). Callers
//! own everything upstream (acquisition) and downstream (persistence,
//! presentation) of this boundary.

pub mod archive;
pub mod bitrate;
pub mod capture;
pub mod config;
pub mod crc;
pub mod debug_taps;
pub mod errors;
pub mod frame_state;
pub mod iso7816;
pub mod logging;
pub mod modulation;
pub mod protocol;
pub mod ring;
pub mod sample;
pub mod stream;
pub mod tech;
pub mod types;
pub mod utils;
pub mod worker;

pub use config::DecoderConfig;
pub use errors::{ArchiveError, CaptureError, ConfigError, DecoderError, DeviceError, Result};
pub use frame_state::FrameType;
pub use types::{ChannelLayout, DecoderStatus, FrameFlags, FramePhase, RawFrame, SampleBlock, TechType};
pub use worker::{run, DecoderWorker, WorkerCommand};

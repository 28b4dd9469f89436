//! Shared value types that flow across the decoder pipeline boundaries:
//! the technology enum, frame records, sample blocks, and status reports.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::frame_state::FrameType;

/// The radio technology a detector or frame belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TechType {
    NfcA,
    NfcB,
    NfcF,
    NfcV,
    Iso7816,
}

impl TechType {
    pub fn label(&self) -> &'static str {
        match self {
            TechType::NfcA => "NFC-A",
            TechType::NfcB => "NFC-B",
            TechType::NfcF => "NFC-F",
            TechType::NfcV => "NFC-V",
            TechType::Iso7816 => "ISO7816",
        }
    }

    pub fn is_contactless(&self) -> bool {
        !matches!(self, TechType::Iso7816)
    }
}

/// Which part of the protocol exchange a frame belongs to: RF carrier
/// on/off events, the sense/anticollision phase (REQ/WUP/HLT), the
/// selection phase (SEL/RATS/ATTRIB), or general application traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FramePhase {
    Carrier,
    Sense,
    Selection,
    Application,
}

/// Flags describing anomalies observed while decoding a single frame.
/// These are never surfaced as `Result` errors: a frame with a bad CRC is
/// still a frame, just one flagged `CrcError`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameFlags {
    pub encrypted: bool,
    pub truncated: bool,
    pub crc_error: bool,
    pub parity_error: bool,
    pub sync_error: bool,
}

impl FrameFlags {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_clean(&self) -> bool {
        *self == Self::default()
    }
}

/// A fully decoded (or partially decoded, if truncated) protocol frame,
/// timestamped both in samples and wall-clock time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFrame {
    pub tech: TechType,
    pub frame_type: FrameType,
    pub phase: FramePhase,
    pub sample_start: u64,
    pub sample_end: u64,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub bitrate: u32,
    pub flags: FrameFlags,
    pub data: Vec<u8>,
}

impl RawFrame {
    pub fn duration_samples(&self) -> u64 {
        self.sample_end.saturating_sub(self.sample_start)
    }

    pub fn duration(&self) -> Duration {
        (self.time_end - self.time_start)
            .to_std()
            .unwrap_or_default()
    }

    pub fn hex(&self) -> String {
        self.data
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// Whether a [`SampleBlock`]'s originating capture carried one real channel
/// or a complex I/Q pair. Samples are always presented to the core as
/// complex; a `Real` block simply has its imaginary component pinned to
/// zero, so the rest of the pipeline never branches on this value — it is
/// carried through only for diagnostics and for the capture-file codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelLayout {
    Real,
    IQ,
}

/// A contiguous block of raw samples handed to the decoder worker. Samples
/// are always presented as complex I/Q; a real-valued capture populates
/// the imaginary component with zero upstream of this type.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    pub sample_rate: u32,
    pub first_sample: u64,
    pub first_sample_time: DateTime<Utc>,
    pub channel_layout: ChannelLayout,
    pub samples: Vec<num_complex::Complex32>,
}

impl SampleBlock {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// A point-in-time status report published by the decoder worker, mirroring
/// the status payload the reference task publishes on its control channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderStatus {
    pub queue_size: usize,
    pub sample_rate: u32,
    pub stream_time: f64,
    pub nfca_enabled: bool,
    pub nfcb_enabled: bool,
    pub nfcf_enabled: bool,
    pub nfcv_enabled: bool,
    /// Frames evicted by the worker's sink staging buffer because the
    /// caller-supplied frame channel stayed full (§5).
    pub dropped_frames: u64,
}

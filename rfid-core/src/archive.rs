//! JSON frame archive codec (§6): the flat, display-oriented record format
//! the wider application persists decoded traffic to, independent of the
//! capture file that produced it.
//!
//! The archive schema carries no `tech_type` field — it is a log of what a
//! reader saw on the air, not a replay format, so [`ArchiveFrame`] (not
//! [`crate::types::RawFrame`]) is this module's native type. Conversion
//! from a `RawFrame` is one-way for that reason; see DESIGN.md for the
//! provenance of this choice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ArchiveError;
use crate::types::{FrameFlags, FramePhase, RawFrame};
use crate::utils::{from_hex_colon, hex_colon};

/// One decoded frame as persisted to the protocol output archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveFrame {
    #[serde(rename = "sampleStart")]
    pub sample_start: u64,
    #[serde(rename = "sampleEnd")]
    pub sample_end: u64,
    #[serde(rename = "timeStart")]
    pub time_start: DateTime<Utc>,
    #[serde(rename = "timeEnd")]
    pub time_end: DateTime<Utc>,
    /// The frame's leading command byte, formatted as `"0xHH"`, or `""`
    /// for an empty payload (e.g. a bare carrier/VCC line event).
    #[serde(rename = "frameCmd")]
    pub frame_cmd: String,
    #[serde(rename = "frameRate")]
    pub frame_rate: u32,
    /// Every flag set on the frame, by name (`"CrcError"`, `"Truncated"`,
    /// …); empty when the frame is clean.
    #[serde(rename = "frameFlags")]
    pub frame_flags: Vec<String>,
    #[serde(rename = "framePhase")]
    pub frame_phase: String,
    #[serde(rename = "frameData")]
    pub frame_data: String,
}

fn phase_name(phase: FramePhase) -> &'static str {
    match phase {
        FramePhase::Carrier => "Carrier",
        FramePhase::Sense => "Sense",
        FramePhase::Selection => "Selection",
        FramePhase::Application => "Application",
    }
}

fn phase_from_name(name: &str) -> FramePhase {
    match name {
        "Sense" => FramePhase::Sense,
        "Selection" => FramePhase::Selection,
        "Application" => FramePhase::Application,
        _ => FramePhase::Carrier,
    }
}

fn flag_names(flags: FrameFlags) -> Vec<String> {
    let mut names = Vec::new();
    if flags.encrypted {
        names.push("Encrypted".to_string());
    }
    if flags.truncated {
        names.push("Truncated".to_string());
    }
    if flags.crc_error {
        names.push("CrcError".to_string());
    }
    if flags.parity_error {
        names.push("ParityError".to_string());
    }
    if flags.sync_error {
        names.push("SyncError".to_string());
    }
    names
}

fn flags_from_names(names: &[String]) -> FrameFlags {
    let mut flags = FrameFlags::none();
    for name in names {
        match name.as_str() {
            "Encrypted" => flags.encrypted = true,
            "Truncated" => flags.truncated = true,
            "CrcError" => flags.crc_error = true,
            "ParityError" => flags.parity_error = true,
            "SyncError" => flags.sync_error = true,
            _ => {}
        }
    }
    flags
}

impl ArchiveFrame {
    /// Project a decoded [`RawFrame`] into its archive record.
    pub fn from_raw_frame(frame: &RawFrame) -> Self {
        Self {
            sample_start: frame.sample_start,
            sample_end: frame.sample_end,
            time_start: frame.time_start,
            time_end: frame.time_end,
            frame_cmd: frame.data.first().map(|b| format!("0x{b:02X}")).unwrap_or_default(),
            frame_rate: frame.bitrate,
            frame_flags: flag_names(frame.flags),
            frame_phase: phase_name(frame.phase).to_string(),
            frame_data: hex_colon(&frame.data),
        }
    }

    /// Recover the flags and frame-level fields this archive record can
    /// still express (sample range, timestamps, rate, flags, phase, and
    /// data). The technology tag is not recoverable (§6 omits it from the
    /// archive schema); callers that need it must track it out of band.
    pub fn flags(&self) -> FrameFlags {
        flags_from_names(&self.frame_flags)
    }

    pub fn phase(&self) -> FramePhase {
        phase_from_name(&self.frame_phase)
    }

    pub fn data(&self) -> Result<Vec<u8>, ArchiveError> {
        from_hex_colon(&self.frame_data).ok_or_else(|| ArchiveError::InvalidHex(self.frame_data.clone()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Archive {
    frames: Vec<ArchiveFrame>,
}

/// Serialize a sequence of frames into the `{"frames": [...]}` JSON
/// archive document, pretty-printed for readability.
pub fn to_json(frames: &[RawFrame]) -> Result<String, ArchiveError> {
    let archive = Archive {
        frames: frames.iter().map(ArchiveFrame::from_raw_frame).collect(),
    };
    Ok(serde_json::to_string_pretty(&archive)?)
}

/// Parse a `{"frames": [...]}` JSON archive document back into
/// [`ArchiveFrame`] records.
pub fn from_json(json: &str) -> Result<Vec<ArchiveFrame>, ArchiveError> {
    let archive: Archive = serde_json::from_str(json)?;
    Ok(archive.frames)
}

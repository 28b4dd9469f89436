//! Structured event log the CLI prints to stderr as frames and status
//! reports arrive, in either a human-readable or a JSON-lines form.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::LogFormat;
use rfid_core::{DecoderStatus, RawFrame};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    FrameDecoded(FrameDecodedEvent),
    Status(StatusEvent),
    Info { message: String },
    Warn { message: String },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameDecodedEvent {
    pub time: DateTime<Utc>,
    pub tech: &'static str,
    pub frame_type: String,
    pub phase: String,
    pub bitrate: u32,
    pub hex: String,
    pub flags_clean: bool,
}

impl FrameDecodedEvent {
    pub fn from_frame(frame: &RawFrame) -> Self {
        Self {
            time: frame.time_start,
            tech: frame.tech.label(),
            frame_type: format!("{:?}", frame.frame_type),
            phase: format!("{:?}", frame.phase),
            bitrate: frame.bitrate,
            hex: frame.hex(),
            flags_clean: frame.flags.is_clean(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub queue_size: usize,
    pub stream_time: f64,
    pub dropped_frames: u64,
}

impl StatusEvent {
    pub fn from_status(status: &DecoderStatus) -> Self {
        Self {
            queue_size: status.queue_size,
            stream_time: status.stream_time,
            dropped_frames: status.dropped_frames,
        }
    }
}

/// Renders [`LogEvent`]s to stderr in the configured format. Holds no
/// buffered state of its own; the worker's own [`rfid_core::logging::SignalLogger`]
/// is what accumulates history for later inspection.
pub struct StructuredLogger {
    format: LogFormat,
}

impl StructuredLogger {
    pub fn new(format: LogFormat) -> Self {
        Self { format }
    }

    pub fn emit(&self, event: &LogEvent) {
        match self.format {
            LogFormat::Json => {
                if let Ok(line) = serde_json::to_string(event) {
                    eprintln!("{line}");
                }
            }
            LogFormat::Pretty => eprintln!("{}", render_pretty(event)),
        }
    }

    pub fn frame(&self, frame: &RawFrame) {
        self.emit(&LogEvent::FrameDecoded(FrameDecodedEvent::from_frame(frame)));
    }

    pub fn status(&self, status: &DecoderStatus) {
        self.emit(&LogEvent::Status(StatusEvent::from_status(status)));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(&LogEvent::Info { message: message.into() });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(&LogEvent::Warn { message: message.into() });
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(&LogEvent::Error { message: message.into() });
    }
}

fn render_pretty(event: &LogEvent) -> String {
    match event {
        LogEvent::FrameDecoded(f) => {
            let flag_marker = if f.flags_clean { "" } else { " [flagged]" };
            format!("{} {} {:>9} {}bps  {}{flag_marker}", f.time.format("%H:%M:%S%.3f"), f.tech, f.phase, f.bitrate, f.hex)
        }
        LogEvent::Status(s) => {
            format!("status: queue={} stream_time={:.3}s dropped={}", s.queue_size, s.stream_time, s.dropped_frames)
        }
        LogEvent::Info { message } => format!("INFO  {message}"),
        LogEvent::Warn { message } => format!("WARN  {message}"),
        LogEvent::Error { message } => format!("ERROR {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rfid_core::{FrameFlags, FramePhase, FrameType, TechType};

    fn sample_frame() -> RawFrame {
        let now = Utc::now();
        RawFrame {
            tech: TechType::NfcA,
            frame_type: FrameType::Poll,
            phase: FramePhase::Sense,
            sample_start: 0,
            sample_end: 10,
            time_start: now,
            time_end: now,
            bitrate: 106_000,
            flags: FrameFlags::none(),
            data: vec![0x26],
        }
    }

    #[test]
    fn frame_event_marks_flagged_frames() {
        let mut frame = sample_frame();
        frame.flags.crc_error = true;
        let event = FrameDecodedEvent::from_frame(&frame);
        assert!(!event.flags_clean);
    }

    #[test]
    fn pretty_render_includes_hex_payload() {
        let event = LogEvent::FrameDecoded(FrameDecodedEvent::from_frame(&sample_frame()));
        assert!(render_pretty(&event).contains("26"));
    }
}

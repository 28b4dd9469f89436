//! NFC-B (ISO 14443-3 Type B): NRZ-L ASK on the poll side, BPSK subcarrier
//! on the listen side.

use chrono::Utc;

use crate::bitrate::{build_bitrate_table, BitrateParams};
use crate::config::TechConfig;
use crate::crc::{append_le, nfcb_crc, verify_le};
use crate::frame_state::FrameType;
use crate::stream::StreamStatus;
use crate::tech::{finalize_flags, SampleTick, SymbolGate, TechDecoder, TechState, TickOutcome};
use crate::types::{FramePhase, RawFrame, TechType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BitCell {
    Zero,
    One,
}

fn classify(tick: SampleTick, config: &TechConfig) -> Option<BitCell> {
    let threshold = config.correlation_threshold * tick.envelope_peak;
    let modulated = tick.correlation.abs() > threshold
        && tick.modulation_depth >= config.min_modulation_deep
        && tick.modulation_depth <= config.max_modulation_deep;

    if !modulated {
        None
    } else if tick.correlation < 0.0 {
        Some(BitCell::Zero)
    } else {
        Some(BitCell::One)
    }
}

/// NRZ-L framing: start bit `0`, 8 data bits LSB-first, stop bit `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteFrame {
    AwaitStart,
    Data(u8),
    AwaitStop,
}

pub struct NfcBDecoder {
    state: TechState,
    phase: FramePhase,
    stream: StreamStatus,
    max_frame_size: usize,
    frame_start: u64,
    frame_start_time: chrono::DateTime<Utc>,
    bitrate: u32,
    gate: SymbolGate,
    byte_frame: ByteFrame,
    idle_cells: u8,
}

impl NfcBDecoder {
    pub fn new(sample_rate: u32, max_frame_size: usize) -> Self {
        let params = Self::params(sample_rate);
        Self {
            state: TechState::Idle,
            phase: FramePhase::Sense,
            stream: StreamStatus::new(max_frame_size),
            max_frame_size,
            frame_start: 0,
            frame_start_time: Utc::now(),
            bitrate: 106_000,
            gate: SymbolGate::new(u64::from(params.period0_symbol_samples)),
            byte_frame: ByteFrame::AwaitStart,
            idle_cells: 0,
        }
    }

    fn params(sample_rate: u32) -> BitrateParams {
        build_bitrate_table(TechType::NfcB, sample_rate, 1)[0]
    }

    fn begin_frame(&mut self, sample_clock: u64) {
        self.state = TechState::PreambleLocked;
        self.stream.reset(self.max_frame_size);
        self.frame_start = sample_clock;
        self.frame_start_time = Utc::now();
        self.gate.reset();
        self.byte_frame = ByteFrame::AwaitStart;
        self.idle_cells = 0;
    }

    fn emit(&mut self, sample_clock: u64) -> TickOutcome {
        let data = self.stream.bytes.clone();
        let crc_ok = if data.len() >= 3 {
            verify_le(&data, nfcb_crc)
        } else {
            true
        };
        let flags = finalize_flags(&self.stream, crc_ok, true, true);

        let frame = RawFrame {
            tech: TechType::NfcB,
            frame_type: FrameType::Poll,
            phase: self.phase,
            sample_start: self.frame_start,
            sample_end: sample_clock,
            time_start: self.frame_start_time,
            time_end: Utc::now(),
            bitrate: self.bitrate,
            flags,
            data,
        };

        self.state = TechState::Idle;
        TickOutcome::Frame(frame)
    }
}

impl TechDecoder for NfcBDecoder {
    fn state(&self) -> TechState {
        self.state
    }

    fn tick(&mut self, raw_tick: SampleTick, config: &TechConfig) -> TickOutcome {
        let Some(tick) = self.gate.observe(raw_tick) else {
            return TickOutcome::Continue;
        };
        let cell = classify(tick, config);

        match self.state {
            TechState::Idle => {
                // SOF begins with a 10-etu unmodulated pulse; the
                // detector bank has already qualified this before
                // handing control here, so the first unmodulated cell
                // observed commits the lock.
                if cell.is_none() {
                    self.begin_frame(tick.sample_clock);
                }
                TickOutcome::Continue
            }
            TechState::PreambleLocked | TechState::Data => {
                self.state = TechState::Data;

                match cell {
                    None => {
                        self.idle_cells += 1;
                        if self.idle_cells >= 10 && self.byte_frame == ByteFrame::AwaitStart && self.stream.bytes.is_empty() {
                            // still inside SOF guard, not EOF
                            TickOutcome::Continue
                        } else if self.idle_cells >= 2 {
                            self.state = TechState::Eof;
                            self.emit(tick.sample_clock)
                        } else {
                            TickOutcome::Continue
                        }
                    }
                    Some(bit) => {
                        self.idle_cells = 0;
                        self.advance_byte_frame(bit, tick.sample_clock)
                    }
                }
            }
            TechState::PreambleSearch | TechState::Eof | TechState::Emit => TickOutcome::Continue,
        }
    }

    fn abort(&mut self) -> Option<RawFrame> {
        if self.state == TechState::Idle || self.stream.bytes.is_empty() {
            self.state = TechState::Idle;
            return None;
        }
        let data = self.stream.bytes.clone();
        let frame = RawFrame {
            tech: TechType::NfcB,
            frame_type: FrameType::Poll,
            phase: self.phase,
            sample_start: self.frame_start,
            sample_end: self.frame_start,
            time_start: self.frame_start_time,
            time_end: Utc::now(),
            bitrate: self.bitrate,
            flags: crate::types::FrameFlags {
                truncated: true,
                ..crate::types::FrameFlags::none()
            },
            data,
        };
        self.state = TechState::Idle;
        Some(frame)
    }
}

impl NfcBDecoder {
    fn advance_byte_frame(&mut self, bit: BitCell, sample_clock: u64) -> TickOutcome {
        match self.byte_frame {
            ByteFrame::AwaitStart => {
                if bit == BitCell::Zero {
                    self.byte_frame = ByteFrame::Data(0);
                }
                TickOutcome::Continue
            }
            ByteFrame::Data(count) => {
                let value = if bit == BitCell::One { 1 } else { 0 };
                self.stream.push_bit(value);
                if count + 1 >= 8 {
                    self.byte_frame = ByteFrame::AwaitStop;
                } else {
                    self.byte_frame = ByteFrame::Data(count + 1);
                }
                if self.stream.is_truncated() {
                    return self.emit(sample_clock);
                }
                TickOutcome::Continue
            }
            ByteFrame::AwaitStop => {
                self.byte_frame = ByteFrame::AwaitStart;
                TickOutcome::Continue
            }
        }
    }
}

pub fn with_crc(mut data: Vec<u8>) -> Vec<u8> {
    let crc = nfcb_crc(&data);
    append_le(&mut data, crc);
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(correlation: f32, modulation_depth: f32) -> SampleTick {
        SampleTick {
            sample_clock: 0,
            correlation,
            modulation_depth,
            envelope_peak: 1.0,
        }
    }

    #[test]
    fn classifies_unmodulated_as_none() {
        let config = TechConfig {
            min_modulation_deep: 0.1,
            max_modulation_deep: 0.75,
            correlation_threshold: 0.5,
            ..Default::default()
        };
        assert_eq!(classify(tick(0.1, 0.0), &config), None);
    }

    #[test]
    fn with_crc_roundtrips() {
        let frame = with_crc(vec![0x05, 0x00, 0x00]);
        assert!(verify_le(&frame, nfcb_crc));
    }
}

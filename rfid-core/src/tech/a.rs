//! NFC-A (ISO 14443-3 Type A): Modified Miller on the poll side, 106 kbps
//! Manchester subcarrier on the listen side.

use chrono::Utc;

use crate::bitrate::{build_bitrate_table, BitrateParams};
use crate::config::TechConfig;
use crate::crc::{append_le, even_parity_bit, nfca_crc, verify_le};
use crate::frame_state::FrameType;
use crate::stream::StreamStatus;
use crate::tech::{finalize_flags, SampleTick, SymbolGate, TechDecoder, TechState, TickOutcome};
use crate::types::{FramePhase, RawFrame, TechType};

/// Elementary Modified Miller / Manchester patterns recognized per
/// half-bit period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementaryPattern {
    /// No modulation in this half-bit.
    Y,
    /// Modulation at the start of the bit period (logical `1` on poll).
    Z,
    /// Modulation mid-bit (logical `0` on poll, used for Miller coding).
    X,
}

fn classify(tick: SampleTick, config: &TechConfig) -> ElementaryPattern {
    let threshold = config.correlation_threshold * tick.envelope_peak;
    let modulated = tick.correlation.abs() > threshold
        && tick.modulation_depth >= config.min_modulation_deep
        && tick.modulation_depth <= config.max_modulation_deep;

    if !modulated {
        ElementaryPattern::Y
    } else if tick.correlation < 0.0 {
        ElementaryPattern::Z
    } else {
        ElementaryPattern::X
    }
}

/// What a just-committed elementary pattern feeds: the next data bit, or
/// the parity bit trailing the byte just completed (ISO 14443-3 frames
/// carry one even-parity bit after every 8 data bits; short frames like
/// REQA/WUPA carry none).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteStage {
    Data,
    Parity(u8),
}

pub struct NfcADecoder {
    state: TechState,
    phase: FramePhase,
    stream: StreamStatus,
    max_frame_size: usize,
    frame_start: u64,
    frame_start_time: chrono::DateTime<Utc>,
    sample_rate: u32,
    bitrate: u32,
    gate: SymbolGate,
    stage: ByteStage,
    consecutive_y: u8,
}

impl NfcADecoder {
    pub fn new(sample_rate: u32, max_frame_size: usize) -> Self {
        let params = Self::params(sample_rate);
        Self {
            state: TechState::Idle,
            phase: FramePhase::Sense,
            stream: StreamStatus::new(max_frame_size),
            max_frame_size,
            frame_start: 0,
            frame_start_time: Utc::now(),
            sample_rate,
            bitrate: 106_000,
            gate: SymbolGate::new(u64::from(params.period0_symbol_samples)),
            stage: ByteStage::Data,
            consecutive_y: 0,
        }
    }

    fn params(sample_rate: u32) -> BitrateParams {
        build_bitrate_table(TechType::NfcA, sample_rate, 1)[0]
    }

    fn begin_frame(&mut self, sample_clock: u64) {
        self.state = TechState::PreambleLocked;
        self.stream.reset(self.max_frame_size);
        self.frame_start = sample_clock;
        self.frame_start_time = Utc::now();
        self.gate.reset();
        self.stage = ByteStage::Data;
        self.consecutive_y = 0;
    }

    fn emit(&mut self, sample_clock: u64) -> TickOutcome {
        if self.stream.bytes.is_empty() && self.stream.bit_count() == 7 {
            self.stream.push_short_byte(self.stream.partial_byte());
        }
        let data = self.stream.bytes.clone();
        let crc_ok = if data.len() >= 3 {
            verify_le(&data, nfca_crc)
        } else {
            true
        };
        let parity_ok = self.stream.parity_ok();
        let flags = finalize_flags(&self.stream, crc_ok, parity_ok, true);

        let frame = RawFrame {
            tech: TechType::NfcA,
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

impl TechDecoder for NfcADecoder {
    fn state(&self) -> TechState {
        self.state
    }

    fn tick(&mut self, raw_tick: SampleTick, config: &TechConfig) -> TickOutcome {
        let Some(tick) = self.gate.observe(raw_tick) else {
            return TickOutcome::Continue;
        };
        let pattern = classify(tick, config);

        match self.state {
            TechState::Idle => {
                if pattern == ElementaryPattern::Z {
                    self.begin_frame(tick.sample_clock);
                    TickOutcome::Continue
                } else {
                    TickOutcome::Continue
                }
            }
            TechState::PreambleLocked | TechState::Data => {
                self.state = TechState::Data;

                match pattern {
                    ElementaryPattern::Y => {
                        self.consecutive_y += 1;
                        if self.consecutive_y >= 2 {
                            self.state = TechState::Eof;
                            self.emit(tick.sample_clock)
                        } else {
                            TickOutcome::Continue
                        }
                    }
                    ElementaryPattern::Z => {
                        self.consecutive_y = 0;
                        self.commit_bit(1, tick.sample_clock)
                    }
                    ElementaryPattern::X => {
                        self.consecutive_y = 0;
                        self.commit_bit(0, tick.sample_clock)
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
            tech: TechType::NfcA,
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

impl NfcADecoder {
    /// Route one recovered bit either into the data stream, or check it
    /// as the parity bit trailing the byte `stage` says was just
    /// completed.
    fn commit_bit(&mut self, bit: u8, sample_clock: u64) -> TickOutcome {
        match self.stage {
            ByteStage::Data => {
                let committed = self.stream.push_bit(bit);
                if committed {
                    let last_byte = *self.stream.bytes.last().expect("just committed a byte");
                    self.stage = ByteStage::Parity(last_byte);
                }
                self.on_bit_committed(committed, sample_clock)
            }
            ByteStage::Parity(last_byte) => {
                self.stream.check_parity(last_byte, bit);
                self.stage = ByteStage::Data;
                TickOutcome::Continue
            }
        }
    }

    fn on_bit_committed(&mut self, committed: bool, sample_clock: u64) -> TickOutcome {
        if committed && self.stream.is_truncated() {
            return self.emit(sample_clock);
        }
        TickOutcome::Continue
    }
}

/// Append the even-parity bit for a just-committed full-length byte,
/// per ISO 14443-3 (short frames like REQA/WUPA omit it).
pub fn parity_for(byte: u8) -> u8 {
    even_parity_bit(byte)
}

/// Build a complete outgoing NFC-A frame with its CRC trailer appended,
/// used by tests and by the protocol tracker when synthesizing expected
/// responses for comparison.
pub fn with_crc(mut data: Vec<u8>) -> Vec<u8> {
    let crc = nfca_crc(&data);
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
    fn classifies_unmodulated_as_y() {
        let config = TechConfig {
            min_modulation_deep: 0.8,
            max_modulation_deep: 1.0,
            correlation_threshold: 0.5,
            ..Default::default()
        };
        assert_eq!(classify(tick(0.1, 0.0), &config), ElementaryPattern::Y);
    }

    #[test]
    fn classifies_negative_correlation_as_z() {
        let config = TechConfig {
            min_modulation_deep: 0.8,
            max_modulation_deep: 1.0,
            correlation_threshold: 0.5,
            ..Default::default()
        };
        assert_eq!(classify(tick(-0.9, 0.9), &config), ElementaryPattern::Z);
    }

    #[test]
    fn with_crc_matches_verification() {
        let frame = with_crc(vec![0x93, 0x20]);
        assert!(verify_le(&frame, nfca_crc));
    }

    fn test_config() -> TechConfig {
        TechConfig {
            min_modulation_deep: 0.8,
            max_modulation_deep: 1.0,
            correlation_threshold: 0.5,
            ..Default::default()
        }
    }

    /// Feed one symbol period's worth of identical ticks so the decoder's
    /// internal [`SymbolGate`] aggregates and commits exactly one pattern.
    fn feed_symbol(
        decoder: &mut NfcADecoder,
        config: &TechConfig,
        clock: &mut u64,
        correlation: f32,
        modulation_depth: f32,
        period: u64,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::Continue;
        for _ in 0..period {
            *clock += 1;
            outcome = decoder.tick(
                SampleTick {
                    sample_clock: *clock,
                    correlation,
                    modulation_depth,
                    envelope_peak: 1.0,
                },
                config,
            );
        }
        outcome
    }

    #[test]
    fn decodes_a_reqa_short_frame_with_no_parity_bit() {
        let config = test_config();
        let mut decoder = NfcADecoder::new(10_000_000, 256);
        let period = u64::from(NfcADecoder::params(10_000_000).period0_symbol_samples);
        let mut clock = 0u64;

        // Idle only leaves on a Z pattern, which it consumes as the
        // frame's start-of-communication marker rather than a data bit.
        feed_symbol(&mut decoder, &config, &mut clock, -0.9, 0.9, period);

        // REQA = 0x26, a 7-bit short frame, LSB first: 0,1,1,0,0,1,0.
        let bits = [0u8, 1, 1, 0, 0, 1, 0];
        for &bit in &bits {
            let (correlation, modulation_depth) = if bit == 1 { (-0.9, 0.9) } else { (0.9, 0.9) };
            let outcome = feed_symbol(&mut decoder, &config, &mut clock, correlation, modulation_depth, period);
            assert!(matches!(outcome, TickOutcome::Continue));
        }

        feed_symbol(&mut decoder, &config, &mut clock, 0.0, 0.0, period);
        let outcome = feed_symbol(&mut decoder, &config, &mut clock, 0.0, 0.0, period);

        match outcome {
            TickOutcome::Frame(frame) => {
                assert_eq!(frame.data, vec![0x26]);
                assert_eq!(frame.frame_type, FrameType::Poll);
                assert!(!frame.flags.parity_error);
            }
            other => panic!("expected a completed frame, got {other:?}"),
        }
    }
}

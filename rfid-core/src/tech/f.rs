//! NFC-F (FeliCa / JIS X 6319-4): Manchester-coded subcarrier at 212 or
//! 424 kbps, symmetric between poll and listen.

use chrono::Utc;

use crate::bitrate::{build_bitrate_table, BitrateParams};
use crate::config::TechConfig;
use crate::crc::{append_be, nfcf_crc, verify_be};
use crate::frame_state::FrameType;
use crate::modulation::NFCF_PREAMBLE_TRANSITIONS;
use crate::stream::StreamStatus;
use crate::tech::{finalize_flags, SampleTick, SymbolGate, TechDecoder, TechState, TickOutcome};
use crate::types::{FramePhase, RawFrame, TechType};

pub struct NfcFDecoder {
    state: TechState,
    phase: FramePhase,
    stream: StreamStatus,
    max_frame_size: usize,
    frame_start: u64,
    frame_start_time: chrono::DateTime<Utc>,
    bitrate: u32,
    /// Gates raw samples to one observation per half-bit, the Manchester
    /// transition granularity the preamble search keys on.
    preamble_gate: SymbolGate,
    /// Gates raw samples to one observation per full bit, the granularity
    /// a data-bit decision commits at.
    data_gate: SymbolGate,
    transition_count: u32,
    manchester_inverted: bool,
    last_correlation: f32,
    correlation_running_avg: f32,
    no_peak_run: u32,
}

impl NfcFDecoder {
    pub fn new(sample_rate: u32, max_frame_size: usize) -> Self {
        let params = Self::params(sample_rate);
        Self {
            state: TechState::Idle,
            phase: FramePhase::Sense,
            stream: StreamStatus::new(max_frame_size),
            max_frame_size,
            frame_start: 0,
            frame_start_time: Utc::now(),
            bitrate: params.symbols_per_second,
            preamble_gate: SymbolGate::new(u64::from(params.period1_symbol_samples)),
            data_gate: SymbolGate::new(u64::from(params.period0_symbol_samples)),
            transition_count: 0,
            manchester_inverted: false,
            last_correlation: 0.0,
            correlation_running_avg: 0.0,
            no_peak_run: 0,
        }
    }

    /// NFC-F's 212 kbps row; 424 kbps is not separately enabled by the
    /// detector bank (`worker.rs`'s single NFC-F candidate).
    fn params(sample_rate: u32) -> BitrateParams {
        build_bitrate_table(TechType::NfcF, sample_rate, 1)[1]
    }

    fn begin_frame(&mut self, sample_clock: u64) {
        self.state = TechState::PreambleLocked;
        self.stream.reset(self.max_frame_size);
        self.frame_start = sample_clock;
        self.frame_start_time = Utc::now();
        self.preamble_gate.reset();
        self.data_gate.reset();
        self.transition_count = 0;
        self.no_peak_run = 0;
    }

    fn emit(&mut self, sample_clock: u64) -> TickOutcome {
        let data = self.stream.bytes.clone();
        let crc_ok = if data.len() >= 4 {
            verify_be(&data[2..], nfcf_crc)
        } else {
            true
        };
        let flags = finalize_flags(&self.stream, crc_ok, true, true);

        let frame = RawFrame {
            tech: TechType::NfcF,
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

impl TechDecoder for NfcFDecoder {
    fn state(&self) -> TechState {
        self.state
    }

    fn tick(&mut self, raw_tick: SampleTick, config: &TechConfig) -> TickOutcome {
        match self.state {
            TechState::Idle | TechState::PreambleSearch => {
                let Some(tick) = self.preamble_gate.observe(raw_tick) else {
                    return TickOutcome::Continue;
                };
                let threshold = config.correlation_threshold * tick.envelope_peak;
                let has_transition = (tick.correlation - self.last_correlation).abs() > threshold * 0.1;

                self.state = TechState::PreambleSearch;
                self.correlation_running_avg += 0.05 * (tick.correlation - self.correlation_running_avg);

                if has_transition {
                    self.transition_count += 1;

                    if self.transition_count == NFCF_PREAMBLE_TRANSITIONS {
                        self.manchester_inverted = tick.correlation.abs() < self.correlation_running_avg.abs() * 0.5;
                    }

                    if self.transition_count >= NFCF_PREAMBLE_TRANSITIONS {
                        self.begin_frame(tick.sample_clock);
                    }
                } else {
                    self.transition_count = 0;
                }

                self.last_correlation = tick.correlation;
                TickOutcome::Continue
            }
            TechState::PreambleLocked | TechState::Data => {
                let Some(tick) = self.data_gate.observe(raw_tick) else {
                    return TickOutcome::Continue;
                };
                let threshold = config.correlation_threshold * tick.envelope_peak;
                self.state = TechState::Data;
                self.last_correlation = tick.correlation;

                let above_threshold = tick.correlation.abs() > threshold;
                if !above_threshold {
                    self.no_peak_run += 1;
                    if self.no_peak_run >= 8 {
                        self.state = TechState::Eof;
                        return self.emit(tick.sample_clock);
                    }
                    return TickOutcome::Continue;
                }
                self.no_peak_run = 0;

                let mut bit = if tick.correlation > 0.0 { 1 } else { 0 };
                if self.manchester_inverted {
                    bit ^= 1;
                }
                self.stream.push_bit(bit);

                if self.stream.is_truncated() {
                    return self.emit(tick.sample_clock);
                }
                if let Some(&len) = self.stream.bytes.first() {
                    if len as usize != 0 && self.stream.bytes.len() >= len as usize {
                        return self.emit(tick.sample_clock);
                    }
                }
                TickOutcome::Continue
            }
            TechState::Eof | TechState::Emit => TickOutcome::Continue,
        }
    }

    fn abort(&mut self) -> Option<RawFrame> {
        if self.state == TechState::Idle || self.stream.bytes.is_empty() {
            self.state = TechState::Idle;
            return None;
        }
        let data = self.stream.bytes.clone();
        let frame = RawFrame {
            tech: TechType::NfcF,
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

pub fn with_crc(mut data: Vec<u8>) -> Vec<u8> {
    let crc = nfcf_crc(&data[2..]);
    append_be(&mut data, crc);
    data
}

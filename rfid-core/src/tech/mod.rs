//! Per-technology detector + symbol state machines.
//!
//! Each technology module owns its own [`BitrateParams`] table,
//! [`ModulationStatus`] array, and symbol recovery state machine, but all
//! share the `Idle -> PreambleSearch -> PreambleLocked -> Data -> Eof ->
//! Emit -> Idle` contract described by [`TechState`].

pub mod a;
pub mod b;
pub mod f;
pub mod v;

use crate::config::TechConfig;
use crate::stream::StreamStatus;
use crate::types::{FrameFlags, RawFrame};

/// Shared state-machine stage, common to every technology's symbol
/// recovery process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TechState {
    Idle,
    PreambleSearch,
    PreambleLocked,
    Data,
    Eof,
    Emit,
}

/// Outcome of feeding one more sample into a technology's state machine.
#[derive(Debug)]
pub enum TickOutcome {
    /// No frame is ready yet; keep feeding samples.
    Continue,
    /// A frame was fully recovered (clean or flagged).
    Frame(RawFrame),
    /// The detector gave up on this attempt and returned to idle.
    Reset,
}

/// The per-sample values the detector bank has already derived by the
/// time a symbol state machine is driven: correlation factor and
/// modulation depth at the current phase, plus the absolute sample
/// clock. Keeping the correlator math in [`crate::modulation`] and
/// [`crate::sample`] lets each tech module focus purely on the
/// pattern-to-bit and framing semantics that differ between them.
#[derive(Debug, Clone, Copy)]
pub struct SampleTick {
    pub sample_clock: u64,
    pub correlation: f32,
    pub modulation_depth: f32,
    pub envelope_peak: f32,
}

/// Declares the commit point and behavior shared by all four RF symbol
/// recovery state machines, so the worker can drive whichever technology
/// won the detector bank race without matching on a tech-specific enum.
pub trait TechDecoder {
    fn state(&self) -> TechState;

    /// Feed one more sample's worth of derived detector output.
    /// `config` carries this tech's thresholds.
    fn tick(&mut self, tick: SampleTick, config: &TechConfig) -> TickOutcome;

    /// Abandon the current frame attempt (used by `Stop` and EOF
    /// handling) and emit it as `Truncated` if any bytes were collected.
    fn abort(&mut self) -> Option<RawFrame>;
}

/// Finalize a just-assembled byte buffer into flags, honoring truncation
/// reported by the stream accumulator.
pub fn finalize_flags(stream: &StreamStatus, crc_ok: bool, parity_ok: bool, sync_ok: bool) -> FrameFlags {
    FrameFlags {
        encrypted: false,
        truncated: stream.is_truncated(),
        crc_error: !crc_ok,
        parity_error: !parity_ok,
        sync_error: !sync_ok,
    }
}

/// Gates per-sample [`SampleTick`]s down to one aggregated observation per
/// symbol period, so a tech's pattern classifier decides a bit (or slot)
/// once per `period_samples`, not once per raw sample. Within a period it
/// tracks the peak-magnitude correlation (signed) and the peak modulation
/// depth, matching how the detector bank's own [`crate::modulation::SearchWindow`]
/// accumulates over its search window.
#[derive(Debug, Clone, Copy)]
pub struct SymbolGate {
    period_samples: u64,
    elapsed: u64,
    peak_correlation: f32,
    peak_modulation_depth: f32,
    envelope_peak: f32,
}

impl SymbolGate {
    pub fn new(period_samples: u64) -> Self {
        Self {
            period_samples: period_samples.max(1),
            elapsed: 0,
            peak_correlation: 0.0,
            peak_modulation_depth: 0.0,
            envelope_peak: 1e-6,
        }
    }

    /// Feed one more raw sample tick. Returns `Some(aggregated)` once a
    /// full symbol period has elapsed, carrying the peak correlation
    /// (sign preserved) and peak modulation depth seen during the period;
    /// the gate then resets for the next period.
    pub fn observe(&mut self, tick: SampleTick) -> Option<SampleTick> {
        if tick.correlation.abs() > self.peak_correlation.abs() {
            self.peak_correlation = tick.correlation;
        }
        if tick.modulation_depth > self.peak_modulation_depth {
            self.peak_modulation_depth = tick.modulation_depth;
        }
        if tick.envelope_peak > self.envelope_peak {
            self.envelope_peak = tick.envelope_peak;
        }
        self.elapsed += 1;

        if self.elapsed < self.period_samples {
            return None;
        }

        let aggregated = SampleTick {
            sample_clock: tick.sample_clock,
            correlation: self.peak_correlation,
            modulation_depth: self.peak_modulation_depth,
            envelope_peak: self.envelope_peak,
        };
        self.reset();
        Some(aggregated)
    }

    pub fn reset(&mut self) {
        self.elapsed = 0;
        self.peak_correlation = 0.0;
        self.peak_modulation_depth = 0.0;
        self.envelope_peak = 1e-6;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(sample_clock: u64, correlation: f32) -> SampleTick {
        SampleTick {
            sample_clock,
            correlation,
            modulation_depth: 0.9,
            envelope_peak: 1.0,
        }
    }

    #[test]
    fn gate_emits_only_every_period() {
        let mut gate = SymbolGate::new(4);
        assert!(gate.observe(tick(0, 0.1)).is_none());
        assert!(gate.observe(tick(1, 0.2)).is_none());
        assert!(gate.observe(tick(2, 0.3)).is_none());
        assert!(gate.observe(tick(3, -0.9)).is_some());
    }

    #[test]
    fn gate_keeps_the_peak_magnitude_with_its_sign() {
        let mut gate = SymbolGate::new(3);
        gate.observe(tick(0, 0.1));
        gate.observe(tick(1, -0.8));
        let aggregated = gate.observe(tick(2, 0.3)).unwrap();
        assert_eq!(aggregated.correlation, -0.8);
    }
}

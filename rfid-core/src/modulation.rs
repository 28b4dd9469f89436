//! Modulation detector bank: per (tech, rate) correlation state, plus the
//! preamble search logic for each technology's first symbol.

use std::collections::VecDeque;

use crate::bitrate::BitrateParams;

/// Mutable correlation state for one (tech, rate) candidate. Owned
/// exclusively by the detector bank; reset at each frame boundary.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModulationStatus {
    pub signal_index: u64,

    /// Moving-sum integrator over a half-symbol window, updated by the
    /// add-new/subtract-delayed pattern.
    pub integrator: f32,

    /// Correlation ring index for the current sample.
    pub correlation_phase: u32,
}

impl ModulationStatus {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Correlation ring: stores the running integral value at each phase of a
/// symbol, length `period1_symbol_samples`. Used by the detector bank to
/// compute `(C[phase + half] - C[phase]) / half_symbol_samples`.
#[derive(Debug, Clone)]
pub struct CorrelationRing {
    values: Vec<f32>,
}

impl CorrelationRing {
    pub fn new(period1_symbol_samples: usize) -> Self {
        Self {
            values: vec![0.0; period1_symbol_samples.max(1)],
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn set(&mut self, phase: usize, value: f32) {
        let len = self.values.len();
        self.values[phase % len] = value;
    }

    pub fn get(&self, phase: usize) -> f32 {
        let len = self.values.len();
        self.values[phase % len]
    }

    /// Correlation factor at `phase`: `(C[phase + half] - C[phase]) / half`.
    pub fn factor(&self, phase: usize, half_symbol_samples: usize) -> f32 {
        if half_symbol_samples == 0 {
            return 0.0;
        }
        let forward = self.get(phase + half_symbol_samples);
        let current = self.get(phase);
        (forward - current) / half_symbol_samples as f32
    }
}

/// Result of one preamble-search tick: either still searching, a
/// committed symbol lock, or a reset back to idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Searching,
    Locked,
    Reset,
}

/// Tracks the evolving search window used while hunting for a preamble:
/// the maximum correlation and maximum modulation depth observed inside
/// the window, and whether either has crossed threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchWindow {
    pub max_correlation: f32,
    pub max_modulation_depth: f32,
}

impl SearchWindow {
    pub fn observe(&mut self, correlation: f32, modulation_depth: f32) {
        if correlation.abs() > self.max_correlation.abs() {
            self.max_correlation = correlation;
        }
        if modulation_depth > self.max_modulation_depth {
            self.max_modulation_depth = modulation_depth;
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Whether the observed window qualifies as a valid start-of-
    /// communication pulse: correlation magnitude past a threshold
    /// scaled by the envelope peak, and modulation depth inside the
    /// configured `[min, max]` band.
    pub fn qualifies(
        &self,
        correlation_threshold: f32,
        envelope_peak: f32,
        min_modulation_deep: f32,
        max_modulation_deep: f32,
    ) -> bool {
        let threshold = correlation_threshold * envelope_peak;
        self.max_correlation.abs() > threshold
            && self.max_modulation_depth >= min_modulation_deep
            && self.max_modulation_depth <= max_modulation_deep
    }
}

/// Number of consecutive manchester transitions the NFC-F preamble must
/// observe before committing to a lock (pulse-width counter value).
pub const NFCF_PREAMBLE_TRANSITIONS: u32 = 95;

pub fn half_symbol_samples(params: &BitrateParams) -> usize {
    params.period2_symbol_samples as usize
}

/// Drives [`ModulationStatus`]'s integrator and a [`CorrelationRing`] from
/// a stream of filtered-envelope samples, producing the signed
/// correlation factor `(C[phase + half] - C[phase]) / half` the detector
/// bank and symbol state machines key their decisions on (§4.C).
///
/// One `Correlator` is owned per (tech, rate) candidate, sized from that
/// candidate's own [`BitrateParams`] so the half-symbol delay window and
/// the ring length both scale with the candidate's bitrate.
pub struct Correlator {
    pub status: ModulationStatus,
    ring: CorrelationRing,
    delay_line: VecDeque<f32>,
    half_symbol: usize,
}

impl Correlator {
    pub fn new(params: &BitrateParams) -> Self {
        let half_symbol = half_symbol_samples(params).max(1);
        let ring_len = (params.period1_symbol_samples as usize).max(1);
        Self {
            status: ModulationStatus::default(),
            ring: CorrelationRing::new(ring_len),
            delay_line: VecDeque::with_capacity(half_symbol),
            half_symbol,
        }
    }

    pub fn reset(&mut self) {
        self.status.reset();
        let ring_len = self.ring.len();
        self.ring = CorrelationRing::new(ring_len);
        self.delay_line.clear();
    }

    /// Ingest one filtered-envelope sample for `sample_clock` and return
    /// the signed correlation factor at the current phase. Positive when
    /// the second half-symbol window integrated more energy than the
    /// first, negative when it integrated less — unlike a raw envelope
    /// magnitude, this can and does go negative.
    pub fn push(&mut self, sample_clock: u64, filtered_value: f32) -> f32 {
        self.delay_line.push_back(filtered_value);
        let delayed = if self.delay_line.len() > self.half_symbol {
            self.delay_line.pop_front().unwrap()
        } else {
            0.0
        };
        self.status.integrator += filtered_value - delayed;
        self.status.signal_index = sample_clock;

        let full = self.ring.len();
        let phase = (sample_clock as usize) % full;
        self.status.correlation_phase = phase as u32;
        self.ring.set(phase, self.status.integrator);
        self.ring.factor(phase, self.half_symbol)
    }
}

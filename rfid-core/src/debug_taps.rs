//! Optional sample-rate-matched float taps mirroring inner detector
//! signals (integrator output, correlation factor, sync markers).
//! Writing degrades to a no-op when disabled, so the hot per-sample path
//! never pays for a disabled tap beyond a single branch.

/// Identifies which inner signal a tap channel mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TapChannel {
    Integrator,
    Correlation,
    SyncMarker,
    ModulationDepth,
}

/// A single named channel's recorded float stream.
#[derive(Debug, Clone, Default)]
pub struct TapBuffer {
    samples: Vec<f32>,
}

impl TapBuffer {
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Multi-channel debug recorder. When `enabled` is false, [`DebugTaps::set`]
/// is a single branch with no allocation or write.
pub struct DebugTaps {
    enabled: bool,
    channels: [TapBuffer; 4],
}

impl DebugTaps {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            channels: Default::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[inline]
    pub fn set(&mut self, channel: TapChannel, value: f32) {
        if !self.enabled {
            return;
        }
        self.channels[channel as usize].samples.push(value);
    }

    pub fn channel(&self, channel: TapChannel) -> &TapBuffer {
        &self.channels[channel as usize]
    }

    pub fn clear(&mut self) {
        for channel in &mut self.channels {
            channel.samples.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_taps_record_nothing() {
        let mut taps = DebugTaps::new(false);
        taps.set(TapChannel::Integrator, 1.0);
        assert!(taps.channel(TapChannel::Integrator).is_empty());
    }

    #[test]
    fn enabled_taps_record_values() {
        let mut taps = DebugTaps::new(true);
        taps.set(TapChannel::Correlation, 0.5);
        taps.set(TapChannel::Correlation, -0.25);
        assert_eq!(taps.channel(TapChannel::Correlation).samples(), &[0.5, -0.25]);
    }

    #[test]
    fn clear_resets_all_channels() {
        let mut taps = DebugTaps::new(true);
        taps.set(TapChannel::SyncMarker, 1.0);
        taps.clear();
        assert!(taps.channel(TapChannel::SyncMarker).is_empty());
    }
}

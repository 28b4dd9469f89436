//! Configuration types for the decoder pipeline.

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, Result};
use crate::types::TechType;

/// Per-technology detector configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TechConfig {
    pub enabled: bool,
    pub min_modulation_deep: f32,
    pub max_modulation_deep: f32,
    pub correlation_threshold: f32,
}

impl TechConfig {
    fn validate(&self, tech: &'static str) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_modulation_deep)
            || !(0.0..=1.0).contains(&self.max_modulation_deep)
            || self.min_modulation_deep > self.max_modulation_deep
        {
            return Err(ConfigError::InvalidModulationRange {
                tech,
                min: self.min_modulation_deep,
                max: self.max_modulation_deep,
            }
            .into());
        }
        if self.correlation_threshold <= 0.0 || self.correlation_threshold > 1.0 {
            return Err(ConfigError::InvalidCorrelationThreshold {
                tech,
                value: self.correlation_threshold,
            }
            .into());
        }
        Ok(())
    }
}

/// Default thresholds mirror the reference decoder's tuned constants for
/// each technology (see DESIGN.md for provenance).
impl Default for TechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_modulation_deep: 0.0,
            max_modulation_deep: 1.0,
            correlation_threshold: 0.5,
        }
    }
}

fn nfc_a_default() -> TechConfig {
    TechConfig {
        min_modulation_deep: 0.80,
        max_modulation_deep: 1.00,
        correlation_threshold: 0.50,
        ..TechConfig::default()
    }
}

fn nfc_b_default() -> TechConfig {
    TechConfig {
        min_modulation_deep: 0.10,
        max_modulation_deep: 0.75,
        correlation_threshold: 0.50,
        ..TechConfig::default()
    }
}

fn nfc_f_default() -> TechConfig {
    TechConfig {
        min_modulation_deep: 0.60,
        max_modulation_deep: 1.00,
        correlation_threshold: 0.50,
        ..TechConfig::default()
    }
}

fn nfc_v_default() -> TechConfig {
    TechConfig {
        min_modulation_deep: 0.80,
        max_modulation_deep: 1.00,
        correlation_threshold: 0.50,
        ..TechConfig::default()
    }
}

/// Top-level decoder configuration. Serializable so the CLI can load it
/// from TOML and layer command-line overrides on top.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecoderConfig {
    pub sample_rate: u32,
    pub power_level_threshold: f32,
    pub nfca: TechConfig,
    pub nfcb: TechConfig,
    pub nfcf: TechConfig,
    pub nfcv: TechConfig,
    pub max_frame_size_override: Option<usize>,
    pub debug_channels_enabled: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            sample_rate: 10_000_000,
            power_level_threshold: 0.001,
            nfca: nfc_a_default(),
            nfcb: nfc_b_default(),
            nfcf: nfc_f_default(),
            nfcv: nfc_v_default(),
            max_frame_size_override: None,
            debug_channels_enabled: false,
        }
    }
}

impl DecoderConfig {
    /// Validate this configuration before starting a session.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::InvalidSampleRate { rate: self.sample_rate }.into());
        }
        self.nfca.validate("NFC-A")?;
        self.nfcb.validate("NFC-B")?;
        self.nfcf.validate("NFC-F")?;
        self.nfcv.validate("NFC-V")?;
        Ok(())
    }

    pub fn tech_config(&self, tech: TechType) -> Option<&TechConfig> {
        match tech {
            TechType::NfcA => Some(&self.nfca),
            TechType::NfcB => Some(&self.nfcb),
            TechType::NfcF => Some(&self.nfcf),
            TechType::NfcV => Some(&self.nfcv),
            TechType::Iso7816 => None,
        }
    }

    /// Maximum frame size in bytes, honoring the optional override.
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size_override.unwrap_or(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DecoderConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_sample_rate_is_rejected() {
        let mut config = DecoderConfig::default();
        config.sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_modulation_range_is_rejected() {
        let mut config = DecoderConfig::default();
        config.nfca.min_modulation_deep = 0.9;
        config.nfca.max_modulation_deep = 0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn max_frame_size_defaults_to_256() {
        let config = DecoderConfig::default();
        assert_eq!(config.max_frame_size(), 256);
    }
}

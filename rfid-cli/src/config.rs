//! CLI configuration: the decoder's own [`DecoderConfig`] plus the
//! settings only the command-line front-end cares about (paths, run
//! limits, logging). Loaded from an optional TOML file and layered
//! under whatever flags the user passed on the command line.

use std::path::Path;

use rfid_core::DecoderConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info, format: LogFormat::Pretty }
    }
}

/// Top-level CLI configuration. `decoder` nests the same struct the core
/// crate validates on session start; everything else is local to the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Samples per block handed to the worker at a time.
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

fn default_block_size() -> usize {
    65_536
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            logging: LoggingConfig::default(),
            block_size: default_block_size(),
        }
    }
}

impl CliConfig {
    /// Load a config from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn from_file(path: &Path) -> color_eyre::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| color_eyre::eyre::eyre!("failed to read config file {}: {e}", path.display()))?;
        Self::from_toml_str(&text)
    }

    fn from_toml_str(text: &str) -> color_eyre::Result<Self> {
        let defaults = serde_json::to_value(Self::default())?;
        let override_value: serde_json::Value = toml::from_str(text)?;
        let mut merged = defaults;
        merge_json_values(&mut merged, &override_value);
        Ok(serde_json::from_value(merged)?)
    }
}

/// Recursively overlay `patch` onto `base`, keeping every field `patch`
/// doesn't mention. Mirrors the include-merge pattern used elsewhere in
/// the stack's config loading, minus the `include` directive: CLI
/// configs here are single files, no nesting.
fn merge_json_values(base: &mut serde_json::Value, patch: &serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                merge_json_values(base_map.entry(key.clone()).or_insert(serde_json::Value::Null), value);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = CliConfig::default();
        let text = toml::to_string(&config).unwrap();
        let loaded = CliConfig::from_toml_str(&text).unwrap();
        assert_eq!(loaded.block_size, config.block_size);
    }

    #[test]
    fn partial_toml_inherits_remaining_defaults() {
        let loaded = CliConfig::from_toml_str("block_size = 4096\n").unwrap();
        assert_eq!(loaded.block_size, 4096);
        assert_eq!(loaded.decoder.sample_rate, DecoderConfig::default().sample_rate);
    }

    #[test]
    fn nested_decoder_override_merges_rather_than_replaces() {
        let loaded = CliConfig::from_toml_str("[decoder]\nsample_rate = 4000000\n").unwrap();
        assert_eq!(loaded.decoder.sample_rate, 4_000_000);
        assert!(loaded.decoder.nfca.enabled);
    }
}

//! Output Configuration
//!
//! Scalar settings of the spatial output, persisted as JSON.
//!
//! Every field has a default so partial files load; [`OutputConfig::validate`]
//! enforces the ranges before a config is used.

use crate::{Result, SpatialError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Range of `wait_timeout_ms`
pub const WAIT_TIMEOUT_RANGE_MS: std::ops::RangeInclusive<u64> = 1..=100;
/// Range of `flush_wait` and `stop_wait`
pub const DRAIN_LOOPS_RANGE: std::ops::RangeInclusive<u32> = 0..=100;

/// Settings of one spatial output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output device identifier; empty selects the backend default
    pub device_id: String,
    /// Stream volume (0.0 to 1.0)
    pub volume: f32,
    /// Mute flag
    pub mute: bool,
    /// Write volume and mute changes back to the file the config came from
    pub volume_save: bool,
    /// Upper bound of every worker wait, in milliseconds
    pub wait_timeout_ms: u64,
    /// Drain cycles run by a hard flush
    pub flush_wait: u32,
    /// Drain cycles run at stop
    pub stop_wait: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            device_id: String::new(),
            volume: 0.5,
            mute: false,
            volume_save: false,
            wait_timeout_ms: 10,
            flush_wait: 0,
            stop_wait: 10,
        }
    }
}

impl OutputConfig {
    /// Check every field against its range
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(SpatialError::ConfigError(format!(
                "volume {} outside 0.0..=1.0",
                self.volume
            )));
        }
        if !WAIT_TIMEOUT_RANGE_MS.contains(&self.wait_timeout_ms) {
            return Err(SpatialError::ConfigError(format!(
                "wait_timeout_ms {} outside {:?}",
                self.wait_timeout_ms, WAIT_TIMEOUT_RANGE_MS
            )));
        }
        for (name, value) in [("flush_wait", self.flush_wait), ("stop_wait", self.stop_wait)] {
            if !DRAIN_LOOPS_RANGE.contains(&value) {
                return Err(SpatialError::ConfigError(format!(
                    "{} {} outside {:?}",
                    name, value, DRAIN_LOOPS_RANGE
                )));
            }
        }
        Ok(())
    }

    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: OutputConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Write the config as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Worker wait timeout
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = OutputConfig::default();
        assert!(config.validate().is_ok());
        assert_relative_eq!(config.volume, 0.5);
        assert_eq!(config.wait_timeout(), Duration::from_millis(10));
        assert_eq!(config.stop_wait, 10);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = OutputConfig::from_json_str(r#"{ "volume": 0.8, "mute": true }"#).unwrap();
        assert_relative_eq!(config.volume, 0.8);
        assert!(config.mute);
        assert_eq!(config.flush_wait, 0);
        assert!(config.device_id.is_empty());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let cases = [
            r#"{ "volume": 1.5 }"#,
            r#"{ "volume": -0.1 }"#,
            r#"{ "wait_timeout_ms": 0 }"#,
            r#"{ "wait_timeout_ms": 101 }"#,
            r#"{ "flush_wait": 101 }"#,
            r#"{ "stop_wait": 500 }"#,
        ];
        for json in cases {
            assert!(
                matches!(
                    OutputConfig::from_json_str(json),
                    Err(SpatialError::ConfigError(_))
                ),
                "{json} should be rejected"
            );
        }
    }

    #[test]
    fn test_bounds_accepted() {
        let json = r#"{ "volume": 1.0, "wait_timeout_ms": 100, "flush_wait": 100, "stop_wait": 0 }"#;
        assert!(OutputConfig::from_json_str(json).is_ok());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            OutputConfig::from_json_str("{ volume: "),
            Err(SpatialError::Json(_))
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.json");

        let config = OutputConfig {
            device_id: "sim-1".to_string(),
            volume: 0.25,
            volume_save: true,
            ..OutputConfig::default()
        };
        config.save(&path).unwrap();

        assert_eq!(OutputConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            OutputConfig::load(dir.path().join("absent.json")),
            Err(SpatialError::Io(_))
        ));
    }
}

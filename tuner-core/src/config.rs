//! Tuner configuration, stored as JSON.

use crate::{
    acquisition::AcquisitionConfig,
    session::SessionSettings,
    tuning::A4_FREQUENCY,
};
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::Duration;

/// User-facing settings. Missing fields fall back to their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Frequency of A4 in Hz.
    pub reference_pitch: f32,
    /// Silence window before the reading clears, in milliseconds.
    pub debounce_ms: u64,
    pub acquisition: AcquisitionConfig,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            reference_pitch: A4_FREQUENCY,
            debounce_ms: 1000,
            acquisition: AcquisitionConfig::default(),
        }
    }
}

impl TunerConfig {
    /// Loads and validates a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file =
            File::open(path).with_context(|| format!("opening config {}", path.display()))?;
        let mut data = String::new();
        file.read_to_string(&mut data)?;
        let config: TunerConfig = serde_json::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path.as_ref())?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.reference_pitch.is_finite() && self.reference_pitch > 0.0) {
            bail!("reference_pitch must be a positive frequency, got {}", self.reference_pitch);
        }
        if self.debounce_ms == 0 {
            bail!("debounce_ms must be at least 1");
        }
        if self.acquisition.buffer_size == 0 {
            bail!("acquisition.buffer_size must be at least 1");
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            acquisition: self.acquisition.clone(),
            reference_pitch: self.reference_pitch,
            debounce: Duration::from_millis(self.debounce_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::DEFAULT_DEBOUNCE;

    #[test]
    fn defaults_match_session_defaults() {
        let settings = TunerConfig::default().session_settings();
        assert_eq!(settings, SessionSettings::default());
        assert_eq!(settings.debounce, DEFAULT_DEBOUNCE);
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuner.json");
        let config = TunerConfig {
            reference_pitch: 442.0,
            debounce_ms: 750,
            acquisition: AcquisitionConfig {
                buffer_size: 4096,
                min_volume: 0.05,
            },
        };
        config.save(&path).unwrap();
        assert_eq!(TunerConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuner.json");
        std::fs::write(&path, r#"{ "acquisition": { "min_volume": 0.2 } }"#).unwrap();

        let config = TunerConfig::load(&path).unwrap();
        assert_eq!(config.reference_pitch, 440.0);
        assert_eq!(config.debounce_ms, 1000);
        assert_eq!(config.acquisition.buffer_size, 2048);
        assert_eq!(config.acquisition.min_volume, 0.2);
    }

    #[test]
    fn rejects_invalid_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tuner.json");

        std::fs::write(&path, r#"{ "reference_pitch": 0 }"#).unwrap();
        assert!(TunerConfig::load(&path).is_err());

        std::fs::write(&path, r#"{ "debounce_ms": 0 }"#).unwrap();
        assert!(TunerConfig::load(&path).is_err());

        std::fs::write(&path, r#"{ "acquisition": { "buffer_size": 0 } }"#).unwrap();
        assert!(TunerConfig::load(&path).is_err());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(TunerConfig::load(dir.path().join("absent.json")).is_err());
    }
}

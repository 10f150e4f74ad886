//! Engine configuration and generic YAML config I/O
//!
//! `EngineConfig` collects the tunables the engine reads at construction
//! time. The load/save helpers are generic so applications embedding the
//! engine can persist their own config types the same way.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::DEFAULT_SAMPLE_RATE;

/// Engine-wide tunables
///
/// All fields have working defaults; a missing or invalid config file
/// falls back to `Default` with a logged warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sample rate used until a device reports its own
    pub sample_rate: u32,
    /// Number of speed-ramp steps a turntable takes to reach a new
    /// speed target (one step per render block)
    pub inertia: f32,
    /// Render blocks of inactivity before manual scratch input is
    /// considered released and speed snaps to zero
    pub sense_cycles: u32,
    /// Worst-case echo duration; sizes each turntable's fixed
    /// echo ring at `sample_rate * max_echo_seconds` samples
    pub max_echo_seconds: f32,
    /// Initial main volume (normalized per turntable count at runtime)
    pub main_volume: f32,
    /// Initial main pitch multiplier
    pub main_pitch: f32,
    /// Preferred output device name; `None` picks the system default
    pub output_device: Option<String>,
    /// Preferred device buffer size in frames; `None` lets the backend pick
    pub buffer_size: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            inertia: 10.0,
            sense_cycles: 10,
            max_echo_seconds: 4.0,
            main_volume: 1.0,
            main_pitch: 1.0,
            output_device: None,
            buffer_size: None,
        }
    }
}

impl EngineConfig {
    /// Echo ring capacity in samples for the configured worst case
    pub fn echo_capacity(&self) -> usize {
        (self.sample_rate as f32 * self.max_echo_seconds) as usize
    }
}

/// Read a configuration from a YAML file.
///
/// Config trouble must never stop the engine from starting: a missing
/// file is normal (first run), anything unreadable or unparseable is
/// logged and replaced by `Default`.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            log::info!("no config at {:?}, using defaults", path);
            return T::default();
        }
        Err(err) => {
            log::warn!("could not read config {:?} ({}), using defaults", path, err);
            return T::default();
        }
    };

    serde_yaml::from_str(&contents).unwrap_or_else(|err| {
        log::warn!("could not parse config {:?} ({}), using defaults", path, err);
        T::default()
    })
}

/// Write a configuration as YAML, creating the parent directory if needed
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    let yaml = serde_yaml::to_string(config).context("serializing config")?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating config directory {:?}", parent))?;
    }
    std::fs::write(path, yaml).with_context(|| format!("writing config {:?}", path))?;

    log::info!("saved config to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.sample_rate, 44100);
        assert!(config.inertia >= 1.0);
        assert!(config.echo_capacity() > 0);
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let config: EngineConfig = load_config(Path::new("/nonexistent/path/wax.yaml"));
        assert_eq!(config.sample_rate, EngineConfig::default().sample_rate);
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.yaml");

        let mut config = EngineConfig::default();
        config.sample_rate = 48000;
        config.inertia = 25.0;
        config.output_device = Some("hw:1".to_string());

        save_config(&config, &path).unwrap();
        let loaded: EngineConfig = load_config(&path);

        assert_eq!(loaded.sample_rate, 48000);
        assert_eq!(loaded.inertia, 25.0);
        assert_eq!(loaded.output_device.as_deref(), Some("hw:1"));
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.yaml");
        std::fs::write(&path, "sample_rate: 96000\n").unwrap();

        let loaded: EngineConfig = load_config(&path);
        assert_eq!(loaded.sample_rate, 96000);
        assert_eq!(loaded.main_volume, 1.0);
    }
}

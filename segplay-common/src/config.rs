//! Configuration loading and config-file resolution
//!
//! Bootstrap configuration lives in a TOML file. Every field has a built-in
//! default, so a missing file (or a missing section) still yields a usable
//! configuration.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Platform config directory (`<config_dir>/segplay/config.toml`)
//! 4. None (built-in defaults)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SEGPLAY_CONFIG";

/// Maximum number of ring buffer segments
pub const MAX_SEGMENT_COUNT: usize = 8;

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    /// Ring buffer and driver tuning
    pub playback: PlaybackSection,

    /// Output device selection
    pub output: OutputSection,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// `[playback]` section
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybackSection {
    /// Ring buffer length in milliseconds of audio
    pub buffer_duration_ms: u64,

    /// Number of ring buffer segments
    pub segment_count: usize,

    /// Frames pulled from the upstream pipeline per fill step
    pub chunk_frames: usize,

    /// Upper bound on frames copied per render callback
    pub max_frames_per_callback: usize,

    /// Fill thread wait when the ring buffer is full
    pub fill_backoff_ms: u64,

    /// Audio sent per scrub position while seeking interactively
    pub preview_window_ms: u64,

    /// How long control calls wait for output activation
    pub activation_timeout_ms: u64,

    /// Initial scalar gain
    pub gain: f32,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            buffer_duration_ms: 500,
            segment_count: 4,
            chunk_frames: 1024,
            max_frames_per_callback: 4096,
            fill_backoff_ms: 2,
            preview_window_ms: 100,
            activation_timeout_ms: 2000,
            gain: 1.0,
        }
    }
}

/// `[output]` section
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSection {
    /// Output device name (None = default device)
    pub device: Option<String>,

    /// Requested device buffer size in frames (None = device default)
    pub buffer_frames: Option<u32>,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(text)
            .map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path`, falling back to defaults if the file is missing
    ///
    /// A file that exists but cannot be parsed is an error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("No config file, using built-in defaults");
            return Ok(Self::default());
        };

        match std::fs::read_to_string(path) {
            Ok(text) => {
                info!("Loading configuration from {}", path.display());
                Self::from_toml_str(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Validate value ranges
    pub fn validate(&self) -> Result<()> {
        let p = &self.playback;

        if p.segment_count == 0 || p.segment_count > MAX_SEGMENT_COUNT {
            return Err(Error::Config(format!(
                "segment_count must be in 1..={}, got {}",
                MAX_SEGMENT_COUNT, p.segment_count
            )));
        }
        if p.buffer_duration_ms == 0 {
            return Err(Error::Config("buffer_duration_ms must be > 0".to_string()));
        }
        if p.chunk_frames == 0 {
            return Err(Error::Config("chunk_frames must be > 0".to_string()));
        }
        if p.max_frames_per_callback == 0 {
            return Err(Error::Config(
                "max_frames_per_callback must be > 0".to_string(),
            ));
        }
        if !p.gain.is_finite() || p.gain < 0.0 {
            return Err(Error::Config(format!(
                "gain must be finite and non-negative, got {}",
                p.gain
            )));
        }

        Ok(())
    }
}

/// Resolve the config file path
///
/// Returns `None` when no candidate exists; callers then use defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// Platform default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("segplay").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = TomlConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.playback.segment_count, 4);
        assert_eq!(config.logging.level, "info");
        assert!(config.output.device.is_none());
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str("[playback]\nsegment_count = 2\n").unwrap();
        assert_eq!(config.playback.segment_count, 2);
        assert_eq!(config.playback.buffer_duration_ms, 500);
        assert_eq!(config.playback.chunk_frames, 1024);
    }

    #[test]
    fn test_rejects_zero_segments() {
        let err = TomlConfig::from_toml_str("[playback]\nsegment_count = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_too_many_segments() {
        assert!(TomlConfig::from_toml_str("[playback]\nsegment_count = 9\n").is_err());
    }

    #[test]
    fn test_rejects_negative_gain() {
        assert!(TomlConfig::from_toml_str("[playback]\ngain = -0.5\n").is_err());
    }

    #[test]
    fn test_cli_arg_wins() {
        let path = resolve_config_path(Some(Path::new("/tmp/x.toml")), "SEGPLAY_TEST_UNSET_VAR");
        assert_eq!(path, Some(PathBuf::from("/tmp/x.toml")));
    }
}

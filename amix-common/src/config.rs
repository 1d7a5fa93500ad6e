//! Configuration loading and config file resolution
//!
//! Missing configuration never stops the engine: a missing file logs a
//! warning and compiled defaults are used. A file that exists but does not
//! parse is an error, since silently ignoring it would hide a typo.

use crate::params::MixParams;
use crate::types::{AudioType, Channels};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AMIX_CONFIG";

/// Logging section of the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `tracing` filter directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Defaults for the demo scenes run by the engine binary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub sample_rate: u32,
    pub channels: Channels,
    pub audio_type: AudioType,
    /// Tone frequency for the overlay/tone scene
    pub tone_hz: u32,
    /// Tone length
    pub tone_ms: u32,
    /// Samples moved per simulated hardware interrupt
    pub fifo_half_depth: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: Channels::Stereo,
            audio_type: AudioType::Pcm,
            tone_hz: 1_000,
            tone_ms: 300,
            fifo_half_depth: 64,
        }
    }
}

/// Top-level TOML document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub logging: LoggingConfig,
    pub mix: MixParams,
    pub demo: DemoConfig,
}

impl TomlConfig {
    pub fn validate(&self) -> Result<()> {
        self.mix.validate()?;
        if self.demo.sample_rate == 0 {
            return Err(Error::Config("demo.sample_rate must be non-zero".to_string()));
        }
        if self.demo.fifo_half_depth == 0 {
            return Err(Error::Config("demo.fifo_half_depth must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Config file resolution, in priority order:
/// 1. Command-line argument
/// 2. Environment variable
/// 3. Platform config file (user, then system-wide on Linux)
///
/// Returns `None` when nothing is found; callers fall back to defaults.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    default_config_file()
}

/// First existing platform config file, if any
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("amix").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/amix/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Load and validate a config file
///
/// `None` or a missing file yields defaults with a warning.
pub fn load_config(path: Option<&Path>) -> Result<TomlConfig> {
    let path = match path {
        Some(path) => path,
        None => {
            debug!("No config file resolved, using compiled defaults");
            return Ok(TomlConfig::default());
        }
    };

    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: TomlConfig = toml::from_str(&content)?;
    config.validate()?;
    debug!("Loaded config from {}", path.display());
    Ok(config)
}

/// Write a config file atomically (temp file + rename)
pub fn write_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

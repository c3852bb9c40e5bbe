//! Configuration loading and config file resolution
//!
//! Settings come from four layers, highest priority first:
//! 1. Command-line arguments (parsed by the binary)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults
//!
//! A missing config file is not an error: the service logs a warning and
//! starts on compiled defaults. A file that exists but fails to parse is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const ENV_CONFIG_PATH: &str = "PARCELOCK_CONFIG";

/// Environment variable holding the vision API credential
pub const ENV_VISION_API_KEY: &str = "PARCELOCK_VISION_API_KEY";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Address the HTTP server binds to
    pub host: String,

    /// HTTP server port
    pub port: u16,

    /// SQLite record store location (None = OS default data dir)
    pub database_path: Option<PathBuf>,

    pub logging: LoggingConfig,
    pub vision: VisionConfig,
    pub reader: ReaderConfig,
    pub servo: ServoConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            database_path: None,
            logging: LoggingConfig::default(),
            vision: VisionConfig::default(),
            reader: ReaderConfig::default(),
            servo: ServoConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Remote vision-language model settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// API credential. Prefer the environment variable over storing it here.
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    /// Timeout applied to every outbound HTTP request
    pub timeout_secs: u64,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.1,
            top_p: 0.95,
            top_k: 40,
            timeout_secs: 60,
        }
    }
}

impl VisionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Which driver backs a physical device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HardwareBackend {
    /// In-memory device, no hardware required
    #[default]
    Simulated,
    /// Raspberry Pi GPIO/SPI (requires the `rpi` build feature)
    Rpi,
}

/// MFRC522 tag reader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub backend: HardwareBackend,
    /// BCM pin wired to the reader's RST line
    pub reset_pin: u8,
    pub spi_clock_hz: u32,
    /// How long a read/write waits for a tag to be presented
    pub timeout_secs: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            backend: HardwareBackend::Simulated,
            reset_pin: 25,
            spi_clock_hz: 1_000_000,
            timeout_secs: 10,
        }
    }
}

impl ReaderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Compartment servo settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    pub backend: HardwareBackend,
    /// BCM pin carrying the PWM signal
    pub pin: u8,
    /// Pulse width at -90 degrees
    pub min_pulse_us: u64,
    /// Pulse width at +90 degrees
    pub max_pulse_us: u64,
    /// How long the compartment stays open
    pub open_secs: f64,
    /// Hold time after swinging back to closed
    pub close_hold_secs: f64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            backend: HardwareBackend::Simulated,
            pin: 18,
            min_pulse_us: 600,
            max_pulse_us: 2300,
            open_secs: 10.0,
            close_hold_secs: 1.0,
        }
    }
}

impl ServoConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs_f64(self.open_secs)
    }

    pub fn close_hold(&self) -> Duration {
        Duration::from_secs_f64(self.close_hold_secs)
    }
}

impl TomlConfig {
    /// Parse a config file from disk
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|source| Error::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values that would make a device or client misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("servo.open_secs", self.servo.open_secs),
            ("servo.close_hold_secs", self.servo.close_hold_secs),
        ] {
            if !secs.is_finite() || secs < 0.0 {
                return Err(Error::Config(format!(
                    "{} must be a non-negative number of seconds, got {}",
                    name, secs
                )));
            }
        }

        if self.servo.min_pulse_us >= self.servo.max_pulse_us {
            return Err(Error::Config(format!(
                "servo.min_pulse_us ({}) must be below servo.max_pulse_us ({})",
                self.servo.min_pulse_us, self.servo.max_pulse_us
            )));
        }

        if !(0.0..=2.0).contains(&self.vision.temperature) {
            return Err(Error::Config(format!(
                "vision.temperature must be within 0.0..=2.0, got {}",
                self.vision.temperature
            )));
        }

        if self.vision.base_url.trim().is_empty() {
            return Err(Error::Config("vision.base_url must not be empty".to_string()));
        }

        Ok(())
    }

    /// Record store path, falling back to the OS data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Locate the config file to load
///
/// An explicit path (CLI or `PARCELOCK_CONFIG`) is returned as-is, even if
/// missing, so the caller can report it. Otherwise the per-user then
/// system-wide locations are probed.
pub fn locate_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(ENV_CONFIG_PATH) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("parcelock").join("config.toml"));
    let system_config = PathBuf::from("/etc/parcelock/config.toml");

    user_config
        .into_iter()
        .chain(std::iter::once(system_config))
        .find(|p| p.exists())
}

/// Load configuration with graceful degradation
///
/// Explicitly named files must exist. Default locations may be absent, in
/// which case compiled defaults are used. Environment overrides are applied
/// last and the result is validated.
pub fn load_config(explicit: Option<&Path>) -> Result<TomlConfig> {
    let explicitly_named = explicit.is_some()
        || std::env::var(ENV_CONFIG_PATH)
            .map(|p| !p.trim().is_empty())
            .unwrap_or(false);

    let mut config = match locate_config_file(explicit) {
        Some(path) if path.exists() => {
            info!("Loading config file: {}", path.display());
            TomlConfig::from_file(&path)?
        }
        Some(path) if explicitly_named => {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        _ => {
            warn!("No config file found, using compiled defaults");
            TomlConfig::default()
        }
    };

    config.vision.api_key = resolve_vision_api_key(&config);
    config.validate()?;

    Ok(config)
}

/// Resolve the vision API key
///
/// **Priority:** ENV → TOML. Blank values are treated as absent.
pub fn resolve_vision_api_key(config: &TomlConfig) -> Option<String> {
    let env_key = std::env::var(ENV_VISION_API_KEY).ok().filter(|k| is_valid_key(k));
    let toml_key = config.vision.api_key.clone().filter(|k| is_valid_key(k));

    if env_key.is_some() && toml_key.is_some() {
        warn!(
            "Vision API key found in both {} and TOML config. Using environment.",
            ENV_VISION_API_KEY
        );
    }

    match (env_key, toml_key) {
        (Some(key), _) => {
            info!("Vision API key loaded from environment variable");
            Some(key)
        }
        (None, Some(key)) => {
            info!("Vision API key loaded from TOML config");
            Some(key)
        }
        (None, None) => {
            warn!(
                "Vision API key not configured; package verification will fail until {} is set",
                ENV_VISION_API_KEY
            );
            None
        }
    }
}

/// API keys must be non-empty and not just whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// OS-dependent default record store location
fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("parcelock"))
        .unwrap_or_else(|| PathBuf::from("./parcelock_data"))
        .join("parcelock.db")
}

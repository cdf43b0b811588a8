//! Configuration loading using Figment
//!
//! Configuration is merged from, lowest priority first:
//! 1. built-in defaults
//! 2. a TOML file (default `config/fishfinder.toml`)
//! 3. environment variables prefixed with `FISHFINDER_`, using `__` between
//!    section and key (e.g. `FISHFINDER_STORAGE__CAPACITY_SAMPLES=5000`)
//!
//! # Example
//! ```no_run
//! use fishfinder::config::FishfinderConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FishfinderConfig::load()?;
//! config.validate()?;
//! println!("Logging to {}", config.storage.log_path.display());
//! # Ok(())
//! # }
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::DeviceSettings;
use crate::error::{AppResult, FishfinderError};
use crate::filter::Thresholds;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/fishfinder.toml";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];
const VALID_TRANSPORTS: [&str; 2] = ["simulated", "serial"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FishfinderConfig {
    /// Application name and logging.
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Settings written to the sensor.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Significant-change filter thresholds.
    #[serde(default)]
    pub filter: FilterConfig,
    /// Transport, watchdog and queue timing.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Ring log location and size.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Display name used in logs.
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "fishfinder".to_string(),
            log_level: "info".to_string(),
            log_format: default_log_format(),
        }
    }
}

/// Settings written to the sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Sonar gain, 0-10.
    pub sensitivity: u8,
    /// Noise rejection level, 0-4.
    pub noise: u8,
    /// Depth range index, 0-7.
    pub range: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            sensitivity: 5,
            noise: 0,
            range: 6,
        }
    }
}

/// Significant-change filter thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Depth change in metres that keeps a sample.
    #[serde(default = "default_min_delta_depth")]
    pub min_delta_depth_m: f32,
    /// Movement in metres that keeps a sample.
    #[serde(default = "default_min_delta_position")]
    pub min_delta_position_m: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_delta_depth_m: default_min_delta_depth(),
            min_delta_position_m: default_min_delta_position(),
        }
    }
}

/// Link and watchdog settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Which backend to use (simulated, serial)
    #[serde(default = "default_transport")]
    pub transport: String,
    /// Device identifier: port path for serial, free-form for simulated
    #[serde(default)]
    pub device_id: Option<String>,
    /// Serial baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Ping rate of the simulated sensor
    #[serde(default = "default_simulated_rate")]
    pub simulated_rate_hz: f64,
    /// Watchdog period in milliseconds (0 = disabled)
    #[serde(default = "default_sample_timeout")]
    pub sample_timeout_ms: u64,
    /// Per-operation queue timeout in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            device_id: None,
            baud_rate: default_baud_rate(),
            simulated_rate_hz: default_simulated_rate(),
            sample_timeout_ms: default_sample_timeout(),
            operation_timeout_ms: default_operation_timeout(),
        }
    }
}

/// Ring log settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path of the ring-log file.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Samples held before the oldest are overwritten
    #[serde(default = "default_capacity")]
    pub capacity_samples: u32,
    /// fsync after every append
    #[serde(default)]
    pub sync_writes: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            capacity_samples: default_capacity(),
            sync_writes: false,
        }
    }
}

// Default value functions
fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_min_delta_depth() -> f32 {
    0.5
}

fn default_min_delta_position() -> f64 {
    1.0
}

fn default_transport() -> String {
    "simulated".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_simulated_rate() -> f64 {
    10.0
}

fn default_sample_timeout() -> u64 {
    5000
}

fn default_operation_timeout() -> u64 {
    10_000
}

fn default_log_path() -> PathBuf {
    PathBuf::from("fishfinder.ring")
}

fn default_capacity() -> u32 {
    10_000
}

impl FishfinderConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed("FISHFINDER_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> AppResult<()> {
        let invalid = |msg: String| Err(FishfinderError::Configuration(msg));

        let level = self.application.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                VALID_LOG_LEVELS.join(", ")
            ));
        }
        if !VALID_LOG_FORMATS.contains(&self.application.log_format.as_str()) {
            return invalid(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                VALID_LOG_FORMATS.join(", ")
            ));
        }
        if !VALID_TRANSPORTS.contains(&self.connection.transport.as_str()) {
            return invalid(format!(
                "Invalid transport '{}'. Must be one of: {}",
                self.connection.transport,
                VALID_TRANSPORTS.join(", ")
            ));
        }

        if !(self.filter.min_delta_depth_m >= 0.0) {
            return invalid(format!(
                "min_delta_depth_m must be non-negative, got {}",
                self.filter.min_delta_depth_m
            ));
        }
        if !(self.filter.min_delta_position_m >= 0.0) {
            return invalid(format!(
                "min_delta_position_m must be non-negative, got {}",
                self.filter.min_delta_position_m
            ));
        }
        if self.connection.operation_timeout_ms == 0 {
            return invalid("operation_timeout_ms must be greater than zero".to_string());
        }
        if !(self.connection.simulated_rate_hz > 0.0) {
            return invalid(format!(
                "simulated_rate_hz must be positive, got {}",
                self.connection.simulated_rate_hz
            ));
        }
        if self.storage.capacity_samples == 0 {
            return invalid("capacity_samples must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Runtime settings for the connection controller.
    pub fn to_settings(&self) -> DeviceSettings {
        DeviceSettings {
            sensitivity: self.device.sensitivity,
            noise: self.device.noise,
            range: self.device.range,
            thresholds: Thresholds {
                min_delta_depth_m: self.filter.min_delta_depth_m,
                min_delta_position_m: self.filter.min_delta_position_m,
            },
            sample_timeout: Duration::from_millis(self.connection.sample_timeout_ms),
        }
    }

    /// Timeout applied to each queued device operation.
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.connection.operation_timeout_ms)
    }

    /// The merged configuration rendered back as TOML.
    pub fn to_toml(&self) -> AppResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FishfinderError::Configuration(format!("Cannot render config: {e}")))
    }
}

//! Application configuration management.
//!
//! Handles loading and validating btpresence configuration:
//! - Tracker policy (track new devices, scan interval, lookup timeout)
//! - Location of the known-devices file
//! - HTTP server settings
//! - Simulated devices for builds without BlueZ
//!
//! Values are layered with the `config` crate: built-in defaults, then the
//! TOML file, then `BTPRESENCE__SECTION__KEY` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::is_valid_mac_address;
use crate::discovery::DEFAULT_LOOKUP_TIMEOUT;

/// Prefix of environment overrides (`BTPRESENCE__TRACKER__SCAN_INTERVAL_SECS`).
pub const ENV_PREFIX: &str = "BTPRESENCE";

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The layered configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// A single field is invalid.
    #[error("Invalid value for {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl From<::config::ConfigError> for ConfigError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Presence tracker settings.
    pub tracker: TrackerConfig,

    /// HTTP host settings.
    pub server: ServerConfig,

    /// Devices answered by the simulated radio when BlueZ is not compiled in.
    pub simulated: Vec<SimulatedDevice>,
}

/// Presence tracker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Add devices found by broad scans to the tracked set.
    pub track_new_devices: bool,

    /// Seconds between poll cycles.
    pub scan_interval_secs: u64,

    /// Seconds to wait for a targeted name lookup.
    pub lookup_timeout_secs: u64,

    /// Length of a broad inquiry in milliseconds.
    pub inquiry_duration_ms: u64,

    /// TOML file with the persisted device records.
    pub known_devices_path: PathBuf,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            track_new_devices: true,
            scan_interval_secs: 12,
            lookup_timeout_secs: DEFAULT_LOOKUP_TIMEOUT.as_secs(),
            inquiry_duration_ms: 10_240,
            known_devices_path: default_config_dir().join("known_devices.toml"),
        }
    }
}

impl TrackerConfig {
    /// Interval between poll cycles.
    #[must_use]
    pub const fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    /// Timeout of a targeted lookup.
    #[must_use]
    pub const fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_secs)
    }

    /// Length of a broad inquiry.
    #[must_use]
    pub const fn inquiry_duration(&self) -> Duration {
        Duration::from_millis(self.inquiry_duration_ms)
    }
}

/// HTTP host settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,

    /// Seconds after the last sighting during which a device counts as home.
    pub consider_home_secs: u64,

    /// Use production logging (JSON files plus compact stdout).
    pub production: bool,

    /// Directory for production log files. Defaults to a per-platform path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            consider_home_secs: 180,
            production: false,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Consider-home window.
    #[must_use]
    pub const fn consider_home(&self) -> Duration {
        Duration::from_secs(self.consider_home_secs)
    }
}

/// A device served by the simulated radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatedDevice {
    /// Colon-hex address.
    pub address: String,

    /// Name the device answers with.
    pub name: String,

    /// Answers broad inquiries.
    #[serde(default = "default_true")]
    pub discoverable: bool,

    /// Answers targeted lookups.
    #[serde(default = "default_true")]
    pub present: bool,
}

const fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from defaults, the optional file at `path`, and the
    /// environment. A missing file is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Self::default())?);

        if let Some(path) = path {
            builder = builder.add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(false),
            );
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationError` for one problem, or
    /// `MultipleValidationErrors` for several.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut invalid = |field: &str, message: String| {
            errors.push(ConfigError::ValidationError {
                field: field.to_string(),
                message,
            });
        };

        let tracker = &self.tracker;
        if !(1..=86_400).contains(&tracker.scan_interval_secs) {
            invalid(
                "tracker.scan_interval_secs",
                format!("must be between 1 and 86400 (got {})", tracker.scan_interval_secs),
            );
        }
        if !(1..=60).contains(&tracker.lookup_timeout_secs) {
            invalid(
                "tracker.lookup_timeout_secs",
                format!("must be between 1 and 60 (got {})", tracker.lookup_timeout_secs),
            );
        }
        if !(1_280..=61_440).contains(&tracker.inquiry_duration_ms) {
            invalid(
                "tracker.inquiry_duration_ms",
                format!("must be between 1280 and 61440 (got {})", tracker.inquiry_duration_ms),
            );
        }
        if tracker.known_devices_path.as_os_str().is_empty() {
            invalid("tracker.known_devices_path", "must not be empty".to_string());
        }

        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            invalid(
                "server.bind_address",
                format!("'{}' is not a socket address", self.server.bind_address),
            );
        }
        if self.server.consider_home_secs == 0 {
            invalid("server.consider_home_secs", "must be greater than 0".to_string());
        }

        for (i, device) in self.simulated.iter().enumerate() {
            if !is_valid_mac_address(&device.address) {
                invalid(
                    &format!("simulated[{i}].address"),
                    format!("'{}' is not a Bluetooth address", device.address),
                );
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Default configuration file location.
    ///
    /// On Linux: `/etc/btpresence/config.toml`.
    /// Elsewhere: the platform config directory.
    #[must_use]
    pub fn default_path() -> PathBuf {
        default_config_dir().join("config.toml")
    }
}

fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/btpresence")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "btpresence")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

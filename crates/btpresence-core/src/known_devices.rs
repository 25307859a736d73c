//! Persisted device records.
//!
//! The host keeps a TOML file of every device any tracker has seen, with a
//! per-device decision whether to track it:
//!
//! ```toml
//! [[device]]
//! mac = "BT_AA:BB:CC:DD:EE:01"
//! name = "Phone"
//! track = true
//! ```
//!
//! The Bluetooth tracker reads this file once at startup and never writes it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reading the known-devices file.
#[derive(Debug, Error)]
pub enum KnownDevicesError {
    /// The file exists but could not be read.
    #[error("Failed to read known devices from {}: {source}", path.display())]
    ReadError {
        /// File path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid TOML or has the wrong shape.
    #[error("Failed to parse known devices in {}: {source}", path.display())]
    ParseError {
        /// File path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },
}

/// One persisted device record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownDevice {
    /// Namespaced device id, e.g. `BT_AA:BB:CC:DD:EE:01`.
    pub mac: String,

    /// Display name chosen by the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Whether the device should be polled.
    #[serde(default = "default_track")]
    pub track: bool,
}

const fn default_track() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct KnownDevicesFile {
    #[serde(default)]
    device: Vec<KnownDevice>,
}

/// Load all records from `path`. A missing file yields no records.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load(path: &Path) -> Result<Vec<KnownDevice>, KnownDevicesError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(KnownDevicesError::ReadError {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    parse(&content).map_err(|source| KnownDevicesError::ParseError {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse records from TOML text.
///
/// # Errors
///
/// Returns the TOML error if the text is malformed.
pub fn parse(content: &str) -> Result<Vec<KnownDevice>, toml::de::Error> {
    let file: KnownDevicesFile = toml::from_str(content)?;
    Ok(file.device)
}

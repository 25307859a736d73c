//! Unified error types for the btpresence core library.
//!
//! [`PresenceError`] covers every failure that can leave this crate. Each
//! module also has its own error type. `BluetoothError`, `KnownDevicesError`
//! and `AddressError` convert into it; `ConfigError` stays separate because
//! configuration is loaded before anything else runs.
//!
//! Note that the poll loop itself never surfaces these: transport failures
//! inside a cycle are logged and turned into outcomes by the discovery
//! adapter. `PresenceError` is what startup deals with.
//!
//! # Example
//!
//! ```rust
//! use btpresence_core::error::{PresenceError, Result};
//!
//! fn parse(raw: &str) -> Result<btpresence_core::BtAddress> {
//!     Ok(raw.parse()?)
//! }
//!
//! assert!(matches!(parse("nope"), Err(PresenceError::InvalidAddress(_))));
//! ```

use thiserror::Error;

/// The unified error type for btpresence operations.
#[derive(Debug, Error)]
pub enum PresenceError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and bluetoothd is running."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// A scan, lookup or cancel request failed at the transport level.
    #[error("Bluetooth operation failed: {0}")]
    BluetoothTransport(String),

    /// A string is not a Bluetooth address.
    #[error("Invalid Bluetooth address: '{0}'")]
    InvalidAddress(String),

    // =========================================================================
    // KNOWN DEVICES ERRORS
    // =========================================================================
    /// The known-devices file is unreadable or malformed.
    #[error("Known devices could not be loaded: {0}")]
    KnownDevices(String),
}

/// A specialized [`Result`] type for btpresence operations.
pub type Result<T> = std::result::Result<T, PresenceError>;

/// Short alias.
pub type Error = PresenceError;

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::discovery::BluetoothError> for PresenceError {
    fn from(err: crate::discovery::BluetoothError) -> Self {
        use crate::discovery::BluetoothError;
        match err {
            BluetoothError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            BluetoothError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            other => Self::BluetoothTransport(other.to_string()),
        }
    }
}

impl From<crate::known_devices::KnownDevicesError> for PresenceError {
    fn from(err: crate::known_devices::KnownDevicesError) -> Self {
        Self::KnownDevices(err.to_string())
    }
}

impl From<crate::address::AddressError> for PresenceError {
    fn from(err: crate::address::AddressError) -> Self {
        Self::InvalidAddress(err.0)
    }
}

// =============================================================================
// TESTS
// =============================================================================

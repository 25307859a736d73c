//! Bluetooth hardware addresses.
//!
//! Addresses are the unique key of every tracked device. They are parsed from
//! the colon-hex form (`AA:BB:CC:DD:EE:FF`), normalised to upper case, and
//! never change once observed.

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

static MAC_ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").expect("valid MAC address regex")
});

/// Returns `true` if `value` is a colon-separated MAC address.
#[must_use]
pub fn is_valid_mac_address(value: &str) -> bool {
    MAC_ADDRESS_RE.is_match(value)
}

/// Error returned when a string is not a Bluetooth address.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid Bluetooth address '{0}'. Expected format XX:XX:XX:XX:XX:XX")]
pub struct AddressError(pub String);

/// A Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BtAddress([u8; 6]);

impl BtAddress {
    /// Create an address from its six bytes, most significant first.
    #[must_use]
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// The raw address bytes.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for BtAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if !is_valid_mac_address(trimmed) {
            return Err(AddressError(s.to_string()));
        }

        let mut bytes = [0u8; 6];
        for (slot, part) in bytes.iter_mut().zip(trimmed.split(':')) {
            *slot = u8::from_str_radix(part, 16).map_err(|_| AddressError(s.to_string()))?;
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for BtAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl Serialize for BtAddress {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BtAddress {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

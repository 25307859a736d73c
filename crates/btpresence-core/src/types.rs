//! Shared types.
//!
//! Most types live in their respective modules (discovery, tracking, control).

use serde::{Deserialize, Serialize};

use crate::address::BtAddress;

/// A single sighting of a device: its address and the name it answered with.
///
/// Observations are transient. They are handed to the presence reporter and
/// never retained by the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Observation {
    /// Hardware address of the device.
    pub address: BtAddress,

    /// Display name resolved during the scan or lookup, if any.
    pub name: Option<String>,
}

impl Observation {
    /// Create an observation.
    #[must_use]
    pub fn new(address: BtAddress, name: Option<String>) -> Self {
        Self { address, name }
    }
}

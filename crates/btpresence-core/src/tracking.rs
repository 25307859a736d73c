//! The set of addresses the tracker polls.
//!
//! Built once at startup from the persisted device records and split into
//! "track" and "do not track". After that it only grows: newly discovered
//! addresses are appended to "track", nothing is reclassified or removed.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

use crate::address::BtAddress;
use crate::known_devices::KnownDevice;

/// Namespace prefix of Bluetooth device ids in the host's device records.
pub const BT_PREFIX: &str = "BT_";

/// Strip [`BT_PREFIX`] (case-insensitive) from a namespaced device id.
#[must_use]
pub fn strip_prefix(id: &str) -> Option<&str> {
    let head = id.get(..BT_PREFIX.len())?;
    head.eq_ignore_ascii_case(BT_PREFIX)
        .then(|| &id[BT_PREFIX.len()..])
}

/// Two disjoint partitions of known addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackingSet {
    track: Vec<BtAddress>,
    do_not_track: HashSet<BtAddress>,
}

/// Serializable view of a [`TrackingSet`].
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackingSnapshot {
    /// Tracked addresses in lookup order.
    #[schema(value_type = Vec<String>, example = json!(["AA:BB:CC:DD:EE:01"]))]
    pub track: Vec<BtAddress>,
    /// Ignored addresses, sorted.
    #[schema(value_type = Vec<String>)]
    pub do_not_track: Vec<BtAddress>,
}

impl TrackingSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify the persisted records that belong to the Bluetooth namespace.
    ///
    /// Records without the prefix belong to other trackers and are ignored.
    /// Records whose address does not parse are skipped with a warning. When
    /// an address is listed with both flags, "do not track" wins.
    #[must_use]
    pub fn from_known_devices(devices: &[KnownDevice]) -> Self {
        let mut set = Self::new();
        for device in devices {
            let Some(raw) = strip_prefix(&device.mac) else {
                continue;
            };
            let address = match raw.parse::<BtAddress>() {
                Ok(address) => address,
                Err(e) => {
                    warn!(mac = %device.mac, error = %e, "Skipping known device");
                    continue;
                }
            };

            if device.track {
                if !set.do_not_track.contains(&address) && !set.track.contains(&address) {
                    set.track.push(address);
                }
            } else {
                set.track.retain(|a| *a != address);
                set.do_not_track.insert(address);
            }
        }
        set
    }

    /// Whether `address` is in either partition.
    #[must_use]
    pub fn is_known(&self, address: &BtAddress) -> bool {
        self.track.contains(address) || self.do_not_track.contains(address)
    }

    /// Whether `address` is tracked.
    #[must_use]
    pub fn is_tracked(&self, address: &BtAddress) -> bool {
        self.track.contains(address)
    }

    /// Whether `address` is explicitly ignored.
    #[must_use]
    pub fn is_ignored(&self, address: &BtAddress) -> bool {
        self.do_not_track.contains(address)
    }

    /// Start tracking a newly discovered address.
    ///
    /// Returns `false` and changes nothing if the address is already known,
    /// in either partition.
    pub fn add_discovered(&mut self, address: BtAddress) -> bool {
        if self.is_known(&address) {
            return false;
        }
        self.track.push(address);
        true
    }

    /// Tracked addresses in lookup order.
    #[must_use]
    pub fn tracked(&self) -> &[BtAddress] {
        &self.track
    }

    /// Number of tracked addresses.
    #[must_use]
    pub fn tracked_len(&self) -> usize {
        self.track.len()
    }

    /// Number of ignored addresses.
    #[must_use]
    pub fn ignored_len(&self) -> usize {
        self.do_not_track.len()
    }

    /// Copy the partitions out for reporting.
    #[must_use]
    pub fn snapshot(&self) -> TrackingSnapshot {
        let mut do_not_track: Vec<_> = self.do_not_track.iter().copied().collect();
        do_not_track.sort();
        TrackingSnapshot {
            track: self.track.clone(),
            do_not_track,
        }
    }
}

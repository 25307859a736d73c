//! Presence registry.
//!
//! The host's side of device tracking: every `see` call from a tracker lands
//! here. A device is home while its last sighting is within the
//! consider-home window.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use btpresence_core::PresenceSink;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

/// Home/away state of a tracked device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    /// Seen within the consider-home window.
    Home,
    /// Not seen for longer than the consider-home window.
    NotHome,
}

/// One device the registry has heard of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct DeviceRecord {
    /// Namespaced device id, e.g. `BT_AA:BB:CC:DD:EE:FF`.
    #[schema(example = "BT_AA:BB:CC:DD:EE:FF")]
    pub mac: String,

    /// Last name reported for the device.
    #[schema(example = "Pixel 8")]
    pub host_name: Option<String>,

    /// First sighting.
    pub first_seen: DateTime<Utc>,

    /// Most recent sighting.
    pub last_seen: DateTime<Utc>,

    /// Number of sightings.
    pub seen_count: u64,
}

impl DeviceRecord {
    /// Presence at `now` under a `consider_home` window.
    #[must_use]
    pub fn state_at(&self, now: DateTime<Utc>, consider_home: TimeDelta) -> PresenceState {
        if now.signed_duration_since(self.last_seen) <= consider_home {
            PresenceState::Home
        } else {
            PresenceState::NotHome
        }
    }
}

/// In-memory [`PresenceSink`] that aggregates sightings per device.
#[derive(Debug)]
pub struct PresenceRegistry {
    devices: Mutex<HashMap<String, DeviceRecord>>,
    consider_home: TimeDelta,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new(consider_home: Duration) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            consider_home: TimeDelta::from_std(consider_home).unwrap_or_else(|_| TimeDelta::weeks(52)),
        }
    }

    /// Record a sighting at an explicit time.
    pub fn record_at(&self, mac: &str, host_name: Option<&str>, now: DateTime<Utc>) {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        match devices.get_mut(mac) {
            Some(record) => {
                record.last_seen = now;
                record.seen_count += 1;
                if let Some(name) = host_name {
                    record.host_name = Some(name.to_string());
                }
                debug!(%mac, seen_count = record.seen_count, "Device seen");
            }
            None => {
                info!(%mac, host_name = ?host_name, "New device seen");
                devices.insert(
                    mac.to_string(),
                    DeviceRecord {
                        mac: mac.to_string(),
                        host_name: host_name.map(str::to_string),
                        first_seen: now,
                        last_seen: now,
                        seen_count: 1,
                    },
                );
            }
        }
    }

    /// One device by id.
    #[must_use]
    pub fn get(&self, mac: &str) -> Option<DeviceRecord> {
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        devices.get(mac).cloned()
    }

    /// All devices with their presence at `now`, sorted by id.
    #[must_use]
    pub fn devices(&self, now: DateTime<Utc>) -> Vec<(DeviceRecord, PresenceState)> {
        let devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<_> = devices
            .values()
            .map(|record| (record.clone(), record.state_at(now, self.consider_home)))
            .collect();
        entries.sort_by(|a, b| a.0.mac.cmp(&b.0.mac));
        entries
    }

    /// The consider-home window.
    #[must_use]
    pub const fn consider_home(&self) -> TimeDelta {
        self.consider_home
    }
}

impl PresenceSink for PresenceRegistry {
    fn see(&self, mac: &str, host_name: Option<&str>) {
        self.record_at(mac, host_name, Utc::now());
    }
}

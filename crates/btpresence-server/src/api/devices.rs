//! Presence registry endpoint.

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::presence::{DeviceRecord, PresenceState};
use crate::state::SharedState;

/// A device and its presence.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "mac": "BT_AA:BB:CC:DD:EE:FF",
    "host_name": "Pixel 8",
    "state": "home",
    "first_seen": "2025-01-15T03:00:00Z",
    "last_seen": "2025-01-15T03:30:00Z",
    "seen_count": 150
}))]
pub struct DeviceStatus {
    /// Namespaced device id.
    pub mac: String,

    /// Last reported name.
    pub host_name: Option<String>,

    /// Home while the last sighting is within the consider-home window.
    pub state: PresenceState,

    /// First sighting.
    pub first_seen: DateTime<Utc>,

    /// Most recent sighting.
    pub last_seen: DateTime<Utc>,

    /// Number of sightings.
    pub seen_count: u64,
}

impl DeviceStatus {
    fn new(record: DeviceRecord, state: PresenceState) -> Self {
        Self {
            mac: record.mac,
            host_name: record.host_name,
            state,
            first_seen: record.first_seen,
            last_seen: record.last_seen,
            seen_count: record.seen_count,
        }
    }
}

/// Presence registry listing.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DevicesResponse {
    /// Consider-home window in seconds.
    #[schema(example = 180)]
    pub consider_home_secs: i64,

    /// Devices sorted by id.
    pub devices: Vec<DeviceStatus>,
}

/// List the devices the trackers have reported.
#[utoipa::path(
    get,
    path = "/api/devices",
    tag = "devices",
    operation_id = "listDevices",
    summary = "List seen devices",
    description = "Every device reported as seen, with its last sighting and whether it \
        is home. A device is home while its last sighting is within the consider-home window.",
    responses(
        (status = 200, description = "Seen devices", body = DevicesResponse)
    )
)]
pub async fn list_devices(State(state): State<SharedState>) -> Json<DevicesResponse> {
    let state = state.read().await;
    let devices = state
        .registry
        .devices(Utc::now())
        .into_iter()
        .map(|(record, presence)| DeviceStatus::new(record, presence))
        .collect();

    Json(DevicesResponse {
        consider_home_secs: state.registry.consider_home().num_seconds(),
        devices,
    })
}

//! Tracker status endpoint.

use axum::extract::State;
use axum::Json;
use btpresence_core::control::ENTITY_ID;
use btpresence_core::{CycleReport, PollState, TrackingSnapshot};
use serde::Serialize;
use utoipa::ToSchema;

use crate::state::SharedState;

/// Tracker status.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TrackerResponse {
    /// The tracker's on/off entity.
    #[schema(example = "device_tracker.bluetooth_tracker")]
    pub entity_id: String,

    /// Whether polling is switched on.
    pub enabled: bool,

    /// Whether broad scans add new devices.
    pub track_new_devices: bool,

    /// Seconds between cycles.
    #[schema(example = 12)]
    pub scan_interval_secs: u64,

    /// Poll loop state; absent before the loop is armed.
    pub poll_state: Option<PollState>,

    /// Finished cycles.
    pub cycles: u64,

    /// Tracked and ignored addresses.
    pub tracking: TrackingSnapshot,

    /// Outcome of the most recent cycle.
    pub last_cycle: Option<CycleReport>,
}

/// Report the tracker's state.
#[utoipa::path(
    get,
    path = "/api/tracker",
    tag = "tracker",
    operation_id = "getTracker",
    summary = "Bluetooth tracker status",
    description = "Enabled flag, poll loop state, the track and do-not-track partitions, \
        and the counters of the last poll cycle.",
    responses(
        (status = 200, description = "Tracker status", body = TrackerResponse)
    )
)]
pub async fn get_tracker(State(state): State<SharedState>) -> Json<TrackerResponse> {
    let state = state.read().await;
    let settings = state.tracker.settings();

    Json(TrackerResponse {
        entity_id: ENTITY_ID.to_string(),
        enabled: state.tracker.is_enabled(),
        track_new_devices: settings.track_new,
        scan_interval_secs: state.config.tracker.scan_interval_secs,
        poll_state: state.poll_loop.as_ref().map(|l| l.state()),
        cycles: state.poll_loop.as_ref().map_or(0, |l| l.cycles()),
        tracking: state.tracker.tracking_snapshot(),
        last_cycle: state.tracker.last_cycle(),
    })
}

//! OpenAPI specification for the btpresence API.

use axum::Json;
use btpresence_core::{CycleReport, EntityState, PollState, TrackingSnapshot};
use utoipa::OpenApi;

use super::devices::{DeviceStatus, DevicesResponse};
use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::services::{ServiceCallRequest, ServiceCallResponse};
use super::states::StateResponse;
use super::tracker::TrackerResponse;
use crate::presence::PresenceState;
use crate::services::{ServiceDescription, ServiceSchema};

/// Serve the OpenAPI specification as JSON at `/api/openapi.json`.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// The OpenAPI specification as pretty JSON, for the gen-openapi binary.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for btpresence.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "btpresence API",
        version = "0.1.0",
        description = r#"
# btpresence API

btpresence polls nearby Bluetooth devices and reports which ones are present.

## Overview

- **Tracker**: every scan interval the tracker looks up each tracked address and
  reports the ones that answer. Broad scans add newly discovered devices.
- **Devices**: the presence registry keeps the last sighting of each reported device.
  A device is home while it was seen within the consider-home window.
- **Services**: `device_tracker.bluetooth_tracker_turn_on` and
  `device_tracker.bluetooth_tracker_turn_off` switch polling on and off.
- **States**: the tracker's on/off flag is the entity `device_tracker.bluetooth_tracker`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local btpresence server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "states", description = "Entity states"),
        (name = "services", description = "Service registry and invocation"),
        (name = "devices", description = "Presence registry"),
        (name = "tracker", description = "Bluetooth tracker status")
    ),
    paths(
        super::health::health_check,
        super::states::list_states,
        super::states::get_state,
        super::services::list_services,
        super::services::call_service,
        super::devices::list_devices,
        super::tracker::get_tracker,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            StateResponse,
            EntityState,
            ServiceDescription,
            ServiceSchema,
            ServiceCallRequest,
            ServiceCallResponse,
            DevicesResponse,
            DeviceStatus,
            PresenceState,
            TrackerResponse,
            TrackingSnapshot,
            CycleReport,
            PollState,
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_spec_generation() {
        let spec = ApiDoc::openapi();
        assert_eq!(spec.info.title, "btpresence API");
        assert!(spec.paths.paths.contains_key("/api/services/{domain}/{service}"));
        assert!(spec.paths.paths.contains_key("/api/states/{entity_id}"));
    }

    #[test]
    fn test_openapi_json_serialization() {
        let json = get_openapi_json().unwrap();
        assert!(json.contains("\"openapi\":"));
        assert!(json.contains("\"btpresence API\""));
        assert!(json.contains("TrackerResponse"));
    }
}

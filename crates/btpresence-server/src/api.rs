//! HTTP API routes and handlers.
//!
//! - `health` - Service health checks
//! - `states` - Entity states
//! - `services` - Service listing and invocation
//! - `devices` - Presence registry
//! - `tracker` - Bluetooth tracker status
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub mod devices;
pub mod error;
pub mod health;
pub mod openapi;
pub mod services;
pub mod states;
pub mod tracker;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::get_openapi_json;

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                         - Health check
/// /api
/// ├── /states                     - All entity states
/// ├── /states/{entity_id}         - One entity state
/// ├── /services                   - Registered services
/// ├── /services/{domain}/{service} - Invoke a service (POST)
/// ├── /devices                    - Presence registry
/// ├── /tracker                    - Tracker status
/// └── /openapi.json               - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest(
            "/api",
            Router::new()
                .route("/devices", get(devices::list_devices))
                .route("/tracker", get(tracker::get_tracker))
                .route("/openapi.json", get(openapi::get_openapi_spec))
                .nest("/states", states::router())
                .nest("/services", services::router()),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use btpresence_core::control::{DOMAIN, ENTITY_ID, SERVICE_TURN_OFF, SERVICE_TURN_ON};
    use btpresence_core::{ManualScheduler, MockDevice};
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::*;
    use crate::state::testing::app_state;

    const KNOWN: &str = r#"
        [[device]]
        mac = "BT_AA:BB:CC:DD:EE:01"
        track = true

        [[device]]
        mac = "BT_AA:BB:CC:DD:EE:02"
        track = false
    "#;

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn router(dir: &tempfile::TempDir) -> (Router, SharedState) {
        let devices = vec![
            MockDevice::new("AA:BB:CC:DD:EE:01".parse().unwrap(), "phone").hidden(),
            MockDevice::new("AA:BB:CC:DD:EE:02".parse().unwrap(), "tv"),
            MockDevice::new("AA:BB:CC:DD:EE:03".parse().unwrap(), "watch"),
        ];
        let state = app_state(dir.path(), KNOWN, devices).await.shared();
        (create_router(state.clone()), state)
    }

    #[tokio::test]
    async fn test_health() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir).await;

        let (status, body) = send(&router, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tracker_enabled"], true);
    }

    #[tokio::test]
    async fn test_tracker_state_entity() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir).await;

        let (status, body) = send(&router, get(&format!("/api/states/{ENTITY_ID}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "on");

        let (status, body) = send(&router, get("/api/states/light.kitchen")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "entity_not_found");

        let (_, body) = send(&router, get("/api/states")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_turn_off_and_on_through_services() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir).await;

        let uri = format!("/api/services/{DOMAIN}/{SERVICE_TURN_OFF}");
        let (status, body) = send(&router, post(&uri, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], SERVICE_TURN_OFF);
        assert!(body["context_id"].is_string());

        let (_, body) = send(&router, get(&format!("/api/states/{ENTITY_ID}"))).await;
        assert_eq!(body["state"], "off");

        let uri = format!("/api/services/{DOMAIN}/{SERVICE_TURN_ON}");
        let payload = json!({ "entity_id": ENTITY_ID }).to_string();
        let (status, _) = send(&router, post(&uri, &payload)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&router, get("/health")).await;
        assert_eq!(body["tracker_enabled"], true);
    }

    #[tokio::test]
    async fn test_service_filter_for_other_entity_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir).await;

        let uri = format!("/api/services/{DOMAIN}/{SERVICE_TURN_OFF}");
        let payload = json!({ "entity_id": ["light.kitchen"] }).to_string();
        let (status, _) = send(&router, post(&uri, &payload)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&router, get(&format!("/api/states/{ENTITY_ID}"))).await;
        assert_eq!(body["state"], "on");
    }

    #[tokio::test]
    async fn test_service_errors() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir).await;

        let (status, body) = send(&router, post("/api/services/light/turn_on", "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "service_not_found");

        let uri = format!("/api/services/{DOMAIN}/{SERVICE_TURN_ON}");
        let (status, body) = send(&router, post(&uri, r#"{"entity_id": "bogus"}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_service_data");

        let (status, body) = send(&router, post(&uri, "{")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "invalid_json");
    }

    #[tokio::test]
    async fn test_list_services() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir).await;

        let (status, body) = send(&router, get("/api/services")).await;
        assert_eq!(status, StatusCode::OK);
        let services = body.as_array().unwrap();
        assert_eq!(services.len(), 2);
        assert_eq!(services[0]["domain"], DOMAIN);
        assert_eq!(services[0]["schema"], "entity_id_filter");
    }

    #[tokio::test]
    async fn test_tracker_and_devices_after_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let (router, state) = router(&dir).await;

        // Startup burst found ...03; ...02 is ignored and ...01 does not
        // answer inquiries.
        let (_, body) = send(&router, get("/api/tracker")).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["poll_state"], Value::Null);
        assert_eq!(
            body["tracking"]["track"],
            json!(["AA:BB:CC:DD:EE:01", "AA:BB:CC:DD:EE:03"])
        );
        assert_eq!(body["tracking"]["do_not_track"], json!(["AA:BB:CC:DD:EE:02"]));

        let scheduler = Arc::new(ManualScheduler::new());
        state.write().await.start_polling(scheduler.clone(), Utc::now());
        scheduler.fire_next().await.unwrap();

        let (_, body) = send(&router, get("/api/tracker")).await;
        assert_eq!(body["poll_state"], "idle");
        assert_eq!(body["cycles"], 1);
        assert_eq!(body["last_cycle"]["looked_up"], 2);
        assert_eq!(body["last_cycle"]["reported"], 2);

        let (status, body) = send(&router, get("/api/devices")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["consider_home_secs"], 180);
        let devices = body["devices"].as_array().unwrap();
        let macs: Vec<_> = devices.iter().map(|d| d["mac"].as_str().unwrap()).collect();
        assert_eq!(macs, vec!["BT_AA:BB:CC:DD:EE:01", "BT_AA:BB:CC:DD:EE:03"]);
        assert!(devices.iter().all(|d| d["state"] == "home"));
        assert_eq!(devices[1]["seen_count"], 2);
    }

    #[tokio::test]
    async fn test_openapi_route() {
        let dir = tempfile::tempdir().unwrap();
        let (router, _) = router(&dir).await;

        let (status, body) = send(&router, get("/api/openapi.json")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["info"]["title"], "btpresence API");
    }
}

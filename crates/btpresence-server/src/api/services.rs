//! Service endpoints.
//!
//! `POST /api/services/{domain}/{service}` takes an optional JSON body. An
//! empty body is the same as `{}`.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::services::ServiceDescription;
use crate::state::SharedState;

/// Body of a service call. Shown for documentation; the handler accepts any
/// JSON and validates it against the service's schema.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({ "entity_id": "device_tracker.bluetooth_tracker" }))]
pub struct ServiceCallRequest {
    /// One entity id or a list of them.
    #[schema(value_type = Option<Object>)]
    pub entity_id: Option<Value>,
}

/// Result of a service call.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceCallResponse {
    /// Service domain.
    #[schema(example = "device_tracker")]
    pub domain: String,

    /// Service name.
    #[schema(example = "bluetooth_tracker_turn_off")]
    pub service: String,

    /// Identifier of the invocation, as logged.
    pub context_id: Uuid,
}

/// Creates the services router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_services))
        .route("/{domain}/{service}", post(call_service))
}

/// List registered services.
#[utoipa::path(
    get,
    path = "/api/services",
    tag = "services",
    operation_id = "listServices",
    summary = "List registered services",
    responses(
        (status = 200, description = "Registered services", body = Vec<ServiceDescription>)
    )
)]
pub async fn list_services(State(state): State<SharedState>) -> Json<Vec<ServiceDescription>> {
    let state = state.read().await;
    Json(state.services.list())
}

/// Invoke a service.
#[utoipa::path(
    post,
    path = "/api/services/{domain}/{service}",
    tag = "services",
    operation_id = "callService",
    summary = "Invoke a service",
    description = "Runs the service to completion. `device_tracker.bluetooth_tracker_turn_on` \
        and `device_tracker.bluetooth_tracker_turn_off` switch the Bluetooth tracker; with an \
        `entity_id` filter that does not name `device_tracker.bluetooth_tracker` they do nothing.",
    params(
        ("domain" = String, Path, description = "Service domain"),
        ("service" = String, Path, description = "Service name")
    ),
    request_body(
        content = ServiceCallRequest,
        description = "Optional entity filter; the body may be empty",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Service ran", body = ServiceCallResponse),
        (status = 400, description = "Invalid service data", body = ErrorResponse),
        (status = 404, description = "Unknown service", body = ErrorResponse)
    )
)]
pub async fn call_service(
    State(state): State<SharedState>,
    Path((domain, service)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<ServiceCallResponse>> {
    let data = parse_body(&body)?;

    let services = state.read().await.services.clone();
    let context_id = services.call(&domain, &service, &data).await?;

    Ok(Json(ServiceCallResponse {
        domain,
        service,
        context_id,
    }))
}

fn parse_body(body: &[u8]) -> ApiResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest {
        error_code: "invalid_json".to_string(),
        message: format!("Request body is not valid JSON: {e}"),
    })
}

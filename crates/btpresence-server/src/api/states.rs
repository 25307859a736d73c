//! Entity state endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use btpresence_core::{EntityState, StateRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult, ErrorResponse};
use crate::state::SharedState;

/// State of one entity.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "entity_id": "device_tracker.bluetooth_tracker",
    "state": "on",
    "last_changed": "2025-01-15T03:30:00Z"
}))]
pub struct StateResponse {
    /// Entity id.
    #[schema(example = "device_tracker.bluetooth_tracker")]
    pub entity_id: String,

    /// Current value.
    pub state: EntityState,

    /// When the value last changed.
    pub last_changed: DateTime<Utc>,
}

impl StateResponse {
    fn new(entity_id: String, record: StateRecord) -> Self {
        Self {
            entity_id,
            state: record.state,
            last_changed: record.last_changed,
        }
    }
}

/// Creates the states router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", get(list_states))
        .route("/{entity_id}", get(get_state))
}

/// List all entity states.
#[utoipa::path(
    get,
    path = "/api/states",
    tag = "states",
    operation_id = "listStates",
    summary = "List entity states",
    responses(
        (status = 200, description = "All entity states, sorted by id", body = Vec<StateResponse>)
    )
)]
pub async fn list_states(State(state): State<SharedState>) -> Json<Vec<StateResponse>> {
    let state = state.read().await;
    Json(
        state
            .store
            .all()
            .into_iter()
            .map(|(id, record)| StateResponse::new(id, record))
            .collect(),
    )
}

/// Read one entity state.
#[utoipa::path(
    get,
    path = "/api/states/{entity_id}",
    tag = "states",
    operation_id = "getState",
    summary = "Read an entity state",
    description = "The tracker's own entity is `device_tracker.bluetooth_tracker`; \
        its state is the enabled flag.",
    params(
        ("entity_id" = String, Path, description = "Entity id, `domain.object_id`")
    ),
    responses(
        (status = 200, description = "Entity state", body = StateResponse),
        (status = 404, description = "Entity has no state", body = ErrorResponse)
    )
)]
pub async fn get_state(
    State(state): State<SharedState>,
    Path(entity_id): Path<String>,
) -> ApiResult<Json<StateResponse>> {
    let state = state.read().await;
    let record = state
        .store
        .get(&entity_id)
        .ok_or_else(|| ApiError::entity_not_found(&entity_id))?;
    Ok(Json(StateResponse::new(entity_id, record)))
}

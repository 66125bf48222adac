//! REST API handlers

use crate::error::{ApiError, ApiResult};
use crate::store::Registration;
use crate::AppState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use devpulse_core::{
    CommandRequest, CommandStatus, DeviceCommand, DeviceRegistration, Snapshot, SnapshotQuery,
    SnapshotSummary, SummaryQuery,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

type SharedState = State<Arc<AppState>>;

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "devpulse-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /v1/devices
pub async fn register_device(
    State(state): SharedState,
    body: Result<Json<DeviceRegistration>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(registration) = body.map_err(bad_body)?;
    if registration.validate().is_err() {
        return Err(ApiError::BadRequest(
            "Missing required fields: name and device_type".to_string(),
        ));
    }

    match state.store.register_device(&registration)? {
        Registration::Created(device_id) => {
            info!("Registered device {} ({})", registration.name, device_id);
            Ok((
                StatusCode::CREATED,
                Json(json!({
                    "message": "Device registered successfully",
                    "device_id": device_id,
                })),
            ))
        }
        Registration::AlreadyExists(device_id) => Err(ApiError::Conflict {
            message: "Device already registered".to_string(),
            device_id,
        }),
    }
}

/// POST /v1/metrics
pub async fn upload_metrics(
    State(state): SharedState,
    body: Result<Json<Snapshot>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Json(snapshot) = body.map_err(bad_body)?;
    snapshot.validate()?;

    if !state.store.device_exists(snapshot.device_id())? {
        return Err(ApiError::NotFound("Device not found".to_string()));
    }

    let snapshot_id = state.store.insert_snapshot(&snapshot)?;
    debug!(
        "Stored snapshot {} for device {}",
        snapshot_id,
        snapshot.device_id()
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Metrics uploaded successfully",
            "snapshot_id": snapshot_id,
        })),
    ))
}

/// GET /v1/metrics
pub async fn get_metrics(
    State(state): SharedState,
    query: Result<Query<SnapshotQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<Snapshot>>> {
    let Query(query) = query.map_err(bad_query)?;
    query.validate()?;
    Ok(Json(state.store.query_snapshots(&query)?))
}

/// GET /v1/snapshots
pub async fn get_snapshots(
    State(state): SharedState,
    query: Result<Query<SummaryQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<SnapshotSummary>>> {
    let Query(query) = query.map_err(bad_query)?;
    Ok(Json(state.store.snapshot_summaries(&query)?))
}

/// POST /v1/devices/{device_id}/commands
pub async fn create_command(
    State(state): SharedState,
    Path(device_id): Path<i64>,
    body: Result<Json<CommandRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DeviceCommand>)> {
    let Json(request) = body.map_err(bad_body)?;
    request.validate()?;
    require_device(&state, device_id)?;

    let command = state.store.insert_command(device_id, &request)?;
    Ok((StatusCode::CREATED, Json(command)))
}

/// Query string for listing commands
#[derive(Debug, Default, Deserialize)]
pub struct CommandListQuery {
    pub status: Option<CommandStatus>,
}

/// GET /v1/devices/{device_id}/commands
pub async fn list_commands(
    State(state): SharedState,
    Path(device_id): Path<i64>,
    query: Result<Query<CommandListQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<DeviceCommand>>> {
    let Query(query) = query.map_err(bad_query)?;
    require_device(&state, device_id)?;
    Ok(Json(state.store.list_commands(device_id, query.status)?))
}

/// POST /v1/devices/{device_id}/commands/{command_id}/ack
pub async fn acknowledge_command(
    State(state): SharedState,
    Path((device_id, command_id)): Path<(i64, i64)>,
) -> ApiResult<Json<DeviceCommand>> {
    state
        .store
        .acknowledge_command(device_id, command_id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Command not found".to_string()))
}

fn require_device(state: &AppState, device_id: i64) -> ApiResult<()> {
    if state.store.device_exists(device_id)? {
        Ok(())
    } else {
        Err(ApiError::NotFound("Device not found".to_string()))
    }
}

fn bad_body(rejection: JsonRejection) -> ApiError {
    ApiError::BadRequest(format!("Invalid request body: {}", rejection.body_text()))
}

fn bad_query(rejection: QueryRejection) -> ApiError {
    ApiError::BadRequest(format!("Invalid query: {}", rejection.body_text()))
}

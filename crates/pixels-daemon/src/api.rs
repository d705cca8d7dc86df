//! REST API handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use pixels_connect::{AdapterState, Priority, SchedulerError};
use pixels_core::{DieType, EntryKind, PixelId};
use pixels_dataset::{CompileError, DataSetDump, DataSetView, RemoteAction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiError::new(msg))).into_response()
}

fn scheduler_error(e: SchedulerError) -> Response {
    let status = match e {
        SchedulerError::NotRegistered(_) => StatusCode::NOT_FOUND,
        SchedulerError::InFlight(_) | SchedulerError::PersistentFailure(_) => StatusCode::CONFLICT,
    };
    error_response(status, e.to_string())
}

fn compile_error(profile: Uuid, e: CompileError) -> Response {
    let status = match &e {
        CompileError::DanglingReference {
            kind: EntryKind::Profile,
            uuid,
        } if *uuid == profile => StatusCode::NOT_FOUND,
        _ => StatusCode::UNPROCESSABLE_ENTITY,
    };
    error_response(status, e.to_string())
}

fn parse_pixel(id: &str) -> Result<PixelId, Response> {
    id.parse()
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, format!("Invalid pixel id {:?}", id)))
}

fn default_priority() -> Priority {
    Priority::High
}

/// List paired peripherals with their connection state
pub async fn list_peripherals(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.snapshot().await.peripherals)
}

pub async fn get_peripheral(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let pixel = match parse_pixel(&id) {
        Ok(pixel) => pixel,
        Err(response) => return response,
    };
    match state.scheduler.peripheral(pixel).await {
        Some(status) => Json(status).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "Peripheral not found"),
    }
}

#[derive(Deserialize)]
pub struct ConnectRequest {
    #[serde(default = "default_priority")]
    priority: Priority,
}

pub async fn connect_peripheral(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ConnectRequest>,
) -> Response {
    let pixel = match parse_pixel(&id) {
        Ok(pixel) => pixel,
        Err(response) => return response,
    };
    info!(pixel = %pixel, priority = ?req.priority, "Connect requested");
    match state.scheduler.request_connect(pixel, req.priority).await {
        Ok(peripheral_state) => Json(peripheral_state).into_response(),
        Err(e) => scheduler_error(e),
    }
}

#[derive(Deserialize)]
pub struct ProfileRequest {
    profile: Uuid,
    #[serde(default = "default_priority")]
    priority: Priority,
}

#[derive(Serialize)]
struct ProgramResponse {
    profile: Uuid,
    hash: u32,
    size: usize,
    #[serde(flatten)]
    result: pixels_connect::ProgramResult,
}

/// Compile a profile and queue it for the die unless it is already there
pub async fn program_profile(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ProfileRequest>,
) -> Response {
    let pixel = match parse_pixel(&id) {
        Ok(pixel) => pixel,
        Err(response) => return response,
    };
    let dataset = match state.compile(&req.profile).await {
        Ok(dataset) => dataset,
        Err(e) => return compile_error(req.profile, e),
    };
    let (hash, size) = (dataset.hash, dataset.len());
    info!(pixel = %pixel, profile = %req.profile, hash, "Profile requested");
    match state
        .scheduler
        .program_profile(pixel, dataset, req.priority)
        .await
    {
        Ok(result) => Json(ProgramResponse {
            profile: req.profile,
            hash,
            size,
            result,
        })
        .into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn cancel_peripheral(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let pixel = match parse_pixel(&id) {
        Ok(pixel) => pixel,
        Err(response) => return response,
    };
    match state.scheduler.cancel(pixel).await {
        Ok(()) => Json(serde_json::json!({"status": "cancelled"})).into_response(),
        Err(e) => scheduler_error(e),
    }
}

pub async fn retry_peripheral(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    let pixel = match parse_pixel(&id) {
        Ok(pixel) => pixel,
        Err(response) => return response,
    };
    match state.scheduler.retry(pixel).await {
        Ok(()) => Json(serde_json::json!({"status": "queued"})).into_response(),
        Err(e) => scheduler_error(e),
    }
}

#[derive(Deserialize)]
pub struct FirmwareRequest {
    /// Install even when the die is not outdated
    #[serde(default)]
    force: bool,
    #[serde(default = "default_priority")]
    priority: Priority,
}

pub async fn update_firmware(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<FirmwareRequest>,
) -> Response {
    let pixel = match parse_pixel(&id) {
        Ok(pixel) => pixel,
        Err(response) => return response,
    };
    let Some(image) = state.firmware.clone() else {
        return error_response(StatusCode::NOT_FOUND, "No firmware images configured");
    };
    info!(pixel = %pixel, force = req.force, "Firmware update requested");
    match state
        .scheduler
        .update_firmware(pixel, image, req.force, req.priority)
        .await
    {
        Ok(result) => Json(result).into_response(),
        Err(e) => scheduler_error(e),
    }
}

#[derive(Deserialize)]
pub struct AdapterRequest {
    state: AdapterState,
}

/// Flip the simulated radio; the scheduler pauses while it is not powered on
pub async fn set_adapter(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AdapterRequest>,
) -> impl IntoResponse {
    state.central.set_adapter(req.state);
    Json(serde_json::json!({ "adapter": req.state }))
}

pub async fn get_queue(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.scheduler.queue().await)
}

#[derive(Serialize)]
struct ProfileSummary {
    uuid: Uuid,
    name: String,
    die_type: DieType,
    rules: usize,
    animations: usize,
    brightness: f32,
}

pub async fn list_profiles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let library = state.library.read().await;
    let mut profiles: Vec<ProfileSummary> = library
        .profiles()
        .map(|p| ProfileSummary {
            uuid: p.uuid,
            name: p.name.clone(),
            die_type: p.die_type,
            rules: p.rules.len(),
            animations: p.animation_refs().len(),
            brightness: p.brightness,
        })
        .collect();
    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    Json(profiles)
}

#[derive(Serialize)]
struct DataSetResponse {
    profile: Uuid,
    hash: u32,
    size: usize,
    animations: Vec<Uuid>,
    remote_actions: Vec<RemoteAction>,
    records: DataSetDump,
}

/// Compiled DataSet of a profile, decoded record by record
pub async fn get_dataset(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Response {
    let dataset = match state.compile(&uuid).await {
        Ok(dataset) => dataset,
        Err(e) => return compile_error(uuid, e),
    };
    let records = match DataSetView::parse(&dataset.bytes) {
        Ok(view) => view.dump(),
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Compiled DataSet is malformed: {}", e),
            )
        }
    };
    Json(DataSetResponse {
        profile: dataset.profile,
        hash: dataset.hash,
        size: dataset.len(),
        animations: dataset.animations.clone(),
        remote_actions: dataset.remote_actions.clone(),
        records,
    })
    .into_response()
}

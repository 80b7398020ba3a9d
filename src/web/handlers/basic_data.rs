//! Administrative handlers for the ETL interfaces.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::Value;

use crate::basic_data::WorkerSettings;
use crate::web::response::ApiResponse;
use crate::web::AppState;

fn unknown_interface(name: &str) -> ApiResponse<Value> {
    ApiResponse::fail("UNKNOWN_INTERFACE", format!("no such interface: {name}"))
}

/// `POST /basic-data/{interface}/start`
pub async fn start(
    State(state): State<AppState>,
    Path(interface): Path<String>,
    Json(settings): Json<WorkerSettings>,
) -> ApiResponse<Value> {
    match state.interfaces.get(interface.as_str()) {
        Some(service) => service.start(settings).await.into(),
        None => unknown_interface(&interface),
    }
}

/// `POST /basic-data/{interface}/stop`
pub async fn stop(
    State(state): State<AppState>,
    Path(interface): Path<String>,
) -> ApiResponse<Value> {
    match state.interfaces.get(interface.as_str()) {
        Some(service) => service.stop().await.into(),
        None => unknown_interface(&interface),
    }
}

/// `POST /basic-data/{interface}/list` - queue status.
pub async fn list(
    State(state): State<AppState>,
    Path(interface): Path<String>,
) -> ApiResponse<Value> {
    match state.interfaces.get(interface.as_str()) {
        Some(service) => service.queue_status().await.into(),
        None => unknown_interface(&interface),
    }
}

/// `GET /basic-data/{interface}/profile` - stored worker settings.
pub async fn profile(
    State(state): State<AppState>,
    Path(interface): Path<String>,
) -> ApiResponse<WorkerSettings> {
    match state.interfaces.get(interface.as_str()) {
        Some(service) => service.profile().await.into(),
        None => ApiResponse::fail("UNKNOWN_INTERFACE", format!("no such interface: {interface}")),
    }
}

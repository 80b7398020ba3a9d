//! Gateway handlers.
//!
//! `/plsql/restful/{package}/{procedure}` keeps the legacy response
//! contract: the `appkey` header is checked first and a mismatch answers
//! the 401-shaped ESB body with HTTP 200; everything else on `/plsql` uses
//! the uniform [`ApiResponse`] envelope.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::esb::EsbResponse;
use crate::ora::PageResult;
use crate::plsql::{ApiDefinition, ApiRequestHistory, RegistParams};
use crate::web::response::ApiResponse;
use crate::web::AppState;

/// `POST /plsql/restful/{package}/{procedure}`
pub async fn invoke(
    State(state): State<AppState>,
    Path((package_name, procedure_name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Json<EsbResponse> {
    let appkey = headers
        .get("appkey")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if appkey.is_empty() {
        return Json(EsbResponse::unauthorized("appkey missing"));
    }
    if appkey != state.esb_appkey {
        return Json(EsbResponse::unauthorized("appkey verification failed"));
    }

    Json(
        state
            .gateway
            .invoke(&package_name, &procedure_name, body)
            .await,
    )
}

/// `POST /plsql/regist`
pub async fn submit_regist(
    State(state): State<AppState>,
    Json(params): Json<RegistParams>,
) -> ApiResponse<Value> {
    state.gateway.submit_regist(params).await.into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    #[serde(default)]
    pub orig_name: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_size() -> u32 {
    10
}

/// `GET /plsql/list`
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResponse<PageResult<ApiDefinition>> {
    state
        .gateway
        .list(&query.orig_name, query.page, query.size)
        .await
        .into()
}

/// `GET /plsql/detail/{id}`
pub async fn detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResponse<Option<ApiDefinition>> {
    state.gateway.detail(id).await.into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub id: i64,
    #[serde(default)]
    pub biz_name: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// `POST /plsql/edit`
pub async fn edit(
    State(state): State<AppState>,
    Json(request): Json<EditRequest>,
) -> ApiResponse<u64> {
    state
        .gateway
        .edit(request.id, request.biz_name, request.remark)
        .await
        .into()
}

fn username_from(headers: &HeaderMap) -> String {
    headers
        .get("x-username")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("SYSADMIN")
        .to_string()
}

/// `POST /plsql/invalid/{id}`
pub async fn invalidate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResponse<Value> {
    state
        .gateway
        .invalidate(id, &username_from(&headers))
        .await
        .into()
}

/// `POST /plsql/reregist/{id}`
pub async fn reregist(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> ApiResponse<Value> {
    state
        .gateway
        .reregist(id, &username_from(&headers))
        .await
        .into()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub interface_name: Option<String>,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_size")]
    pub size: u32,
}

/// `GET /plsql/history` - paginated request/response audit.
pub async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResponse<PageResult<ApiRequestHistory>> {
    state
        .gateway
        .request_history(query.interface_name.as_deref(), query.page, query.size)
        .await
        .into()
}

/// `GET /plsql/jobs` - outstanding registration jobs.
pub async fn jobs(State(state): State<AppState>) -> ApiResponse<Value> {
    state.gateway.regist_jobs().await.into()
}

/// `GET /plsql/queue/status`
pub async fn queue_status(State(state): State<AppState>) -> ApiResponse<Value> {
    state.gateway.regist_queue_status().await.into()
}

/// `POST /plsql/queue/pause`
pub async fn queue_pause(State(state): State<AppState>) -> ApiResponse<Value> {
    state.gateway.pause_regist_queue().await.into()
}

/// `POST /plsql/queue/resume`
pub async fn queue_resume(State(state): State<AppState>) -> ApiResponse<Value> {
    state.gateway.resume_regist_queue().await.into()
}

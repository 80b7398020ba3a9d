//! # HTTP Surface
//!
//! axum router over the ETL admin endpoints and the PL/SQL gateway.
//! Generic routes answer the uniform `{ success, data?, errorCode?,
//! message? }` envelope; the `/plsql/restful` prefix preserves the legacy
//! ESB response contract its callers were built against.

pub mod handlers;
pub mod response;

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::basic_data::InterfaceService;
use crate::plsql::GatewayService;

pub use response::ApiResponse;

#[derive(Clone)]
pub struct AppState {
    pub interfaces: Arc<HashMap<&'static str, Arc<InterfaceService>>>,
    pub gateway: Arc<GatewayService>,
    pub esb_appkey: String,
}

/// Assemble the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/basic-data/:interface/start", post(handlers::basic_data::start))
        .route("/basic-data/:interface/stop", post(handlers::basic_data::stop))
        .route("/basic-data/:interface/list", post(handlers::basic_data::list))
        .route("/basic-data/:interface/profile", get(handlers::basic_data::profile))
        .route(
            "/plsql/restful/:package_name/:procedure_name",
            post(handlers::plsql::invoke),
        )
        .route("/plsql/regist", post(handlers::plsql::submit_regist))
        .route("/plsql/list", get(handlers::plsql::list))
        .route("/plsql/detail/:id", get(handlers::plsql::detail))
        .route("/plsql/edit", post(handlers::plsql::edit))
        .route("/plsql/invalid/:id", post(handlers::plsql::invalidate))
        .route("/plsql/reregist/:id", post(handlers::plsql::reregist))
        .route("/plsql/history", get(handlers::plsql::history))
        .route("/plsql/jobs", get(handlers::plsql::jobs))
        .route("/plsql/queue/status", get(handlers::plsql::queue_status))
        .route("/plsql/queue/pause", post(handlers::plsql::queue_pause))
        .route("/plsql/queue/resume", post(handlers::plsql::queue_resume))
        .fallback(|| async { response::not_found() })
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

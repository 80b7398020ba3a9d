//! Uniform HTTP response envelope.
//!
//! Every generic route answers `{ success, data?, errorCode?, message? }`.
//! The `/plsql/restful` prefix is the one exception: its callers expect
//! raw ESB envelopes, so those handlers bypass this type entirely.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::database::DbOutcome;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            message: None,
        }
    }

    pub fn fail(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(error_code.into()),
            message: Some(message.into()),
        }
    }
}

impl<T: Serialize> From<DbOutcome<T>> for ApiResponse<T> {
    fn from(outcome: DbOutcome<T>) -> Self {
        Self {
            success: outcome.success,
            data: outcome.data,
            error_code: outcome.error_code,
            message: outcome.message,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Normalized body for routes that fall through the router.
pub fn not_found() -> ApiResponse<()> {
    ApiResponse::fail("404", "NOT_FOUND")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape_uses_camel_case() {
        let body = serde_json::to_value(ApiResponse::<()>::fail("E9999", "boom")).unwrap();
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["errorCode"], json!("E9999"));
        assert!(body.get("data").is_none());
    }

    #[test]
    fn test_outcome_conversion() {
        let outcome = DbOutcome::ok(json!({"n": 1}));
        let response: ApiResponse<_> = outcome.into();
        assert!(response.success);
        assert_eq!(response.data.unwrap()["n"], json!(1));
    }
}

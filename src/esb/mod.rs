//! # ESB Envelope and Outbound Client
//!
//! The standardized request/response wrapper used for every
//! system-to-system call, plus the HTTP client that speaks it. Business
//! success is determined solely by `returnCode` starting with `'A'`; any
//! other prefix - including an absent code - is failure. A failed call is
//! still normalized into a full response envelope so callers always have
//! timestamps and a message to persist.

use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

/// Bound on persisted process messages.
pub const RETURN_MSG_MAX_CHARS: usize = 1000;

/// Wire timestamp format (millisecond precision).
pub const ESB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn now_stamp() -> String {
    Local::now().format(ESB_TIME_FORMAT).to_string()
}

/// Character-safe truncation for persisted messages.
pub fn truncate_return_msg(msg: &str) -> String {
    msg.chars().take(RETURN_MSG_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEsbInfo {
    pub inst_id: String,
    pub request_time: String,
    pub attr1: Option<String>,
    pub attr2: Option<String>,
    pub attr3: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryInfo {
    pub page_size: Option<i64>,
    pub current_page: Option<i64>,
}

/// Outbound envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsbRequest {
    pub esb_info: RequestEsbInfo,
    pub query_info: QueryInfo,
    pub request_info: Value,
}

/// Build a fresh request envelope around a payload.
pub fn build_request(request_info: Value) -> EsbRequest {
    EsbRequest {
        esb_info: RequestEsbInfo {
            inst_id: Uuid::new_v4().to_string(),
            request_time: now_stamp(),
            attr1: None,
            attr2: None,
            attr3: None,
        },
        query_info: QueryInfo {
            page_size: Some(0),
            current_page: Some(0),
        },
        request_info,
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEsbInfo {
    pub inst_id: Option<String>,
    pub request_time: Option<String>,
    pub response_time: Option<String>,
    pub return_code: Option<String>,
    pub return_status: Option<String>,
    pub return_msg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr2: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attr3: Option<String>,
}

/// Inbound/returned envelope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EsbResponse {
    pub esb_info: ResponseEsbInfo,
    #[serde(default)]
    pub query_info: Option<Value>,
    #[serde(default)]
    pub result_info: Option<Value>,
}

impl EsbResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The 401-shaped body the gateway returns (with HTTP 200) when the
    /// appkey is missing or wrong.
    pub fn unauthorized(message: &str) -> Self {
        Self {
            esb_info: ResponseEsbInfo {
                inst_id: Some(Uuid::new_v4().to_string()),
                request_time: Some(now_stamp()),
                response_time: Some(now_stamp()),
                return_code: Some("E9999".to_string()),
                return_status: Some("E".to_string()),
                return_msg: Some(format!("401 {message}")),
                attr1: None,
                attr2: None,
                attr3: None,
            },
            query_info: None,
            result_info: None,
        }
    }

    pub fn is_success(&self) -> bool {
        is_success_code(self.esb_info.return_code.as_deref())
    }
}

/// `'A'`-prefixed return codes are the only success signal.
pub fn is_success_code(code: Option<&str>) -> bool {
    code.map_or(false, |code| code.starts_with('A'))
}

/// Basic-auth credentials stored per interface profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EsbAuth {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Outcome of one outbound call, already classified.
#[derive(Debug, Clone)]
pub struct TransportOutcome {
    pub success: bool,
    pub response: EsbResponse,
}

/// HTTP client speaking the ESB envelope.
#[derive(Debug, Clone)]
pub struct EsbClient {
    http: reqwest::Client,
}

impl Default for EsbClient {
    fn default() -> Self {
        Self::new()
    }
}

impl EsbClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self { http }
    }

    /// Wrap the payload in a fresh envelope and POST it.
    pub async fn post(&self, url: &str, auth: &EsbAuth, request_info: Value) -> TransportOutcome {
        let request = build_request(request_info);
        let request_time = request.esb_info.request_time.clone();
        let body = match serde_json::to_value(&request) {
            Ok(body) => body,
            Err(e) => return network_failure(&request_time, &e.to_string()),
        };
        self.post_raw(url, auth, &body, &request_time).await
    }

    /// POST a caller-assembled envelope (the callback path builds its own).
    pub async fn post_envelope(&self, url: &str, auth: &EsbAuth, body: &Value) -> TransportOutcome {
        self.post_raw(url, auth, body, &now_stamp()).await
    }

    async fn post_raw(
        &self,
        url: &str,
        auth: &EsbAuth,
        body: &Value,
        request_time: &str,
    ) -> TransportOutcome {
        let mut request = self.http.post(url).json(body);
        if let Some(username) = &auth.username {
            request = request.basic_auth(username, auth.password.as_deref());
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(url, error = %e, "esb call failed to send");
                return network_failure(request_time, &e.to_string());
            }
        };

        let raw: Value = match response.json().await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(url, error = %e, "esb response body unreadable");
                return network_failure(request_time, &e.to_string());
            }
        };

        normalize(raw, request_time)
    }
}

/// Fold whatever came back into a complete envelope, backfilling the
/// fields the remote left out, and classify it.
fn normalize(raw: Value, request_time: &str) -> TransportOutcome {
    let esb_info = raw.get("esbInfo");
    let pick = |field: &str| -> Option<String> {
        esb_info
            .and_then(|info| info.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    let return_code = pick("returnCode");
    let success = is_success_code(return_code.as_deref());

    let response = EsbResponse {
        esb_info: ResponseEsbInfo {
            inst_id: None,
            request_time: pick("requestTime").or_else(|| Some(request_time.to_string())),
            response_time: pick("responseTime").or_else(|| Some(now_stamp())),
            return_code: return_code.or_else(|| Some("ERROR".to_string())),
            return_status: pick("returnStatus").or_else(|| Some("ERROR".to_string())),
            return_msg: pick("returnMsg").or_else(|| Some(raw.to_string())),
            attr1: pick("attr1"),
            attr2: pick("attr2"),
            attr3: pick("attr3"),
        },
        query_info: raw.get("queryInfo").cloned(),
        result_info: raw.get("resultInfo").cloned(),
    };

    TransportOutcome { success, response }
}

fn network_failure(request_time: &str, message: &str) -> TransportOutcome {
    TransportOutcome {
        success: false,
        response: EsbResponse {
            esb_info: ResponseEsbInfo {
                inst_id: None,
                request_time: Some(request_time.to_string()),
                response_time: Some(now_stamp()),
                return_code: Some("ERROR".to_string()),
                return_status: Some("ERROR".to_string()),
                return_msg: Some(message.to_string()),
                attr1: None,
                attr2: None,
                attr3: None,
            },
            query_info: None,
            result_info: None,
        },
    }
}

//! Gateway service: invocation paths and the admin surface.
//!
//! Synchronous calls run the wrapper inline and answer with the ESB
//! envelope; calls carrying `callbackInfo.URL` are parked on a
//! per-source-system callback queue and answered immediately with the
//! message id. Both paths persist request and response audits around the
//! wrapper execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broker::{JobHandler, JobQueue, QueueRunner, RunnerHandle};
use crate::database::DbOutcome;
use crate::esb::{now_stamp, EsbResponse};
use crate::ora::{
    CompareOp, Criteria, Criterion, FindOptions, OrderBy, PageResult, Pagination, Repository,
};
use crate::plsql::api_def::{ApiDefinition, ApiRequestHistory, ApiStatus, RegistParams};
use crate::plsql::store::GatewayStore;

/// Registration queue name.
pub const REGIST_QUEUE: &str = "plsql-regist";

/// Outstanding-job cap per callback queue.
pub const CALLBACK_QUEUE_LIMIT: i64 = 30;

/// Wrapper execution core shared by the synchronous path and the callback
/// worker.
#[derive(Clone)]
pub struct Invoker {
    pub store: Arc<dyn GatewayStore>,
}

impl Invoker {
    /// Run the wrapper inline: audit the request, execute, map the
    /// out-binds into an ESB envelope, audit the response.
    pub async fn invoke_directly(
        &self,
        api: &ApiDefinition,
        orig_name: &str,
        message_id: i64,
        body: &Value,
    ) -> EsbResponse {
        let mut response = envelope_for(body);

        let audited = self
            .store
            .insert_request_audit(message_id, orig_name, body)
            .await;
        if !audited.success {
            warn!(
                orig_name = %orig_name,
                message_id,
                message = audited.message.as_deref().unwrap_or(""),
                "request audit insert failed"
            );
        }

        let invoke = self.store.invoke_wrapper(api, body).await;
        let out = invoke.result.as_ref();
        let out_info = |field: &str| -> Option<String> {
            out.and_then(|r| r.get("ESBINFO_O"))
                .and_then(|info| info.get(field))
                .and_then(Value::as_str)
                .map(str::to_string)
        };

        if invoke.success {
            response.esb_info.return_status = out_info("RETURNSTATUS").or(Some("S".to_string()));
            response.esb_info.return_code = out_info("RETURNCODE").or(Some("A9999".to_string()));
            response.esb_info.return_msg = out_info("RETURNMSG").or(invoke.message.clone());
        } else {
            response.esb_info.return_status = out_info("RETURNSTATUS").or(Some("E".to_string()));
            response.esb_info.return_code = out_info("RETURNCODE").or(Some("E9999".to_string()));
            response.esb_info.return_msg = out_info("RETURNMSG").or(invoke.message.clone());
        }
        response.esb_info.attr1 = out_info("ATTR1");
        response.esb_info.attr2 = out_info("ATTR2");
        response.esb_info.attr3 = out_info("ATTR3");
        response.result_info = out.and_then(|r| r.get("RESULTINFO")).cloned();

        let status = if invoke.success { "SUCCESS" } else { "ERROR" };
        let response_body = serde_json::to_value(&response).unwrap_or(Value::Null);
        let audited = self
            .store
            .update_response_audit(message_id, status, &response_body)
            .await;
        if !audited.success {
            warn!(
                orig_name = %orig_name,
                message_id,
                message = audited.message.as_deref().unwrap_or(""),
                "response audit update failed"
            );
        }

        response
    }
}

/// Per-source callback queues, created on demand with their own runner.
pub struct CallbackRuntime {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    handles: Mutex<HashMap<String, RunnerHandle>>,
}

impl CallbackRuntime {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            queue,
            handler,
            handles: Mutex::new(HashMap::new()),
        }
    }

    async fn ensure_runner(&self, queue_name: &str) {
        let mut handles = self.handles.lock().await;
        if !handles.contains_key(queue_name) {
            info!(queue = queue_name, "starting callback queue runner");
            let handle = QueueRunner::spawn(
                Arc::clone(&self.queue),
                queue_name,
                Arc::clone(&self.handler),
                Duration::from_millis(500),
            );
            handles.insert(queue_name.to_string(), handle);
        }
    }

    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        for (_, handle) in handles.drain() {
            handle.stop().await;
        }
    }
}

pub struct GatewayService {
    pub store: Arc<dyn GatewayStore>,
    pub queue: Arc<dyn JobQueue>,
    pub invoker: Invoker,
    pub callbacks: Arc<CallbackRuntime>,
    pub definitions: Repository<ApiDefinition>,
    pub history: Repository<ApiRequestHistory>,
}

impl GatewayService {
    /// Entry point of `POST /plsql/restful/{package}/{procedure}`.
    pub async fn invoke(&self, package: &str, procedure: &str, body: Value) -> EsbResponse {
        let orig_name = format!("{package}.{procedure}");
        let mut response = envelope_for(&body);

        let lookup = self.store.find_api(&orig_name).await;
        let api = match (lookup.success, lookup.data.flatten()) {
            (true, Some(api)) => api,
            _ => {
                response.esb_info.return_code = Some("E9999".to_string());
                response.esb_info.return_msg =
                    Some(format!("api {orig_name} is not registered"));
                return response;
            }
        };

        if api.has_status(ApiStatus::Invalid) {
            response.esb_info.return_code = Some("E9999".to_string());
            response.esb_info.return_msg =
                Some(format!("api {orig_name} is invalid, call refused"));
            return response;
        }
        if api.has_status(ApiStatus::Registing) {
            response.esb_info.return_code = Some("E9999".to_string());
            response.esb_info.return_msg = Some(format!("api {orig_name} is registering"));
            return response;
        }

        let message_id = self.store.next_message_id().await;
        let Some(message_id) = message_id.data else {
            response.esb_info.return_code = Some("E9999".to_string());
            response.esb_info.return_msg = Some("could not obtain a message id".to_string());
            return response;
        };

        let callback_url = body
            .get("callbackInfo")
            .and_then(|info| info.get("URL"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match callback_url {
            None => {
                self.invoker
                    .invoke_directly(&api, &orig_name, message_id, &body)
                    .await
            }
            Some(callback_url) => {
                self.enqueue_callback(&orig_name, message_id, callback_url, body, response)
                    .await
            }
        }
    }

    /// Park the call on the source system's callback queue.
    async fn enqueue_callback(
        &self,
        orig_name: &str,
        message_id: i64,
        callback_url: String,
        body: Value,
        mut response: EsbResponse,
    ) -> EsbResponse {
        let source = source_sys_code(&body);
        let queue_name = format!("{source}-callback");
        self.callbacks.ensure_runner(&queue_name).await;

        match self.queue.counts(&queue_name).await {
            Ok(counts) if counts.outstanding() >= CALLBACK_QUEUE_LIMIT => {
                response.esb_info.return_code = Some("E9999".to_string());
                response.esb_info.return_msg =
                    Some(format!("{queue_name} is saturated, retry later"));
                return response;
            }
            Err(e) => {
                response.esb_info.return_code = Some("E9999".to_string());
                response.esb_info.return_msg = Some(e.to_string());
                return response;
            }
            Ok(_) => {}
        }

        let payload = json!({
            "origName": orig_name,
            "messageId": message_id,
            "callbackUrl": callback_url,
            "body": body,
        });
        if let Err(e) = self
            .queue
            .enqueue(&queue_name, &message_id.to_string(), payload, None)
            .await
        {
            response.esb_info.return_code = Some("E9999".to_string());
            response.esb_info.return_msg = Some(e.to_string());
            return response;
        }

        response.esb_info.return_status = Some("S".to_string());
        response.esb_info.return_code = Some("A0001".to_string());
        response.esb_info.return_msg = Some(format!(
            "job submitted, messageId:{message_id}, wait for the callback"
        ));
        response.result_info = Some(json!({ "messageId": message_id }));
        response
    }

    /// Queue-guarded registration submit; the heavy work runs on the
    /// registration worker.
    pub async fn submit_regist(&self, params: RegistParams) -> DbOutcome<Value> {
        let job_name = params.orig_name();
        let outstanding = match self.queue.outstanding_jobs(REGIST_QUEUE).await {
            Ok(outstanding) => outstanding,
            Err(e) => return DbOutcome::fail("QUEUE_ERROR", e.to_string()),
        };
        if outstanding.iter().any(|job| job.name == job_name) {
            return DbOutcome::fail(
                "E0001",
                "registration of this api is already in progress, retry later",
            );
        }

        let payload = serde_json::to_value(&params).unwrap_or(Value::Null);
        match self
            .queue
            .enqueue(REGIST_QUEUE, &job_name, payload, None)
            .await
        {
            Ok(job_id) => DbOutcome::ok(json!({ "jobId": job_id })),
            Err(e) => DbOutcome::fail("QUEUE_ERROR", e.to_string()),
        }
    }

    /// Paginated definition list, contains-matching on the original name.
    pub async fn list(
        &self,
        orig_name: &str,
        page: u32,
        size: u32,
    ) -> DbOutcome<PageResult<ApiDefinition>> {
        let criteria = Criteria::Single(Criterion::new(
            "origName",
            CompareOp::LikeContains,
            Value::String(orig_name.to_string()),
        ));
        let options = FindOptions {
            order: Some(OrderBy::desc("id")),
            ..FindOptions::default()
        };
        match self
            .definitions
            .find_with_pagination(criteria, Pagination { page, size }, options)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => DbOutcome::fail("STATEMENT", e.to_string()),
        }
    }

    pub async fn detail(&self, id: i64) -> DbOutcome<Option<ApiDefinition>> {
        match self.definitions.find_by_id(Value::from(id)).await {
            Ok(outcome) => outcome,
            Err(e) => DbOutcome::fail("STATEMENT", e.to_string()),
        }
    }

    pub async fn edit(
        &self,
        id: i64,
        biz_name: Option<String>,
        remark: Option<String>,
    ) -> DbOutcome<u64> {
        let mut patch = Map::new();
        if let Some(biz_name) = biz_name {
            patch.insert("bizName".to_string(), Value::String(biz_name));
        }
        if let Some(remark) = remark {
            patch.insert("remark".to_string(), Value::String(remark));
        }
        match self.definitions.update(Value::from(id), patch).await {
            Ok(outcome) => outcome,
            Err(e) => DbOutcome::fail("STATEMENT", e.to_string()),
        }
    }

    /// Invalidate a definition; further calls are refused until it is
    /// re-registered.
    pub async fn invalidate(&self, id: i64, username: &str) -> DbOutcome<Value> {
        let mut patch = Map::new();
        patch.insert(
            "status".to_string(),
            Value::String(ApiStatus::Invalid.as_str().to_string()),
        );
        patch.insert(
            "lastUpdatedBy".to_string(),
            Value::String(username.to_string()),
        );
        patch.insert("lastUpdateDate".to_string(), Value::String(now_stamp()));

        let outcome = match self.definitions.update(Value::from(id), patch).await {
            Ok(outcome) => outcome,
            Err(e) => return DbOutcome::fail("STATEMENT", e.to_string()),
        };
        if !outcome.success {
            return outcome.cast_failure();
        }
        if outcome.data.unwrap_or(0) < 1 {
            return DbOutcome::fail("NO DATA UPDATED", "no matching api definition");
        }
        DbOutcome::ok(json!({ "id": id }))
    }

    /// Re-register an existing definition.
    pub async fn reregist(&self, id: i64, username: &str) -> DbOutcome<Value> {
        let found = self.detail(id).await;
        if !found.success {
            return found.cast_failure();
        }
        let Some(api) = found.data.flatten() else {
            return DbOutcome::fail("NO DATA FOUND", "no matching api definition");
        };
        self.submit_regist(RegistParams {
            package_name: api.orig_package_name.unwrap_or_default(),
            procedure_name: api.orig_object_name.unwrap_or_default(),
            biz_name: api.biz_name.unwrap_or_default(),
            remark: api.remark,
            last_updated_by: Some(username.to_string()),
        })
        .await
    }

    /// Request-history page, newest first.
    pub async fn request_history(
        &self,
        interface_name: Option<&str>,
        page: u32,
        size: u32,
    ) -> DbOutcome<PageResult<ApiRequestHistory>> {
        let criteria = match interface_name {
            Some(interface_name) => Criteria::Single(Criterion::new(
                "interfaceName",
                CompareOp::LikeContains,
                Value::String(interface_name.to_string()),
            )),
            None => Criteria::Plain(Map::new()),
        };
        let options = FindOptions {
            order: Some(OrderBy::desc("messageId")),
            ..FindOptions::default()
        };
        match self
            .history
            .find_with_pagination(criteria, Pagination { page, size }, options)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => DbOutcome::fail("STATEMENT", e.to_string()),
        }
    }

    pub async fn regist_jobs(&self) -> DbOutcome<Value> {
        match self.queue.outstanding_jobs(REGIST_QUEUE).await {
            Ok(mut jobs) => {
                jobs.sort_by(|a, b| b.id.cmp(&a.id));
                DbOutcome::ok(serde_json::to_value(jobs).unwrap_or(Value::Null))
            }
            Err(e) => DbOutcome::fail("GET_JOB_ERROR", e.to_string()),
        }
    }

    pub async fn regist_queue_status(&self) -> DbOutcome<Value> {
        match self.queue.is_paused(REGIST_QUEUE).await {
            Ok(is_paused) => DbOutcome::ok(json!({ "isPaused": is_paused })),
            Err(e) => DbOutcome::fail("QUERY_ERROR", e.to_string()),
        }
    }

    pub async fn pause_regist_queue(&self) -> DbOutcome<Value> {
        match self.queue.pause(REGIST_QUEUE).await {
            Ok(()) => DbOutcome::ok(Value::Null),
            Err(e) => DbOutcome::fail("PAUSE_QUEUE_ERR", e.to_string()),
        }
    }

    pub async fn resume_regist_queue(&self) -> DbOutcome<Value> {
        match self.queue.resume(REGIST_QUEUE).await {
            Ok(()) => DbOutcome::ok(Value::Null),
            Err(e) => DbOutcome::fail("RESUME_QUEUE_ERR", e.to_string()),
        }
    }
}

/// Empty envelope echoing the caller's instance id and request time.
fn envelope_for(body: &Value) -> EsbResponse {
    let mut response = EsbResponse::empty();
    response.esb_info.inst_id = body
        .get("esbInfo")
        .and_then(|info| info.get("instId"))
        .and_then(Value::as_str)
        .map(str::to_string);
    response.esb_info.request_time = body
        .get("esbInfo")
        .and_then(|info| info.get("requestTime"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| Some(now_stamp()));
    response.esb_info.response_time = Some(now_stamp());
    response
}

/// Source-system code buried in one of the known header shapes; callers
/// that declare none share the default queue.
fn source_sys_code(body: &Value) -> String {
    let upper = crate::plsql::store::upper_cased(body);
    let request_info = upper.get("REQUESTINFO");
    let paths: [&[&str]; 7] = [
        &["SOURCE_CODE"],
        &["HEADER", "SOURCE_CODE"],
        &["HEADER", "SCUX_SOURCE_CODE"],
        &["HEADER_TBL", "SOURCE_CODE"],
        &["HEADER_TBL", "SCUX_SOURCE_CODE"],
        &["HEAD_TBL", "SOURCE_CODE"],
        &["HEAD_TBL", "SCUX_SOURCE_CODE"],
    ];
    for path in paths {
        let mut cursor = request_info;
        for segment in path {
            cursor = cursor.and_then(|v| v.get(segment));
        }
        if let Some(code) = cursor.and_then(Value::as_str) {
            if !code.is_empty() {
                return code.to_string();
            }
        }
    }
    "default".to_string()
}

//! Registration and callback workers.
//!
//! Registration is the system's one compensating-action workflow: regist →
//! REGISTING → wrapper DDL → VALID, and any step's failure aborts the rest
//! and forces the definition to the INVALID terminal status. The callback
//! worker replays the synchronous path off-queue and delivers the result
//! to the caller's URL.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::broker::{Job, JobHandler, JobQueue};
use crate::database::DbOutcome;
use crate::error::BridgeError;
use crate::esb::{now_stamp, EsbAuth, EsbClient};
use crate::plsql::api_def::{ApiStatus, RegistParams};
use crate::plsql::service::{Invoker, REGIST_QUEUE};
use crate::plsql::store::GatewayStore;

/// Full registration workflow with the INVALID compensation.
pub async fn run_registration(
    store: &dyn GatewayStore,
    params: &RegistParams,
) -> DbOutcome<Value> {
    let orig_name = params.orig_name();

    let result = registration_steps(store, params).await;
    if result.success {
        return result;
    }

    // compensate: whatever step failed, the definition must not stay in a
    // half-registered state
    let compensated = store.update_status(&orig_name, ApiStatus::Invalid).await;
    if !compensated.success {
        warn!(
            orig_name = %orig_name,
            message = compensated.message.as_deref().unwrap_or(""),
            "could not mark definition INVALID after failed registration"
        );
    }
    result
}

async fn registration_steps(store: &dyn GatewayStore, params: &RegistParams) -> DbOutcome<Value> {
    let orig_name = params.orig_name();

    let registered = store.regist(params).await;
    if !registered.success {
        return registered.cast_failure();
    }
    let wrap_name = registered.data.unwrap_or_default();

    let flipped = store.update_status(&orig_name, ApiStatus::Registing).await;
    if !flipped.success {
        return flipped.cast_failure();
    }

    let compiled = store
        .generate_and_execute_ddl(&params.package_name, &params.procedure_name)
        .await;
    if !compiled.success {
        return compiled.cast_failure();
    }

    let validated = store.update_status(&orig_name, ApiStatus::Valid).await;
    if !validated.success {
        return validated.cast_failure();
    }

    info!(orig_name = %orig_name, wrap_name = %wrap_name, "api registered");
    DbOutcome::ok(json!({ "wrapName": wrap_name }))
}

/// Registration queue consumer.
pub struct RegistWorker {
    pub store: Arc<dyn GatewayStore>,
    pub queue: Arc<dyn JobQueue>,
}

#[async_trait]
impl JobHandler for RegistWorker {
    async fn handle(&self, job: &Job) -> crate::error::Result<()> {
        let params: RegistParams = serde_json::from_value(job.payload.clone())
            .map_err(|e| BridgeError::Gateway(format!("bad registration payload: {e}")))?;
        let job_name = params.orig_name();

        // a second submit may have slipped past the service-side guard
        let outstanding = self
            .queue
            .outstanding_jobs(REGIST_QUEUE)
            .await
            .map_err(|e| BridgeError::Gateway(e.to_string()))?;
        if outstanding
            .iter()
            .any(|other| other.name == job_name && other.id != job.id)
        {
            return Err(BridgeError::Gateway(
                "registration of this api is already in progress".to_string(),
            ));
        }

        info!(orig_name = %job_name, "registration pre-check");
        let exists = self
            .store
            .check_procedure(&params.package_name, &params.procedure_name)
            .await;
        if !exists.success {
            return Err(BridgeError::Gateway(
                exists.message.unwrap_or_else(|| "pre-check failed".to_string()),
            ));
        }
        if !exists.data.unwrap_or(false) {
            return Err(BridgeError::Gateway(format!(
                "{job_name} does not exist in the database"
            )));
        }

        let result = run_registration(self.store.as_ref(), &params).await;
        if result.success {
            Ok(())
        } else {
            Err(BridgeError::Gateway(
                result.message.unwrap_or_else(|| "registration failed".to_string()),
            ))
        }
    }
}

/// Callback queue consumer: execute the wrapper, then deliver the result
/// to the caller's URL, auditing both legs.
pub struct CallbackWorker {
    pub store: Arc<dyn GatewayStore>,
    pub invoker: Invoker,
    pub esb: EsbClient,
    pub callback_auth: EsbAuth,
}

#[async_trait]
impl JobHandler for CallbackWorker {
    async fn handle(&self, job: &Job) -> crate::error::Result<()> {
        let payload = &job.payload;
        let orig_name = payload
            .get("origName")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let message_id = payload
            .get("messageId")
            .and_then(Value::as_i64)
            .unwrap_or_default();
        let callback_url = payload
            .get("callbackUrl")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let body = payload.get("body").cloned().unwrap_or(Value::Null);

        let callback_id = self.store.next_callback_id().await.data.unwrap_or(message_id);
        let audited = self
            .store
            .insert_callback_audit(callback_id, message_id, &job.queue, &callback_url)
            .await;
        if !audited.success {
            warn!(
                orig_name = %orig_name,
                message_id,
                message = audited.message.as_deref().unwrap_or(""),
                "callback audit insert failed"
            );
        }

        let lookup = self.store.find_api(&orig_name).await;
        let Some(api) = lookup.data.flatten() else {
            let failed = self
                .store
                .update_callback_audit(callback_id, "ERROR", "E9999", "api definition missing")
                .await;
            if !failed.success {
                warn!(orig_name = %orig_name, "callback audit update failed");
            }
            return Err(BridgeError::Gateway(format!(
                "api {orig_name} vanished before callback execution"
            )));
        };

        let invoke_result = self
            .invoker
            .invoke_directly(&api, &orig_name, message_id, &body)
            .await;

        let callback_body = json!({
            "esbInfo": {
                "instId": invoke_result.esb_info.inst_id.clone().unwrap_or_default(),
                "requestTime": now_stamp(),
                "responseTime": now_stamp(),
                "returnCode": invoke_result.esb_info.return_code.clone().unwrap_or_else(|| "A0001".to_string()),
                "returnStatus": invoke_result.esb_info.return_status.clone().unwrap_or_else(|| "S".to_string()),
                "returnMsg": invoke_result.esb_info.return_msg.clone().unwrap_or_default(),
            },
            "requestInfo": {
                "jobId": job.id,
                "messageId": message_id,
                "resultInfo": invoke_result.result_info.clone(),
            },
        });

        info!(orig_name = %orig_name, message_id, url = %callback_url, "delivering callback");
        let delivery = self
            .esb
            .post_envelope(&callback_url, &self.callback_auth, &callback_body)
            .await;

        let (status, return_code, return_msg) = if delivery.success {
            (
                "SUCCESS",
                delivery
                    .response
                    .esb_info
                    .return_code
                    .clone()
                    .unwrap_or_default(),
                delivery
                    .response
                    .esb_info
                    .return_msg
                    .clone()
                    .unwrap_or_default(),
            )
        } else {
            (
                "ERROR",
                delivery
                    .response
                    .esb_info
                    .return_code
                    .clone()
                    .unwrap_or_else(|| "ERROR".to_string()),
                delivery
                    .response
                    .esb_info
                    .return_msg
                    .clone()
                    .unwrap_or_default(),
            )
        };

        let audited = self
            .store
            .update_callback_audit(callback_id, status, &return_code, &return_msg)
            .await;
        if !audited.success {
            warn!(
                orig_name = %orig_name,
                message_id,
                message = audited.message.as_deref().unwrap_or(""),
                "callback audit update failed"
            );
        }
        Ok(())
    }
}

//! Registration workflow tests.
//!
//! The regist → REGISTING → DDL → VALID pipeline and its compensating
//! INVALID flip run against a scripted store, so every abort point is
//! checked without a database.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use esb_bridge::broker::{Job, JobHandler, JobQueue, MemoryBroker};
use esb_bridge::database::DbOutcome;
use esb_bridge::plsql::{
    run_registration, ApiDefinition, ApiStatus, GatewayStore, InvokeResult, RegistParams,
    RegistWorker, REGIST_QUEUE,
};

/// Scripted store recording every status flip.
struct ScriptedStore {
    fail_regist: bool,
    fail_ddl: bool,
    procedure_exists: bool,
    status_log: Mutex<Vec<ApiStatus>>,
}

impl ScriptedStore {
    fn passing() -> Self {
        Self {
            fail_regist: false,
            fail_ddl: false,
            procedure_exists: true,
            status_log: Mutex::new(Vec::new()),
        }
    }

    async fn log(&self) -> Vec<ApiStatus> {
        self.status_log.lock().await.clone()
    }
}

#[async_trait]
impl GatewayStore for ScriptedStore {
    async fn check_procedure(&self, _package: &str, _procedure: &str) -> DbOutcome<bool> {
        DbOutcome::ok(self.procedure_exists)
    }

    async fn regist(&self, _params: &RegistParams) -> DbOutcome<String> {
        if self.fail_regist {
            DbOutcome::fail("REGIST_ERROR", "duplicate signature")
        } else {
            DbOutcome::ok("CUX_W_PKG.W_PROC".to_string())
        }
    }

    async fn update_status(&self, _orig_name: &str, status: ApiStatus) -> DbOutcome<u64> {
        self.status_log.lock().await.push(status);
        DbOutcome::ok(1)
    }

    async fn generate_and_execute_ddl(&self, _package: &str, _procedure: &str) -> DbOutcome<()> {
        if self.fail_ddl {
            DbOutcome::fail("COMPILE PACKAGE BODY", "PLS-00103")
        } else {
            DbOutcome::ok(())
        }
    }

    async fn find_api(&self, _orig_name: &str) -> DbOutcome<Option<ApiDefinition>> {
        DbOutcome::ok(None)
    }

    async fn next_message_id(&self) -> DbOutcome<i64> {
        DbOutcome::ok(1)
    }

    async fn next_callback_id(&self) -> DbOutcome<i64> {
        DbOutcome::ok(1)
    }

    async fn insert_request_audit(
        &self,
        _message_id: i64,
        _orig_name: &str,
        _body: &Value,
    ) -> DbOutcome<u64> {
        DbOutcome::ok(1)
    }

    async fn update_response_audit(
        &self,
        _message_id: i64,
        _status: &str,
        _body: &Value,
    ) -> DbOutcome<u64> {
        DbOutcome::ok(1)
    }

    async fn insert_callback_audit(
        &self,
        _callback_id: i64,
        _message_id: i64,
        _queue_name: &str,
        _callback_url: &str,
    ) -> DbOutcome<u64> {
        DbOutcome::ok(1)
    }

    async fn update_callback_audit(
        &self,
        _callback_id: i64,
        _status: &str,
        _return_code: &str,
        _return_msg: &str,
    ) -> DbOutcome<u64> {
        DbOutcome::ok(1)
    }

    async fn invoke_wrapper(&self, _api: &ApiDefinition, _payload: &Value) -> InvokeResult {
        InvokeResult::default()
    }
}

fn params() -> RegistParams {
    RegistParams {
        package_name: "CUX_PO_PKG".to_string(),
        procedure_name: "SYNC_ORDER".to_string(),
        biz_name: "po sync".to_string(),
        remark: None,
        last_updated_by: None,
    }
}

#[tokio::test]
async fn test_successful_registration_ends_valid() {
    let store = ScriptedStore::passing();
    let result = run_registration(&store, &params()).await;
    assert!(result.success);
    assert_eq!(store.log().await, vec![ApiStatus::Registing, ApiStatus::Valid]);
}

#[tokio::test]
async fn test_ddl_failure_compensates_to_invalid() {
    let store = ScriptedStore {
        fail_ddl: true,
        ..ScriptedStore::passing()
    };
    let result = run_registration(&store, &params()).await;
    assert!(!result.success);
    assert_eq!(result.error_code.as_deref(), Some("COMPILE PACKAGE BODY"));
    // REGISTING happened, VALID never did, INVALID closed it out
    assert_eq!(
        store.log().await,
        vec![ApiStatus::Registing, ApiStatus::Invalid]
    );
}

#[tokio::test]
async fn test_regist_step_failure_still_forces_invalid() {
    let store = ScriptedStore {
        fail_regist: true,
        ..ScriptedStore::passing()
    };
    let result = run_registration(&store, &params()).await;
    assert!(!result.success);
    assert_eq!(store.log().await, vec![ApiStatus::Invalid]);
}

#[tokio::test]
async fn test_worker_rejects_missing_procedure() {
    let store = Arc::new(ScriptedStore {
        procedure_exists: false,
        ..ScriptedStore::passing()
    });
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = RegistWorker {
        store: store.clone(),
        queue: Arc::clone(&broker),
    };
    let job = Job {
        id: 1,
        queue: REGIST_QUEUE.to_string(),
        name: params().orig_name(),
        payload: serde_json::to_value(params()).unwrap(),
    };

    let result = worker.handle(&job).await;
    assert!(result.is_err());
    // registration never started, so no status was touched
    assert!(store.log().await.is_empty());
}

#[tokio::test]
async fn test_worker_skips_duplicate_registration() {
    let store = Arc::new(ScriptedStore::passing());
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());

    // a second job with the same name is already waiting
    broker
        .enqueue(
            REGIST_QUEUE,
            &params().orig_name(),
            serde_json::to_value(params()).unwrap(),
            None,
        )
        .await
        .unwrap();

    let worker = RegistWorker {
        store: store.clone(),
        queue: Arc::clone(&broker),
    };
    let job = Job {
        id: 999,
        queue: REGIST_QUEUE.to_string(),
        name: params().orig_name(),
        payload: serde_json::to_value(params()).unwrap(),
    };

    let result = worker.handle(&job).await;
    assert!(result.is_err());
    assert!(store.log().await.is_empty());
}

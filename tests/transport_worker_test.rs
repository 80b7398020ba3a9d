//! Transport worker lifecycle tests.
//!
//! The workers run against an in-memory broker, an in-memory status store
//! and a local HTTP stub speaking the ESB envelope, so the full
//! claim → RUNNING → POST → SUCCESS/ERROR cycle is exercised without
//! Oracle or a remote ESB.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;

use esb_bridge::basic_data::{
    receipts, InterfaceSpec, JobProfile, MarkOutcome, MarkUpdateParams, ProcessStatus,
    StatusAssign, TransportStore, TransportWorker, UpdateWorker, WorkerSettings, JOB_TYPE_BATCH,
    JOB_TYPE_RETRY,
};
use esb_bridge::broker::{Job, JobHandler, JobQueue, MemoryBroker};
use esb_bridge::database::DbOutcome;
use esb_bridge::esb::EsbClient;

/// In-memory status table plus the profile row.
struct FakeStore {
    rows: Mutex<BTreeMap<i64, (ProcessStatus, Option<String>, i64)>>,
    url: String,
    sequence: Mutex<i64>,
}

impl FakeStore {
    fn with_pending(count: i64, url: &str) -> Self {
        let rows = (1..=count)
            .map(|id| (id, (ProcessStatus::Pending, None, 0)))
            .collect();
        Self {
            rows: Mutex::new(rows),
            url: url.to_string(),
            sequence: Mutex::new(1000),
        }
    }

    async fn status_counts(&self) -> HashMap<ProcessStatus, usize> {
        let rows = self.rows.lock().await;
        let mut counts = HashMap::new();
        for (status, _, _) in rows.values() {
            *counts.entry(*status).or_insert(0) += 1;
        }
        counts
    }

    async fn row(&self, id: i64) -> (ProcessStatus, Option<String>, i64) {
        self.rows.lock().await.get(&id).cloned().unwrap()
    }

    async fn apply(&self, status: ProcessStatus, assigns: &[StatusAssign]) -> DbOutcome<u64> {
        let mut rows = self.rows.lock().await;
        for assign in assigns {
            let id = assign.key.as_i64().unwrap();
            rows.insert(
                id,
                (status, assign.process_message.clone(), assign.transport_batch),
            );
        }
        DbOutcome::ok(assigns.len() as u64)
    }
}

#[async_trait]
impl TransportStore for FakeStore {
    async fn job_profile(&self) -> DbOutcome<JobProfile> {
        DbOutcome::ok(JobProfile {
            id: Some(1),
            env: Some("UAT".to_string()),
            interface_name: Some("receipts".to_string()),
            auth: Some(r#"{"username":"esb","password":"pw"}"#.to_string()),
            url: Some(self.url.clone()),
            profile_json: Some(r#"{"sleepSeconds":0,"transportRowLimit":100}"#.to_string()),
        })
    }

    async fn update_job_profile(&self, _settings: &WorkerSettings) -> DbOutcome<u64> {
        DbOutcome::ok(1)
    }

    async fn mark_updates(&self, _params: &MarkUpdateParams) -> DbOutcome<MarkOutcome> {
        DbOutcome::ok(MarkOutcome {
            batch_number: Some(1),
            rows_updated: 0,
        })
    }

    async fn query_pending(&self, limit: u32) -> DbOutcome<Vec<Map<String, Value>>> {
        let rows = self.rows.lock().await;
        let list = rows
            .iter()
            .filter(|(_, (status, _, _))| *status == ProcessStatus::Pending)
            .take(limit as usize)
            .map(|(id, _)| {
                let mut row = Map::new();
                row.insert("transactionId".to_string(), json!(id));
                row.insert("company".to_string(), json!("1000"));
                row.insert("factory".to_string(), json!("F01"));
                row.insert("supplierCode".to_string(), json!("S88"));
                row
            })
            .collect();
        DbOutcome::ok(list)
    }

    async fn next_batch_sequence(&self) -> DbOutcome<i64> {
        let mut sequence = self.sequence.lock().await;
        *sequence += 1;
        DbOutcome::ok(*sequence)
    }

    async fn assign_running(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.apply(ProcessStatus::Running, rows).await
    }

    async fn assign_success(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.apply(ProcessStatus::Success, rows).await
    }

    async fn assign_error(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.apply(ProcessStatus::Error, rows).await
    }

    async fn assign_pending(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.apply(ProcessStatus::Pending, rows).await
    }
}

/// Local stub answering every POST with the given return code.
async fn spawn_esb_stub(return_code: &'static str, return_msg: String) -> String {
    let app = Router::new().route(
        "/",
        post(move |Json(_body): Json<Value>| {
            let return_msg = return_msg.clone();
            async move {
                Json(json!({
                    "esbInfo": {
                        "returnCode": return_code,
                        "returnStatus": if return_code.starts_with('A') { "S" } else { "E" },
                        "returnMsg": return_msg,
                    }
                }))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

fn spec() -> InterfaceSpec {
    receipts::SPEC
}

fn batch_job(limit: u32) -> Job {
    Job {
        id: 1,
        queue: spec().transport_queue.to_string(),
        name: JOB_TYPE_BATCH.to_string(),
        payload: json!({"type": JOB_TYPE_BATCH, "transportRowLimit": limit, "sleepSeconds": 0}),
    }
}

#[tokio::test]
async fn test_batch_claims_at_most_the_row_limit() {
    let url = spawn_esb_stub("A0001", "accepted".to_string()).await;
    let store = Arc::new(FakeStore::with_pending(250, &url));
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = TransportWorker {
        spec: spec(),
        store: store.clone(),
        queue: Arc::clone(&broker),
        esb: EsbClient::new(),
    };

    worker.handle(&batch_job(100)).await.unwrap();

    let counts = store.status_counts().await;
    assert_eq!(counts.get(&ProcessStatus::Success), Some(&100));
    assert_eq!(counts.get(&ProcessStatus::Pending), Some(&150));
}

#[tokio::test]
async fn test_successful_batch_settles_rows_and_requeues_itself() {
    let url = spawn_esb_stub("A0001", "received".to_string()).await;
    let store = Arc::new(FakeStore::with_pending(5, &url));
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = TransportWorker {
        spec: spec(),
        store: store.clone(),
        queue: Arc::clone(&broker),
        esb: EsbClient::new(),
    };

    worker.handle(&batch_job(10)).await.unwrap();

    let (status, message, batch) = store.row(1).await;
    assert_eq!(status, ProcessStatus::Success);
    assert_eq!(message.as_deref(), Some("received"));
    assert!(batch > 1000);

    // the polling loop continues with the same parameters
    let outstanding = broker.outstanding_jobs(spec().transport_queue).await.unwrap();
    assert_eq!(outstanding.len(), 1);
    assert_eq!(outstanding[0].name, JOB_TYPE_BATCH);
}

#[tokio::test]
async fn test_failed_batch_marks_error_and_enqueues_one_retry_per_row() {
    let url = spawn_esb_stub("E9999", "remote validation failed".to_string()).await;
    let store = Arc::new(FakeStore::with_pending(3, &url));
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = TransportWorker {
        spec: spec(),
        store: store.clone(),
        queue: Arc::clone(&broker),
        esb: EsbClient::new(),
    };

    worker.handle(&batch_job(10)).await.unwrap();

    let counts = store.status_counts().await;
    assert_eq!(counts.get(&ProcessStatus::Error), Some(&3));

    let outstanding = broker.outstanding_jobs(spec().transport_queue).await.unwrap();
    let retries = outstanding
        .iter()
        .filter(|job| job.name == JOB_TYPE_RETRY)
        .count();
    assert_eq!(retries, 3);

    let (_, message, _) = store.row(1).await;
    assert_eq!(message.as_deref(), Some("remote validation failed"));
}

#[tokio::test]
async fn test_error_message_is_truncated_to_bound() {
    let url = spawn_esb_stub("E9999", "x".repeat(1200)).await;
    let store = Arc::new(FakeStore::with_pending(1, &url));
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = TransportWorker {
        spec: spec(),
        store: store.clone(),
        queue: Arc::clone(&broker),
        esb: EsbClient::new(),
    };

    worker.handle(&batch_job(10)).await.unwrap();

    let (status, message, _) = store.row(1).await;
    assert_eq!(status, ProcessStatus::Error);
    assert_eq!(message.unwrap().chars().count(), 1000);
}

#[tokio::test]
async fn test_retry_settles_row_without_requeue() {
    let url = spawn_esb_stub("A0001", "ok on retry".to_string()).await;
    let store = Arc::new(FakeStore::with_pending(1, &url));
    // start from ERROR, the state a failed batch leaves behind
    store
        .apply(
            ProcessStatus::Error,
            &[StatusAssign {
                key: json!(1),
                transport_batch: 1001,
                process_message: Some("failed".to_string()),
            }],
        )
        .await;
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = TransportWorker {
        spec: spec(),
        store: store.clone(),
        queue: Arc::clone(&broker),
        esb: EsbClient::new(),
    };

    let mut row = Map::new();
    row.insert("transactionId".to_string(), json!(1));
    row.insert("company".to_string(), json!("1000"));
    row.insert("factory".to_string(), json!("F01"));
    row.insert("supplierCode".to_string(), json!("S88"));
    let retry = Job {
        id: 9,
        queue: spec().transport_queue.to_string(),
        name: JOB_TYPE_RETRY.to_string(),
        payload: json!({"type": JOB_TYPE_RETRY, "retryRows": [row]}),
    };

    worker.handle(&retry).await.unwrap();

    let (status, message, _) = store.row(1).await;
    assert_eq!(status, ProcessStatus::Success);
    assert_eq!(message.as_deref(), Some("ok on retry"));

    // a retry never re-enqueues anything
    let outstanding = broker.outstanding_jobs(spec().transport_queue).await.unwrap();
    assert!(outstanding.is_empty());
}

#[tokio::test]
async fn test_repeated_assignment_is_last_write_wins() {
    let store = FakeStore::with_pending(1, "http://unused/");

    // running then success, twice over - the row must settle, never stick
    // in RUNNING
    let assigns = [StatusAssign {
        key: json!(1),
        transport_batch: 2000,
        process_message: None,
    }];
    assert!(store.assign_running(&assigns).await.success);
    assert!(store.assign_success(&assigns).await.success);
    assert!(store.assign_running(&assigns).await.success);
    let final_assigns = [StatusAssign {
        key: json!(1),
        transport_batch: 2001,
        process_message: Some("second message".to_string()),
    }];
    assert!(store.assign_success(&final_assigns).await.success);

    let (status, message, batch) = store.row(1).await;
    assert_eq!(status, ProcessStatus::Success);
    assert_eq!(message.as_deref(), Some("second message"));
    assert_eq!(batch, 2001);
}

#[tokio::test]
async fn test_update_worker_schedules_exactly_one_transport_job() {
    let url = spawn_esb_stub("A0001", "ok".to_string()).await;
    let store = Arc::new(FakeStore::with_pending(5, &url));
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = UpdateWorker {
        spec: spec(),
        store: store.clone(),
        queue: Arc::clone(&broker),
    };
    let job = Job {
        id: 1,
        queue: spec().update_queue.to_string(),
        name: "update".to_string(),
        payload: json!({}),
    };

    worker.handle(&job).await.unwrap();

    let transport = broker.outstanding_jobs(spec().transport_queue).await.unwrap();
    assert_eq!(transport.len(), 1);
    assert_eq!(transport[0].name, JOB_TYPE_BATCH);

    // the update loop re-enqueued itself
    let update = broker.outstanding_jobs(spec().update_queue).await.unwrap();
    assert_eq!(update.len(), 1);

    // a second cycle sees the waiting transport job and does not stack
    // another one
    worker.handle(&job).await.unwrap();
    let transport = broker.outstanding_jobs(spec().transport_queue).await.unwrap();
    assert_eq!(transport.len(), 1);
}

#[tokio::test]
async fn test_update_worker_skips_transport_when_nothing_pending() {
    let url = spawn_esb_stub("A0001", "ok".to_string()).await;
    let store = Arc::new(FakeStore::with_pending(0, &url));
    let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
    let worker = UpdateWorker {
        spec: spec(),
        store,
        queue: Arc::clone(&broker),
    };
    let job = Job {
        id: 1,
        queue: spec().update_queue.to_string(),
        name: "update".to_string(),
        payload: json!({}),
    };

    worker.handle(&job).await.unwrap();

    let transport = broker.outstanding_jobs(spec().transport_queue).await.unwrap();
    assert!(transport.is_empty());
}

mod admin {
    use super::*;
    use esb_bridge::basic_data::InterfaceService;

    fn settings(sleep_seconds: u64, transport_row_limit: u32) -> WorkerSettings {
        WorkerSettings {
            sleep_seconds,
            transport_row_limit,
            ..WorkerSettings::default()
        }
    }

    #[tokio::test]
    async fn test_start_validates_bounds() {
        let url = spawn_esb_stub("A0001", "ok".to_string()).await;
        let store = Arc::new(FakeStore::with_pending(0, &url));
        let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
        let service = InterfaceService::new(spec(), store, Arc::clone(&broker));

        let too_fast = service.start(settings(5, 10)).await;
        assert!(!too_fast.success);
        assert_eq!(too_fast.error_code.as_deref(), Some("INVALID_SLEEP"));

        let too_wide = service.start(settings(30, 500)).await;
        assert!(!too_wide.success);
        assert_eq!(too_wide.error_code.as_deref(), Some("INVALID_ROW_LIMIT"));
    }

    #[tokio::test]
    async fn test_start_seeds_one_update_job_and_resumes_queues() {
        let url = spawn_esb_stub("A0001", "ok".to_string()).await;
        let store = Arc::new(FakeStore::with_pending(0, &url));
        let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
        broker.pause(spec().update_queue).await.unwrap();
        broker.pause(spec().transport_queue).await.unwrap();
        let service = InterfaceService::new(spec(), store, Arc::clone(&broker));

        let outcome = service.start(settings(30, 50)).await;
        assert!(outcome.success, "{:?}", outcome.message);

        assert!(!broker.is_paused(spec().update_queue).await.unwrap());
        assert!(!broker.is_paused(spec().transport_queue).await.unwrap());
        let update = broker.outstanding_jobs(spec().update_queue).await.unwrap();
        assert_eq!(update.len(), 1);
        assert_eq!(update[0].name, "update");
    }

    #[tokio::test]
    async fn test_start_rejects_outstanding_work_with_distinct_codes() {
        let url = spawn_esb_stub("A0001", "ok".to_string()).await;
        let store = Arc::new(FakeStore::with_pending(0, &url));
        let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
        let service = InterfaceService::new(spec(), store, Arc::clone(&broker));

        broker
            .enqueue(spec().update_queue, "update", json!({}), None)
            .await
            .unwrap();
        let waiting = service.start(settings(30, 10)).await;
        assert_eq!(waiting.error_code.as_deref(), Some("EXIST WAITTING"));

        // claim it so it turns active
        let job = broker.fetch_next(spec().update_queue).await.unwrap().unwrap();
        let active = service.start(settings(30, 10)).await;
        assert_eq!(active.error_code.as_deref(), Some("EXIST ACTIVE"));
        broker.complete(&job).await.unwrap();

        broker
            .enqueue(
                spec().update_queue,
                "update",
                json!({}),
                Some(std::time::Duration::from_secs(300)),
            )
            .await
            .unwrap();
        let delayed = service.start(settings(30, 10)).await;
        assert_eq!(delayed.error_code.as_deref(), Some("EXIST DELAYED"));
    }

    #[tokio::test]
    async fn test_stop_pauses_and_drains_both_queues() {
        let url = spawn_esb_stub("A0001", "ok".to_string()).await;
        let store = Arc::new(FakeStore::with_pending(0, &url));
        let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
        let service = InterfaceService::new(spec(), store, Arc::clone(&broker));

        broker
            .enqueue(spec().update_queue, "update", json!({}), None)
            .await
            .unwrap();
        broker
            .enqueue(spec().transport_queue, JOB_TYPE_BATCH, json!({}), None)
            .await
            .unwrap();

        let outcome = service.stop().await;
        assert!(outcome.success);
        assert!(broker.is_paused(spec().update_queue).await.unwrap());
        assert!(broker.is_paused(spec().transport_queue).await.unwrap());
        assert!(broker
            .outstanding_jobs(spec().update_queue)
            .await
            .unwrap()
            .is_empty());
        assert!(broker
            .outstanding_jobs(spec().transport_queue)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_queue_status_reports_both_queues() {
        let url = spawn_esb_stub("A0001", "ok".to_string()).await;
        let store = Arc::new(FakeStore::with_pending(0, &url));
        let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
        let service = InterfaceService::new(spec(), store, Arc::clone(&broker));

        let status = service.queue_status().await;
        assert!(status.success);
        let data = status.data.unwrap();
        let list = data.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["name"], json!(spec().update_queue));
        assert_eq!(list[1]["name"], json!(spec().transport_queue));
    }
}

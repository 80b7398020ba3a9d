//! Administrative surface of one ETL interface.
//!
//! `start` validates the submitted settings, refuses to overlap a running
//! interface, persists the profile, clears non-active queue entries and
//! resumes both queues before seeding a fresh update job. `stop` drains
//! and pauses; an already-active job run finishes on its own and its
//! missing self-requeue is what actually stops the loop.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use crate::basic_data::profile::{WorkerSettings, MAX_TRANSPORT_ROW_LIMIT, MIN_SLEEP_SECONDS};
use crate::basic_data::store::TransportStore;
use crate::basic_data::worker::InterfaceSpec;
use crate::broker::JobQueue;
use crate::database::DbOutcome;

pub struct InterfaceService {
    pub spec: InterfaceSpec,
    pub store: Arc<dyn TransportStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl InterfaceService {
    pub fn new(
        spec: InterfaceSpec,
        store: Arc<dyn TransportStore>,
        queue: Arc<dyn JobQueue>,
    ) -> Self {
        Self { spec, store, queue }
    }

    /// Start (or restart) the interface's polling loop.
    pub async fn start(&self, settings: WorkerSettings) -> DbOutcome<Value> {
        if settings.sleep_seconds < MIN_SLEEP_SECONDS {
            return DbOutcome::fail(
                "INVALID_SLEEP",
                format!("sleepSeconds must be at least {MIN_SLEEP_SECONDS}"),
            );
        }
        if settings.transport_row_limit > MAX_TRANSPORT_ROW_LIMIT {
            return DbOutcome::fail(
                "INVALID_ROW_LIMIT",
                format!("transportRowLimit must not exceed {MAX_TRANSPORT_ROW_LIMIT}"),
            );
        }

        // refuse to overlap a running interface; one distinct error per
        // condition so operators see what is still outstanding
        for queue_name in [self.spec.update_queue, self.spec.transport_queue] {
            let counts = match self.queue.counts(queue_name).await {
                Ok(counts) => counts,
                Err(e) => return DbOutcome::fail("QUEUE_ERROR", e.to_string()),
            };
            if counts.active > 0 {
                return DbOutcome::fail("EXIST ACTIVE", format!("{queue_name} has an active job"));
            }
            if counts.waiting > 0 {
                return DbOutcome::fail(
                    "EXIST WAITTING",
                    format!("{queue_name} has a waiting job"),
                );
            }
            if counts.delayed > 0 {
                return DbOutcome::fail(
                    "EXIST DELAYED",
                    format!("{queue_name} has a delayed job"),
                );
            }
        }

        let updated = self.store.update_job_profile(&settings).await;
        if !updated.success {
            return updated.cast_failure();
        }

        for queue_name in [self.spec.update_queue, self.spec.transport_queue] {
            if let Err(e) = self.queue.drain(queue_name).await {
                return DbOutcome::fail("QUEUE_ERROR", e.to_string());
            }
            if let Err(e) = self.queue.resume(queue_name).await {
                return DbOutcome::fail("QUEUE_ERROR", e.to_string());
            }
        }

        if let Err(e) = self
            .queue
            .enqueue(self.spec.update_queue, "update", json!({}), None)
            .await
        {
            return DbOutcome::fail("QUEUE_ERROR", e.to_string());
        }

        info!(interface = self.spec.name, "interface started");
        DbOutcome::ok(json!({ "interface": self.spec.name }))
    }

    /// Drain non-active entries and pause both queues.
    pub async fn stop(&self) -> DbOutcome<Value> {
        for queue_name in [self.spec.update_queue, self.spec.transport_queue] {
            if let Err(e) = self.queue.pause(queue_name).await {
                return DbOutcome::fail("QUEUE_ERROR", e.to_string());
            }
            if let Err(e) = self.queue.drain(queue_name).await {
                return DbOutcome::fail("QUEUE_ERROR", e.to_string());
            }
        }
        info!(interface = self.spec.name, "interface stopped");
        DbOutcome::ok(json!({ "interface": self.spec.name }))
    }

    /// Paused flag and counters of both queues.
    pub async fn queue_status(&self) -> DbOutcome<Value> {
        let mut data = Vec::new();
        for queue_name in [self.spec.update_queue, self.spec.transport_queue] {
            let paused = match self.queue.is_paused(queue_name).await {
                Ok(paused) => paused,
                Err(e) => return DbOutcome::fail("QUERY_ERROR", e.to_string()),
            };
            let counts = match self.queue.counts(queue_name).await {
                Ok(counts) => counts,
                Err(e) => return DbOutcome::fail("QUERY_ERROR", e.to_string()),
            };
            data.push(json!({
                "name": queue_name,
                "isPaused": paused,
                "activeCount": counts.active,
                "waitingCount": counts.waiting,
                "delayedCount": counts.delayed,
            }));
        }
        DbOutcome::ok(Value::Array(data))
    }

    /// Stored worker settings for this interface.
    pub async fn profile(&self) -> DbOutcome<WorkerSettings> {
        let profile = self.store.job_profile().await;
        if !profile.success {
            return profile.cast_failure();
        }
        DbOutcome::ok(profile.data.map(|p| p.settings()).unwrap_or_default())
    }
}

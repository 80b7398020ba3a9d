//! Update and transport workers.
//!
//! One update worker and one transport worker per interface, scheduled
//! cooperatively by the broker with concurrency 1. The update worker marks
//! changed rows and keeps itself alive by re-enqueueing after its sleep;
//! the transport worker drains PENDING rows batch by batch, settling each
//! claimed row to SUCCESS or ERROR and enqueueing one single-row retry per
//! failed row.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::basic_data::profile::{JobProfile, WorkerSettings, DEFAULT_TRANSPORT_ROW_LIMIT};
use crate::basic_data::store::{MarkUpdateParams, StatusAssign, TransportStore};
use crate::broker::{Job, JobHandler, JobQueue};
use crate::esb::{truncate_return_msg, EsbClient};

/// Payload discriminator for transport jobs.
pub const JOB_TYPE_BATCH: &str = "batchTransport";
pub const JOB_TYPE_RETRY: &str = "errorRetry";

/// Shape of one interface's feed.
#[derive(Clone, Copy)]
pub struct InterfaceSpec {
    pub name: &'static str,
    pub update_queue: &'static str,
    pub transport_queue: &'static str,
    /// Domain field identifying a row in the status table.
    pub key_field: &'static str,
    /// Composite grouping key, when the destination schema requires
    /// grouped headers. `None` pushes all claimed rows as one group.
    pub group_key: Option<fn(&Map<String, Value>) -> String>,
    /// Builds the request payload for one group of rows.
    pub wrap_group: fn(&[Map<String, Value>]) -> Value,
}

impl InterfaceSpec {
    fn groups(&self, rows: Vec<Map<String, Value>>) -> Vec<(String, Vec<Map<String, Value>>)> {
        match self.group_key {
            None => vec![("all".to_string(), rows)],
            Some(key_fn) => {
                let mut groups: Vec<(String, Vec<Map<String, Value>>)> = Vec::new();
                for row in rows {
                    let key = key_fn(&row);
                    match groups.iter_mut().find(|(k, _)| *k == key) {
                        Some((_, members)) => members.push(row),
                        None => groups.push((key, vec![row])),
                    }
                }
                groups
            }
        }
    }
}

/// The update-phase worker: mark changed rows, decide whether to schedule
/// transport, sleep, re-enqueue itself.
pub struct UpdateWorker {
    pub spec: InterfaceSpec,
    pub store: Arc<dyn TransportStore>,
    pub queue: Arc<dyn JobQueue>,
}

#[async_trait]
impl JobHandler for UpdateWorker {
    async fn handle(&self, _job: &Job) -> crate::error::Result<()> {
        let interface = self.spec.name;
        info!(interface, "update cycle started");

        let profile = self.store.job_profile().await;
        let settings = if profile.success {
            profile
                .data
                .as_ref()
                .map(JobProfile::settings)
                .unwrap_or_default()
        } else {
            warn!(interface, "job profile unavailable, using defaults");
            WorkerSettings::default()
        };

        let mark = self
            .store
            .mark_updates(&MarkUpdateParams::from_settings(&settings))
            .await;
        if mark.success {
            let rows_updated = mark.data.as_ref().map_or(0, |m| m.rows_updated);
            info!(interface, rows_updated, "mark scan finished");
            self.schedule_transport(&settings).await;
        } else {
            warn!(
                interface,
                error_code = mark.error_code.as_deref().unwrap_or(""),
                message = mark.message.as_deref().unwrap_or(""),
                "mark scan failed"
            );
        }

        info!(interface, sleep = settings.sleep_seconds, "update cycle sleeping");
        tokio::time::sleep(Duration::from_secs(settings.sleep_seconds)).await;

        // keep the polling loop alive, unless a waiting or delayed
        // instance already exists
        match self.queue.counts(self.spec.update_queue).await {
            Ok(counts) if counts.waiting == 0 && counts.delayed == 0 => {
                if let Err(e) = self
                    .queue
                    .enqueue(self.spec.update_queue, "update", json!({}), None)
                    .await
                {
                    warn!(interface, error = %e, "failed to re-enqueue update job");
                }
            }
            Ok(counts) => {
                info!(
                    interface,
                    waiting = counts.waiting,
                    delayed = counts.delayed,
                    "next update already queued"
                );
            }
            Err(e) => warn!(interface, error = %e, "update queue introspection failed"),
        }
        Ok(())
    }
}

impl UpdateWorker {
    /// Enqueue exactly one transport job when PENDING rows exist and no
    /// transport job is active or waiting. Best-effort check-then-act.
    async fn schedule_transport(&self, settings: &WorkerSettings) {
        let interface = self.spec.name;
        let pending = self.store.query_pending(1).await;
        let has_pending = pending
            .data
            .as_ref()
            .map_or(false, |rows| !rows.is_empty());
        if !has_pending {
            info!(interface, "no pending rows, transport not scheduled");
            return;
        }

        match self.queue.counts(self.spec.transport_queue).await {
            Ok(counts) if counts.active == 0 && counts.waiting == 0 => {
                let payload = json!({
                    "type": JOB_TYPE_BATCH,
                    "sleepSeconds": settings.sleep_seconds,
                    "transportRowLimit": settings.transport_row_limit,
                });
                match self
                    .queue
                    .enqueue(self.spec.transport_queue, JOB_TYPE_BATCH, payload, None)
                    .await
                {
                    Ok(job_id) => info!(interface, job_id, "transport job scheduled"),
                    Err(e) => warn!(interface, error = %e, "failed to schedule transport"),
                }
            }
            Ok(counts) => {
                info!(
                    interface,
                    active = counts.active,
                    waiting = counts.waiting,
                    "transport already in flight, not scheduling another"
                );
            }
            Err(e) => warn!(interface, error = %e, "transport queue introspection failed"),
        }
    }
}

/// The transport-phase worker: batch pushes and single-row retries share
/// the claim → RUNNING → POST → SUCCESS/ERROR lifecycle.
pub struct TransportWorker {
    pub spec: InterfaceSpec,
    pub store: Arc<dyn TransportStore>,
    pub queue: Arc<dyn JobQueue>,
    pub esb: EsbClient,
}

#[async_trait]
impl JobHandler for TransportWorker {
    async fn handle(&self, job: &Job) -> crate::error::Result<()> {
        let job_type = job
            .payload
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or(JOB_TYPE_BATCH);
        if job_type == JOB_TYPE_RETRY {
            self.process_retry(job).await;
        } else {
            self.process_batch(job).await;
        }
        Ok(())
    }
}

impl TransportWorker {
    async fn process_batch(&self, job: &Job) {
        let interface = self.spec.name;
        let transport_row_limit = job
            .payload
            .get("transportRowLimit")
            .and_then(Value::as_u64)
            .map(|v| v as u32)
            .unwrap_or(DEFAULT_TRANSPORT_ROW_LIMIT);
        info!(interface, transport_row_limit, "batch transport started");

        let pending = self.store.query_pending(transport_row_limit).await;
        if !pending.success {
            warn!(
                interface,
                message = pending.message.as_deref().unwrap_or(""),
                "pending query failed"
            );
            return;
        }
        let rows = pending.data.unwrap_or_default();
        if rows.is_empty() {
            info!(interface, "nothing to push, transport loop ends");
            return;
        }
        info!(interface, rows = rows.len(), "rows claimed for this batch");

        let batch = self.store.next_batch_sequence().await;
        let Some(transport_batch) = batch.data else {
            warn!(interface, "could not obtain transport batch");
            return;
        };
        info!(interface, transport_batch, "transport batch obtained");

        let profile = self.store.job_profile().await;
        let Some(profile) = profile.data else {
            warn!(interface, "job profile unavailable, transport loop ends");
            return;
        };
        let url = profile.url.clone().unwrap_or_default();
        let auth = profile.esb_auth();

        for (group_key, group_rows) in self.spec.groups(rows) {
            info!(interface, group = %group_key, "pushing group");

            let assigns = self.assigns(&group_rows, transport_batch, None);
            self.checked(self.store.assign_running(&assigns).await, "assign_running");

            let body = (self.spec.wrap_group)(&group_rows);
            let outcome = self.esb.post(&url, &auth, body).await;
            let return_msg = outcome
                .response
                .esb_info
                .return_msg
                .clone()
                .unwrap_or_default();

            if outcome.success {
                info!(interface, group = %group_key, "push succeeded");
                let assigns = self.assigns(&group_rows, transport_batch, Some(return_msg));
                self.checked(self.store.assign_success(&assigns).await, "assign_success");
            } else {
                warn!(interface, group = %group_key, msg = %return_msg, "push failed");
                let truncated = truncate_return_msg(&return_msg);
                let assigns =
                    self.assigns(&group_rows, transport_batch, Some(truncated));
                self.checked(self.store.assign_error(&assigns).await, "assign_error");

                // one single-row retry per failed row
                for row in &group_rows {
                    let payload = json!({
                        "type": JOB_TYPE_RETRY,
                        "retryRows": [row],
                    });
                    if let Err(e) = self
                        .queue
                        .enqueue(self.spec.transport_queue, JOB_TYPE_RETRY, payload, None)
                        .await
                    {
                        warn!(interface, error = %e, "failed to enqueue retry");
                    }
                }
            }
        }

        // continuous polling loop: hand the same parameters to the next run
        if let Err(e) = self
            .queue
            .enqueue(
                self.spec.transport_queue,
                JOB_TYPE_BATCH,
                job.payload.clone(),
                None,
            )
            .await
        {
            warn!(interface, error = %e, "failed to re-enqueue transport job");
        }
        info!(interface, "batch transport finished");
    }

    /// Single-row retry: same lifecycle, exactly one row, no re-enqueue. A
    /// row failing here stays ERROR until an operator rescan.
    async fn process_retry(&self, job: &Job) {
        let interface = self.spec.name;
        let rows: Vec<Map<String, Value>> = job
            .payload
            .get("retryRows")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default();
        if rows.is_empty() {
            info!(interface, "no rows to retry");
            return;
        }
        info!(interface, rows = rows.len(), "error retry started");

        let batch = self.store.next_batch_sequence().await;
        let Some(transport_batch) = batch.data else {
            warn!(interface, "could not obtain transport batch for retry");
            return;
        };

        let profile = self.store.job_profile().await;
        let Some(profile) = profile.data else {
            warn!(interface, "job profile unavailable, retry abandoned");
            return;
        };
        let url = profile.url.clone().unwrap_or_default();
        let auth = profile.esb_auth();

        let assigns = self.assigns(&rows, transport_batch, None);
        self.checked(self.store.assign_running(&assigns).await, "assign_running");

        let body = (self.spec.wrap_group)(&rows);
        let outcome = self.esb.post(&url, &auth, body).await;
        let return_msg = outcome
            .response
            .esb_info
            .return_msg
            .clone()
            .unwrap_or_default();

        if outcome.success {
            info!(interface, "retry succeeded");
            let assigns = self.assigns(&rows, transport_batch, Some(return_msg));
            self.checked(self.store.assign_success(&assigns).await, "assign_success");
        } else {
            warn!(interface, msg = %return_msg, "retry failed, row settles to ERROR");
            let assigns = self.assigns(
                &rows,
                transport_batch,
                Some(truncate_return_msg(&return_msg)),
            );
            self.checked(self.store.assign_error(&assigns).await, "assign_error");
        }
    }

    fn assigns(
        &self,
        rows: &[Map<String, Value>],
        transport_batch: i64,
        process_message: Option<String>,
    ) -> Vec<StatusAssign> {
        rows.iter()
            .map(|row| StatusAssign {
                key: row.get(self.spec.key_field).cloned().unwrap_or(Value::Null),
                transport_batch,
                process_message: process_message.clone(),
            })
            .collect()
    }

    fn checked(&self, outcome: crate::database::DbOutcome<u64>, operation: &str) {
        if !outcome.success {
            warn!(
                interface = self.spec.name,
                operation,
                message = outcome.message.as_deref().unwrap_or(""),
                "status assignment failed"
            );
        }
    }
}

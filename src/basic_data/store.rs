//! Status-table access behind the [`TransportStore`] seam.
//!
//! Workers program against the trait so their lifecycle logic is testable
//! without an Oracle instance; [`SqlTransportStore`] is the production
//! implementation over the interface's history-table metadata.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::basic_data::profile::{JobProfile, ProfileStore, WorkerSettings};
use crate::basic_data::status::ProcessStatus;
use crate::database::{exec, ConnectionManager, DbOutcome};
use crate::ora::binds::{BindMap, BoundParam};
use crate::ora::mapper::{EntityMetadata, SqlType};
use crate::ora::repository::map_row;
use crate::ora::statement::RowLimit;
use crate::ora::Criteria;

/// Input of the mark-changed-rows procedure: either a lookback window or an
/// explicit date range, plus the row cap.
#[derive(Debug, Clone, Default)]
pub struct MarkUpdateParams {
    pub lookback_days: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub max_row_number: i64,
}

impl MarkUpdateParams {
    pub fn from_settings(settings: &WorkerSettings) -> Self {
        Self {
            lookback_days: if settings.enable_date_range {
                None
            } else {
                Some(settings.lookback_days)
            },
            date_from: settings.date_from.clone(),
            date_to: settings.date_to.clone(),
            max_row_number: settings.max_row_number,
        }
    }
}

/// Output of the mark procedure.
#[derive(Debug, Clone, Default)]
pub struct MarkOutcome {
    pub batch_number: Option<i64>,
    pub rows_updated: i64,
}

/// One row's status assignment.
#[derive(Debug, Clone)]
pub struct StatusAssign {
    pub key: Value,
    pub transport_batch: i64,
    pub process_message: Option<String>,
}

/// Everything the update/transport/retry workers need from storage.
#[async_trait]
pub trait TransportStore: Send + Sync {
    async fn job_profile(&self) -> DbOutcome<JobProfile>;

    async fn update_job_profile(&self, settings: &WorkerSettings) -> DbOutcome<u64>;

    /// Invoke the external mark procedure flipping eligible rows PENDING.
    async fn mark_updates(&self, params: &MarkUpdateParams) -> DbOutcome<MarkOutcome>;

    /// Claim candidates: up to `limit` PENDING rows in natural order.
    async fn query_pending(&self, limit: u32) -> DbOutcome<Vec<Map<String, Value>>>;

    /// Fresh transport-batch sequence number.
    async fn next_batch_sequence(&self) -> DbOutcome<i64>;

    async fn assign_running(&self, rows: &[StatusAssign]) -> DbOutcome<u64>;

    async fn assign_success(&self, rows: &[StatusAssign]) -> DbOutcome<u64>;

    async fn assign_error(&self, rows: &[StatusAssign]) -> DbOutcome<u64>;

    async fn assign_pending(&self, rows: &[StatusAssign]) -> DbOutcome<u64>;
}

/// Production store over one interface's history table.
pub struct SqlTransportStore {
    manager: Arc<ConnectionManager>,
    profiles: Arc<ProfileStore>,
    interface_name: &'static str,
    history: &'static EntityMetadata,
    key_field: &'static str,
    mark_statement: &'static str,
    sequence_sql: &'static str,
}

impl SqlTransportStore {
    pub fn new(
        manager: Arc<ConnectionManager>,
        profiles: Arc<ProfileStore>,
        interface_name: &'static str,
        history: &'static EntityMetadata,
        key_field: &'static str,
        mark_statement: &'static str,
        sequence_sql: &'static str,
    ) -> Self {
        Self {
            manager,
            profiles,
            interface_name,
            history,
            key_field,
            mark_statement,
            sequence_sql,
        }
    }

    /// Batch status update keyed by the interface's transaction key.
    async fn assign_status(
        &self,
        status: ProcessStatus,
        rows: &[StatusAssign],
    ) -> DbOutcome<u64> {
        let entities: Vec<Map<String, Value>> = rows
            .iter()
            .map(|row| {
                let mut entity = Map::new();
                entity.insert(self.key_field.to_string(), row.key.clone());
                entity.insert(
                    "transportBatch".to_string(),
                    Value::Number(row.transport_batch.into()),
                );
                entity.insert(
                    "processStatus".to_string(),
                    Value::String(status.as_str().to_string()),
                );
                entity.insert(
                    "processMessage".to_string(),
                    row.process_message
                        .clone()
                        .map_or(Value::Null, Value::String),
                );
                entity
            })
            .collect();

        let batch = match self.history.build_batch_update(&entities, &[self.key_field]) {
            Ok(batch) => batch,
            Err(e) => return DbOutcome::fail("STATEMENT", e.to_string()),
        };
        exec::execute_many(&self.manager, self.history.pool_alias, batch)
            .await
            .map(|r| r.rows_affected)
    }
}

#[async_trait]
impl TransportStore for SqlTransportStore {
    async fn job_profile(&self) -> DbOutcome<JobProfile> {
        self.profiles.get(self.interface_name).await
    }

    async fn update_job_profile(&self, settings: &WorkerSettings) -> DbOutcome<u64> {
        self.profiles
            .update_settings(self.interface_name, settings)
            .await
    }

    async fn mark_updates(&self, params: &MarkUpdateParams) -> DbOutcome<MarkOutcome> {
        let mut binds = BindMap::new();
        let insert = |binds: &mut BindMap, name: &str, param: BoundParam| {
            // bind names are fixed here, duplicates cannot happen
            let _ = binds.insert(name, param);
        };
        insert(
            &mut binds,
            "lookbackDays",
            BoundParam::in_out(
                params.lookback_days.map_or(Value::Null, Value::from),
                Some(SqlType::Number),
            ),
        );
        insert(
            &mut binds,
            "dateFrom",
            BoundParam::in_out(
                params.date_from.clone().map_or(Value::Null, Value::String),
                Some(SqlType::Varchar2),
            ),
        );
        insert(
            &mut binds,
            "dateTo",
            BoundParam::in_out(
                params.date_to.clone().map_or(Value::Null, Value::String),
                Some(SqlType::Varchar2),
            ),
        );
        insert(
            &mut binds,
            "maxRowNumber",
            BoundParam::in_out(Value::from(params.max_row_number), Some(SqlType::Number)),
        );
        insert(&mut binds, "batchNumber", BoundParam::output(SqlType::Number));
        insert(&mut binds, "rowsUpdated", BoundParam::output(SqlType::Number));

        let outcome = exec::execute_procedure(
            &self.manager,
            self.history.pool_alias,
            self.mark_statement.to_string(),
            binds,
        )
        .await;
        outcome.map(|outs| MarkOutcome {
            batch_number: outs.get("batchNumber").and_then(Value::as_i64),
            rows_updated: outs.get("rowsUpdated").and_then(Value::as_i64).unwrap_or(0),
        })
    }

    async fn query_pending(&self, limit: u32) -> DbOutcome<Vec<Map<String, Value>>> {
        let criteria = Criteria::of(&[(
            "processStatus",
            Value::String(ProcessStatus::Pending.as_str().to_string()),
        )]);
        let statement = match self.history.build_select(
            Some(&criteria),
            None,
            Some(RowLimit { top: limit }),
            None,
        ) {
            Ok(statement) => statement,
            Err(e) => return DbOutcome::fail("STATEMENT", e.to_string()),
        };
        let outcome = exec::query(&self.manager, self.history.pool_alias, statement).await;
        outcome.map(|rows| {
            rows.iter()
                .map(|row| map_row(self.history, row, None))
                .collect()
        })
    }

    async fn next_batch_sequence(&self) -> DbOutcome<i64> {
        let statement = crate::ora::CompiledStatement {
            sql: self.sequence_sql.to_string(),
            binds: BindMap::new(),
            options: Default::default(),
        };
        let outcome = exec::query(&self.manager, self.history.pool_alias, statement).await;
        if !outcome.success {
            return outcome.cast_failure();
        }
        let value = outcome
            .data
            .unwrap_or_default()
            .first()
            .and_then(|row| row.values().next().and_then(Value::as_i64));
        match value {
            Some(sequence) => DbOutcome::ok(sequence),
            None => DbOutcome::fail("NO_SEQUENCE", "sequence query returned no value"),
        }
    }

    async fn assign_running(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.assign_status(ProcessStatus::Running, rows).await
    }

    async fn assign_success(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.assign_status(ProcessStatus::Success, rows).await
    }

    async fn assign_error(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.assign_status(ProcessStatus::Error, rows).await
    }

    async fn assign_pending(&self, rows: &[StatusAssign]) -> DbOutcome<u64> {
        self.assign_status(ProcessStatus::Pending, rows).await
    }
}

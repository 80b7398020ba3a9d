//! Postgres-backed broker.
//!
//! Jobs live in `broker_jobs`, queue pause flags in `broker_queues`.
//! Claims go through `FOR UPDATE SKIP LOCKED` so concurrent runners never
//! double-claim a job.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use super::{Job, JobQueue, JobRef, JobState, QueueCounts};
use crate::error::{BridgeError, Result};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS broker_queues (
    queue_name TEXT PRIMARY KEY,
    paused     BOOLEAN NOT NULL DEFAULT FALSE
);
CREATE TABLE IF NOT EXISTS broker_jobs (
    job_id      BIGSERIAL PRIMARY KEY,
    queue_name  TEXT NOT NULL,
    job_name    TEXT NOT NULL,
    payload     JSONB NOT NULL DEFAULT '{}'::jsonb,
    state       TEXT NOT NULL DEFAULT 'waiting',
    run_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    started_at  TIMESTAMPTZ,
    finished_at TIMESTAMPTZ,
    last_error  TEXT
);
CREATE INDEX IF NOT EXISTS broker_jobs_claim_idx
    ON broker_jobs (queue_name, state, run_at, job_id);
"#;

#[derive(Debug, Clone)]
pub struct PgBroker {
    pool: PgPool,
}

impl PgBroker {
    /// Connect and install the broker schema.
    pub async fn connect(database_url: &str) -> Result<Self> {
        info!("connecting job broker");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(broker_err)?;
        let broker = Self { pool };
        broker.install_schema().await?;
        info!("job broker ready");
        Ok(broker)
    }

    /// Bring your own pool.
    pub async fn with_pool(pool: PgPool) -> Result<Self> {
        let broker = Self { pool };
        broker.install_schema().await?;
        Ok(broker)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn install_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(broker_err)?;
        }
        Ok(())
    }

    async fn ensure_queue(&self, queue: &str) -> Result<()> {
        sqlx::query("INSERT INTO broker_queues (queue_name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(broker_err)?;
        Ok(())
    }
}

fn broker_err(e: sqlx::Error) -> BridgeError {
    BridgeError::Broker(e.to_string())
}

#[async_trait]
impl JobQueue for PgBroker {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: Value,
        delay: Option<Duration>,
    ) -> Result<i64> {
        self.ensure_queue(queue).await?;
        let delay_secs = delay.map_or(0.0, |d| d.as_secs_f64());
        let state = if delay_secs > 0.0 {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        let row = sqlx::query(
            "INSERT INTO broker_jobs (queue_name, job_name, payload, state, run_at) \
             VALUES ($1, $2, $3, $4, NOW() + make_interval(secs => $5)) \
             RETURNING job_id",
        )
        .bind(queue)
        .bind(name)
        .bind(&payload)
        .bind(state.to_string())
        .bind(delay_secs)
        .fetch_one(&self.pool)
        .await
        .map_err(broker_err)?;
        let job_id: i64 = row.get("job_id");
        debug!(queue, name, job_id, "job enqueued");
        Ok(job_id)
    }

    async fn fetch_next(&self, queue: &str) -> Result<Option<Job>> {
        if self.is_paused(queue).await? {
            return Ok(None);
        }
        let row = sqlx::query(
            "UPDATE broker_jobs SET state = 'active', started_at = NOW() \
             WHERE job_id = ( \
                 SELECT job_id FROM broker_jobs \
                 WHERE queue_name = $1 AND state IN ('waiting','delayed') AND run_at <= NOW() \
                 ORDER BY job_id \
                 FOR UPDATE SKIP LOCKED \
                 LIMIT 1 \
             ) \
             RETURNING job_id, queue_name, job_name, payload",
        )
        .bind(queue)
        .fetch_optional(&self.pool)
        .await
        .map_err(broker_err)?;

        Ok(row.map(|row| Job {
            id: row.get("job_id"),
            queue: row.get("queue_name"),
            name: row.get("job_name"),
            payload: row.get("payload"),
        }))
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        sqlx::query(
            "UPDATE broker_jobs SET state = 'completed', finished_at = NOW() WHERE job_id = $1",
        )
        .bind(job.id)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(())
    }

    async fn fail(&self, job: &Job, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE broker_jobs SET state = 'failed', finished_at = NOW(), last_error = $2 \
             WHERE job_id = $1",
        )
        .bind(job.id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(())
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let row = sqlx::query(
            "SELECT \
                 COUNT(*) FILTER (WHERE state = 'active') AS active, \
                 COUNT(*) FILTER (WHERE state = 'waiting' AND run_at <= NOW()) AS waiting, \
                 COUNT(*) FILTER (WHERE state = 'delayed' \
                                  OR (state = 'waiting' AND run_at > NOW())) AS delayed \
             FROM broker_jobs WHERE queue_name = $1",
        )
        .bind(queue)
        .fetch_one(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(QueueCounts {
            active: row.get("active"),
            waiting: row.get("waiting"),
            delayed: row.get("delayed"),
        })
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        self.ensure_queue(queue).await?;
        sqlx::query("UPDATE broker_queues SET paused = TRUE WHERE queue_name = $1")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(broker_err)?;
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        self.ensure_queue(queue).await?;
        sqlx::query("UPDATE broker_queues SET paused = FALSE WHERE queue_name = $1")
            .bind(queue)
            .execute(&self.pool)
            .await
            .map_err(broker_err)?;
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool> {
        let row = sqlx::query("SELECT paused FROM broker_queues WHERE queue_name = $1")
            .bind(queue)
            .fetch_optional(&self.pool)
            .await
            .map_err(broker_err)?;
        Ok(row.map(|r| r.get("paused")).unwrap_or(false))
    }

    async fn drain(&self, queue: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM broker_jobs WHERE queue_name = $1 AND state IN ('waiting','delayed')",
        )
        .bind(queue)
        .execute(&self.pool)
        .await
        .map_err(broker_err)?;
        debug!(queue, removed = result.rows_affected(), "queue drained");
        Ok(result.rows_affected())
    }

    async fn outstanding_jobs(&self, queue: &str) -> Result<Vec<JobRef>> {
        let rows = sqlx::query(
            "SELECT job_id, job_name, state FROM broker_jobs \
             WHERE queue_name = $1 AND state IN ('waiting','delayed','active')",
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(broker_err)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let state: String = row.get("state");
                state.parse().ok().map(|state| JobRef {
                    id: row.get("job_id"),
                    name: row.get("job_name"),
                    state,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn test_broker() -> Option<PgBroker> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        PgBroker::connect(&url).await.ok()
    }

    #[tokio::test]
    async fn test_enqueue_claim_complete_cycle() {
        let Some(broker) = test_broker().await else {
            println!("skipping broker test - no TEST_DATABASE_URL provided");
            return;
        };
        let queue = "test_cycle_queue";
        broker.drain(queue).await.unwrap();

        broker
            .enqueue(queue, "update", json!({"n": 1}), None)
            .await
            .unwrap();
        let job = broker.fetch_next(queue).await.unwrap().expect("job due");
        assert_eq!(job.name, "update");

        let counts = broker.counts(queue).await.unwrap();
        assert_eq!(counts.active, 1);

        broker.complete(&job).await.unwrap();
        assert_eq!(broker.counts(queue).await.unwrap().active, 0);
    }

    #[tokio::test]
    async fn test_paused_queue_hands_out_nothing() {
        let Some(broker) = test_broker().await else {
            println!("skipping broker test - no TEST_DATABASE_URL provided");
            return;
        };
        let queue = "test_pause_queue";
        broker.drain(queue).await.unwrap();
        broker.pause(queue).await.unwrap();
        broker.enqueue(queue, "update", json!({}), None).await.unwrap();
        assert!(broker.fetch_next(queue).await.unwrap().is_none());
        broker.resume(queue).await.unwrap();
        assert!(broker.fetch_next(queue).await.unwrap().is_some());
    }
}

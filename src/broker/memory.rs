//! In-process broker.
//!
//! Implements the same [`JobQueue`] interface as [`super::PgBroker`] with a
//! mutex-guarded map. Used by unit tests and single-process local runs.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Job, JobQueue, JobRef, JobState, QueueCounts};
use crate::error::Result;

#[derive(Debug)]
struct MemJob {
    id: i64,
    name: String,
    payload: Value,
    state: JobState,
    run_at: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    paused: bool,
    jobs: Vec<MemJob>,
}

#[derive(Debug, Default)]
pub struct MemoryBroker {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    queues: HashMap<String, QueueState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobQueue for MemoryBroker {
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: Value,
        delay: Option<Duration>,
    ) -> Result<i64> {
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        let state = if delay.is_some() {
            JobState::Delayed
        } else {
            JobState::Waiting
        };
        let run_at = Instant::now() + delay.unwrap_or_default();
        inner.queues.entry(queue.to_string()).or_default().jobs.push(MemJob {
            id,
            name: name.to_string(),
            payload,
            state,
            run_at,
        });
        Ok(id)
    }

    async fn fetch_next(&self, queue: &str) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(None);
        };
        if state.paused {
            return Ok(None);
        }
        let now = Instant::now();
        let claimable = state.jobs.iter_mut().find(|job| {
            matches!(job.state, JobState::Waiting | JobState::Delayed) && job.run_at <= now
        });
        Ok(claimable.map(|job| {
            job.state = JobState::Active;
            Job {
                id: job.id,
                queue: queue.to_string(),
                name: job.name.clone(),
                payload: job.payload.clone(),
            }
        }))
    }

    async fn complete(&self, job: &Job) -> Result<()> {
        self.mark(job, JobState::Completed).await
    }

    async fn fail(&self, job: &Job, _error: &str) -> Result<()> {
        self.mark(job, JobState::Failed).await
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        let inner = self.inner.lock().await;
        let Some(state) = inner.queues.get(queue) else {
            return Ok(QueueCounts::default());
        };
        let now = Instant::now();
        let mut counts = QueueCounts::default();
        for job in &state.jobs {
            match job.state {
                JobState::Active => counts.active += 1,
                JobState::Waiting | JobState::Delayed if job.run_at <= now => counts.waiting += 1,
                JobState::Waiting | JobState::Delayed => counts.delayed += 1,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn pause(&self, queue: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.queues.entry(queue.to_string()).or_default().paused = true;
        Ok(())
    }

    async fn resume(&self, queue: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.queues.entry(queue.to_string()).or_default().paused = false;
        Ok(())
    }

    async fn is_paused(&self, queue: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.queues.get(queue).map(|q| q.paused).unwrap_or(false))
    }

    async fn drain(&self, queue: &str) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        let Some(state) = inner.queues.get_mut(queue) else {
            return Ok(0);
        };
        let before = state.jobs.len();
        state
            .jobs
            .retain(|job| !matches!(job.state, JobState::Waiting | JobState::Delayed));
        Ok((before - state.jobs.len()) as u64)
    }

    async fn outstanding_jobs(&self, queue: &str) -> Result<Vec<JobRef>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .queues
            .get(queue)
            .map(|state| {
                state
                    .jobs
                    .iter()
                    .filter(|job| {
                        matches!(
                            job.state,
                            JobState::Waiting | JobState::Delayed | JobState::Active
                        )
                    })
                    .map(|job| JobRef {
                        id: job.id,
                        name: job.name.clone(),
                        state: job.state,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl MemoryBroker {
    async fn mark(&self, job: &Job, state: JobState) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(queue) = inner.queues.get_mut(&job.queue) {
            if let Some(entry) = queue.jobs.iter_mut().find(|j| j.id == job.id) {
                entry.state = state;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fifo_claim_order() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", "first", json!({}), None).await.unwrap();
        broker.enqueue("q", "second", json!({}), None).await.unwrap();
        let job = broker.fetch_next("q").await.unwrap().unwrap();
        assert_eq!(job.name, "first");
    }

    #[tokio::test]
    async fn test_delayed_job_not_claimable_until_due() {
        let broker = MemoryBroker::new();
        broker
            .enqueue("q", "later", json!({}), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(broker.fetch_next("q").await.unwrap().is_none());
        let counts = broker.counts("q").await.unwrap();
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_pause_blocks_claims() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", "job", json!({}), None).await.unwrap();
        broker.pause("q").await.unwrap();
        assert!(broker.fetch_next("q").await.unwrap().is_none());
        broker.resume("q").await.unwrap();
        assert!(broker.fetch_next("q").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_drain_keeps_active_jobs() {
        let broker = MemoryBroker::new();
        broker.enqueue("q", "running", json!({}), None).await.unwrap();
        broker.enqueue("q", "pending", json!({}), None).await.unwrap();
        let active = broker.fetch_next("q").await.unwrap().unwrap();
        let removed = broker.drain("q").await.unwrap();
        assert_eq!(removed, 1);
        let outstanding = broker.outstanding_jobs("q").await.unwrap();
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].name, active.name);
        assert_eq!(outstanding[0].state, JobState::Active);
    }
}

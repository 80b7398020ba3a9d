//! # Job Broker
//!
//! The task queue driving the ETL workers and the gateway's registration
//! and callback jobs. The broker itself is an opaque collaborator: workers
//! only rely on the [`JobQueue`] interface - FIFO enqueue with optional
//! delay, per-state counters, pause/resume, and drain of non-active
//! entries.
//!
//! Two implementations ship:
//! - [`PgBroker`] - table-backed queue over a Postgres pool
//! - [`MemoryBroker`] - in-process queue for unit tests and local runs
//!
//! The active/waiting/delayed guards callers build on these counters are
//! best-effort check-then-act: a race window exists between the check and
//! the enqueue.

pub mod memory;
pub mod pg;
pub mod runner;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use memory::MemoryBroker;
pub use pg::PgBroker;
pub use runner::{JobHandler, QueueRunner, RunnerHandle};

/// Lifecycle states of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Due and claimable.
    Waiting,
    /// Enqueued with a delay that has not elapsed.
    Delayed,
    /// Claimed by a runner.
    Active,
    Completed,
    Failed,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Delayed => write!(f, "delayed"),
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(Self::Waiting),
            "delayed" => Ok(Self::Delayed),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job state: {s}")),
        }
    }
}

/// One claimed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub queue: String,
    pub name: String,
    pub payload: Value,
}

/// Outstanding-job reference for duplicate-job guards.
#[derive(Debug, Clone, Serialize)]
pub struct JobRef {
    pub id: i64,
    pub name: String,
    pub state: JobState,
}

/// Queue introspection counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub active: i64,
    pub waiting: i64,
    pub delayed: i64,
}

impl QueueCounts {
    /// Any entry that would run now or later.
    pub fn outstanding(&self) -> i64 {
        self.active + self.waiting + self.delayed
    }
}

/// The broker interface workers and services program against.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a job; `delay` postpones its due time.
    async fn enqueue(
        &self,
        queue: &str,
        name: &str,
        payload: Value,
        delay: Option<Duration>,
    ) -> Result<i64>;

    /// Claim the next due job, unless the queue is paused.
    async fn fetch_next(&self, queue: &str) -> Result<Option<Job>>;

    async fn complete(&self, job: &Job) -> Result<()>;

    async fn fail(&self, job: &Job, error: &str) -> Result<()>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts>;

    async fn pause(&self, queue: &str) -> Result<()>;

    async fn resume(&self, queue: &str) -> Result<()>;

    async fn is_paused(&self, queue: &str) -> Result<bool>;

    /// Remove every non-active entry (waiting and delayed). Active jobs
    /// finish on their own; stopping their self-requeue is what actually
    /// halts an interface.
    async fn drain(&self, queue: &str) -> Result<u64>;

    /// References to outstanding jobs, for duplicate-job guards.
    async fn outstanding_jobs(&self, queue: &str) -> Result<Vec<JobRef>>;
}

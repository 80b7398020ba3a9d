//! Queue runner: one logical worker per queue.
//!
//! Runners poll cooperatively with concurrency 1 - the scheduling model of
//! the ETL workers. A stop signal prevents further claims; the in-flight
//! job is never interrupted.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::{Job, JobQueue};

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> crate::error::Result<()>;
}

pub struct QueueRunner;

impl QueueRunner {
    /// Spawn the polling loop for one queue.
    pub fn spawn(
        queue: Arc<dyn JobQueue>,
        queue_name: impl Into<String>,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
    ) -> RunnerHandle {
        let queue_name = queue_name.into();
        let (stop_tx, stop_rx) = watch::channel(false);
        let join = tokio::spawn(run_loop(queue, queue_name, handler, poll_interval, stop_rx));
        RunnerHandle { stop_tx, join }
    }
}

pub struct RunnerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl RunnerHandle {
    /// Ask the runner to stop claiming; does not interrupt a running job.
    pub fn signal_stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Signal and wait for the loop to wind down.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        let _ = self.join.await;
    }
}

async fn run_loop(
    queue: Arc<dyn JobQueue>,
    queue_name: String,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    info!(queue = %queue_name, "queue runner started");
    loop {
        if *stop.borrow() {
            break;
        }
        match queue.fetch_next(&queue_name).await {
            Ok(Some(job)) => {
                let job_name = job.name.clone();
                match handler.handle(&job).await {
                    Ok(()) => {
                        if let Err(e) = queue.complete(&job).await {
                            warn!(queue = %queue_name, job = %job_name, error = %e, "complete failed");
                        }
                    }
                    Err(e) => {
                        warn!(queue = %queue_name, job = %job_name, error = %e, "job failed");
                        if let Err(e) = queue.fail(&job, &e.to_string()).await {
                            warn!(queue = %queue_name, job = %job_name, error = %e, "fail update failed");
                        }
                    }
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = stop.changed() => {}
                }
            }
            Err(e) => {
                error!(queue = %queue_name, error = %e, "broker poll failed");
                tokio::select! {
                    _ = tokio::time::sleep(poll_interval) => {}
                    _ = stop.changed() => {}
                }
            }
        }
    }
    info!(queue = %queue_name, "queue runner stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    #[async_trait]
    impl JobHandler for Counting {
        async fn handle(&self, _job: &Job) -> crate::error::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_runner_processes_jobs_then_stops() {
        let broker: Arc<dyn JobQueue> = Arc::new(MemoryBroker::new());
        broker.enqueue("q", "a", json!({}), None).await.unwrap();
        broker.enqueue("q", "b", json!({}), None).await.unwrap();

        let handler = Arc::new(Counting(AtomicUsize::new(0)));
        let runner = QueueRunner::spawn(
            Arc::clone(&broker),
            "q",
            Arc::clone(&handler) as Arc<dyn JobHandler>,
            Duration::from_millis(10),
        );

        tokio::time::sleep(Duration::from_millis(100)).await;
        runner.stop().await;

        assert_eq!(handler.0.load(Ordering::SeqCst), 2);
        assert_eq!(broker.counts("q").await.unwrap().outstanding(), 0);
    }
}

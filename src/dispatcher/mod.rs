//! Dispatcher: durable, de-duplicated hand-off from submission to worker
//! execution (§4.3).
//!
//! `enqueue(job_id)` must deliver the worker callback at least once per
//! enqueued job, collapsing concurrent enqueues of the same job into one
//! delivery. [`InProcessDispatcher`] is the bounded-channel, fixed-worker-pool
//! implementation this crate ships and exercises end-to-end; an external
//! durable queue is a configuration contract only (see [`crate::config::ExternalQueueConfig`]).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::processor::JobProcessor;

/// A durable, de-duplicated hand-off to worker execution.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Persist an intent to process `job_id`. If an intent with the same
    /// key is already pending or executing, this is a no-op that still
    /// returns `Ok(())`.
    async fn enqueue(&self, job_id: Uuid) -> anyhow::Result<()>;
}

/// In-memory set of job ids that are enqueued-but-not-yet-complete, guarding
/// against double-enqueue (§4.3). Lives behind a `Mutex` since both
/// `enqueue` callers and worker tasks touch it.
type PendingSet = Arc<Mutex<HashSet<Uuid>>>;

/// Bounded-channel, fixed-worker-pool dispatcher for embedded/single-process
/// deployments. Modeled on the Disk Guardian's channel-plus-background-task
/// shape, generalized from one writer task to a pool of N worker tasks each
/// driving jobs to completion.
pub struct InProcessDispatcher {
    tx: mpsc::Sender<Uuid>,
    pending: PendingSet,
}

impl InProcessDispatcher {
    /// Spawn the worker pool and return the dispatcher handle alongside the
    /// workers' `JoinHandle`s. Dropping the dispatcher closes the channel;
    /// callers should await the handles afterward to observe clean shutdown.
    pub fn spawn(processor: Arc<JobProcessor>, config: &ServiceConfig) -> (Self, Vec<JoinHandle<()>>) {
        let (tx, rx) = mpsc::channel(config.dispatcher_channel_capacity);
        let rx = Arc::new(Mutex::new(rx));
        let pending: PendingSet = Arc::new(Mutex::new(HashSet::new()));

        let mut handles = Vec::with_capacity(config.dispatcher_worker_count);
        for worker_id in 0..config.dispatcher_worker_count {
            let rx = rx.clone();
            let pending = pending.clone();
            let processor = processor.clone();

            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, pending, processor).await;
            }));
        }

        info!(
            worker_count = config.dispatcher_worker_count,
            channel_capacity = config.dispatcher_channel_capacity,
            "in-process dispatcher started"
        );

        (Self { tx, pending }, handles)
    }
}

#[async_trait]
impl Dispatcher for InProcessDispatcher {
    async fn enqueue(&self, job_id: Uuid) -> anyhow::Result<()> {
        {
            let mut pending = self.pending.lock().await;
            if !pending.insert(job_id) {
                debug!(%job_id, "enqueue collapsed into in-flight delivery");
                return Ok(());
            }
        }

        if self.tx.send(job_id).await.is_err() {
            // Channel closed (shutdown); undo the reservation so a future
            // dispatcher instance (e.g. after restart) can enqueue it.
            self.pending.lock().await.remove(&job_id);
            anyhow::bail!("dispatcher worker pool has shut down");
        }

        Ok(())
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Uuid>>>,
    pending: PendingSet,
    processor: Arc<JobProcessor>,
) {
    loop {
        let job_id = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };

        let Some(job_id) = job_id else {
            info!(worker_id, "dispatcher worker exiting: channel closed");
            break;
        };

        debug!(worker_id, %job_id, "dispatcher worker picked up job");

        if let Err(err) = processor.process_job(job_id).await {
            error!(worker_id, %job_id, error = %err, "job processing returned an error");
        }

        pending.lock().await.remove(&job_id);
    }
}

/// A dispatcher that always fails `enqueue`, used to exercise the
/// "accepted-but-not-scheduled" path (§4.3, §7) without building a real
/// client for an external queue.
pub struct UnavailableDispatcher;

#[async_trait]
impl Dispatcher for UnavailableDispatcher {
    async fn enqueue(&self, job_id: Uuid) -> anyhow::Result<()> {
        warn!(%job_id, "dispatcher unavailable; job remains queued for recovery");
        anyhow::bail!("dispatcher unavailable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryPolicy;
    use crate::gateway::simulated::{SimulatedAsrConfig, SimulatedAsrGateway};
    use crate::store::sqlite::SqliteStore;
    use crate::{new_job, JobStatus};
    use std::time::Duration;

    async fn test_processor() -> Arc<JobProcessor> {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let gateway = Arc::new(SimulatedAsrGateway::new(SimulatedAsrConfig::default()));
        Arc::new(JobProcessor::new(store, gateway, RetryPolicy::default()))
    }

    #[tokio::test]
    async fn test_enqueue_collapses_duplicate() {
        let processor = test_processor().await;
        let config = ServiceConfig {
            dispatcher_worker_count: 1,
            ..Default::default()
        };
        let (dispatcher, handles) = InProcessDispatcher::spawn(processor.clone(), &config);

        let (job, chunks) = new_job("u1", vec!["a.wav".into()]).unwrap();
        processor.store().create_job(&job, &chunks).await.unwrap();

        dispatcher.enqueue(job.job_id).await.unwrap();
        dispatcher.enqueue(job.job_id).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(dispatcher);
        for h in handles {
            let _ = h.await;
        }

        let (fetched, _) = processor.store().get_job_with_chunks(job.job_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_unavailable_dispatcher_reports_error() {
        let dispatcher = UnavailableDispatcher;
        assert!(dispatcher.enqueue(Uuid::new_v4()).await.is_err());
    }
}

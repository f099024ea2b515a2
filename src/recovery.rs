//! Recovery: the startup routine that reclaims work left mid-flight (§4.5).
//!
//! Runs once, before a process starts accepting new submissions. It must be
//! safe to race against new jobs being created concurrently, since both
//! paths converge on the same dispatcher.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::store::JobStore;

/// Demote any chunk left `IN_PROGRESS` back to `PENDING` and re-enqueue every
/// non-terminal job. `attempts` counters are left untouched by the demotion
/// (§9 open question 1, §4.5).
pub async fn run(store: &Arc<dyn JobStore>, dispatcher: &dyn Dispatcher) -> anyhow::Result<()> {
    store.reset_in_progress_chunks().await?;
    info!("recovery: reset all in-progress chunks to pending");

    let job_ids = store.list_non_terminal_job_ids().await?;
    info!(count = job_ids.len(), "recovery: re-enqueuing non-terminal jobs");

    let mut enqueue_failures = 0usize;
    for job_id in job_ids {
        if let Err(err) = dispatcher.enqueue(job_id).await {
            warn!(%job_id, error = %err, "recovery: failed to enqueue job, dispatcher is expected to converge later");
            enqueue_failures += 1;
        }
    }

    if enqueue_failures > 0 {
        error!(enqueue_failures, "recovery: some jobs could not be re-enqueued on this pass");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::InProcessDispatcher;
    use crate::gateway::simulated::{SimulatedAsrConfig, SimulatedAsrGateway};
    use crate::store::sqlite::SqliteStore;
    use crate::{new_job, ChunkStatus, JobStatus};
    use crate::config::ServiceConfig;
    use crate::processor::JobProcessor;
    use crate::store::ChunkUpdate as StoreChunkUpdate;
    use std::time::Duration;

    #[tokio::test]
    async fn test_recovery_resets_in_progress_and_preserves_attempts() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let (job, chunks) = new_job("u1", vec!["a.wav".into(), "b.wav".into()]).unwrap();
        store.create_job(&job, &chunks).await.unwrap();

        let chunk_ids = store.list_chunk_ids_for_job(job.job_id).await.unwrap();
        // Simulate a crash mid-claim: chunk 0 got claimed (now IN_PROGRESS,
        // attempts = 1) but the process died before the ASR call returned.
        store.claim_chunk(chunk_ids[0]).await.unwrap();

        let asr = Arc::new(SimulatedAsrGateway::new(SimulatedAsrConfig::default()));
        let processor = Arc::new(JobProcessor::new(store.clone(), asr, Default::default()));
        let config = ServiceConfig {
            dispatcher_worker_count: 1,
            ..Default::default()
        };
        let (dispatcher, handles) = InProcessDispatcher::spawn(processor, &config);

        run(&store, &dispatcher).await.unwrap();

        let chunk = store.get_chunk(chunk_ids[0]).await.unwrap().unwrap();
        assert_eq!(chunk.status, ChunkStatus::Pending, "demoted back to pending");
        assert_eq!(chunk.attempts, 1, "attempts survive the demotion");

        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(dispatcher);
        for h in handles {
            let _ = h.await;
        }

        let (finished, _) = store.get_job_with_chunks(job.job_id).await.unwrap().unwrap();
        assert_eq!(finished.status, JobStatus::Completed, "recovery re-enqueue completes the job");
    }

    #[tokio::test]
    async fn test_recovery_skips_terminal_jobs() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let (job, chunks) = new_job("u1", vec!["a.wav".into()]).unwrap();
        store.create_job(&job, &chunks).await.unwrap();

        let chunk_ids = store.list_chunk_ids_for_job(job.job_id).await.unwrap();
        store.claim_chunk(chunk_ids[0]).await.unwrap();
        store
            .update_chunk(
                chunk_ids[0],
                StoreChunkUpdate {
                    status: Some(ChunkStatus::Completed),
                    transcript_text: Some("done".into()),
                    last_error: None,
                },
            )
            .await
            .unwrap();
        store
            .update_job_status(job.job_id, JobStatus::Completed, None, Some("done"))
            .await
            .unwrap();

        let non_terminal = store.list_non_terminal_job_ids().await.unwrap();
        assert!(!non_terminal.contains(&job.job_id));
    }
}

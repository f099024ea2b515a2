//! Query/Aggregation: deterministic read-side views over jobs and chunks
//! (§4.6).
//!
//! Aggregation here is pure over a job + chunks snapshot and calls through
//! [`crate::aggregate_transcript`], the same function the processor uses to
//! finalize a job — so a fully-terminal job's stored `transcript_text`
//! always equals what this module would compute on the fly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::store::{JobFilter, JobStore};
use crate::{aggregate_transcript, AudioChunk, ChunkStatus, Job, JobStatus};

/// A job's transcript and per-chunk status, as served to a reader.
///
/// `chunk_statuses` is an explicit ordered `Vec` of `(audio_path, status)`
/// pairs rather than a map, so sequence order survives serialization
/// regardless of the consuming format's key-ordering guarantees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptResult {
    pub job_id: Uuid,
    pub user_id: String,
    pub transcript_text: String,
    pub chunk_statuses: Vec<(String, ChunkStatus)>,
    pub job_status: JobStatus,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TranscriptResult {
    fn from_job_and_chunks(job: Job, chunks: &[AudioChunk]) -> Self {
        let transcript_text = if job.status == JobStatus::Completed {
            job.transcript_text
        } else {
            aggregate_transcript(chunks)
        };

        Self {
            job_id: job.job_id,
            user_id: job.user_id,
            transcript_text,
            chunk_statuses: chunks
                .iter()
                .map(|c| (c.audio_path.clone(), c.status))
                .collect(),
            job_status: job.status,
            completed_at: job.completed_at,
        }
    }
}

/// Fetch a single job's transcript result, or `None` if the job id is
/// unknown.
pub async fn get_transcript(store: &Arc<dyn JobStore>, job_id: Uuid) -> anyhow::Result<Option<TranscriptResult>> {
    let Some((job, chunks)) = store.get_job_with_chunks(job_id).await? else {
        return Ok(None);
    };
    Ok(Some(TranscriptResult::from_job_and_chunks(job, &chunks)))
}

/// Search jobs by optional `user_id`/`job_status`, ordered by `created_at`
/// descending.
pub async fn search_transcripts(
    store: &Arc<dyn JobStore>,
    user_id: Option<String>,
    job_status: Option<JobStatus>,
) -> anyhow::Result<Vec<TranscriptResult>> {
    let filter = JobFilter { user_id, status: job_status };
    let results = store.search_jobs(&filter).await?;
    Ok(results
        .into_iter()
        .map(|(job, chunks)| TranscriptResult::from_job_and_chunks(job, &chunks))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::store::ChunkUpdate;
    use crate::new_job;
    use std::time::Duration;

    #[tokio::test]
    async fn test_get_transcript_orders_chunk_statuses_by_sequence() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let (job, chunks) = new_job("u1", vec!["a.wav".into(), "b.wav".into(), "c.wav".into()]).unwrap();
        store.create_job(&job, &chunks).await.unwrap();

        let result = get_transcript(&store, job.job_id).await.unwrap().unwrap();
        assert_eq!(
            result.chunk_statuses,
            vec![
                ("a.wav".to_string(), ChunkStatus::Pending),
                ("b.wav".to_string(), ChunkStatus::Pending),
                ("c.wav".to_string(), ChunkStatus::Pending),
            ]
        );
    }

    #[tokio::test]
    async fn test_get_transcript_unknown_job_is_none() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        assert!(get_transcript(&store, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_completed_job_transcript_matches_aggregation() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let (job, chunks) = new_job("u1", vec!["a.wav".into(), "b.wav".into()]).unwrap();
        store.create_job(&job, &chunks).await.unwrap();

        let chunk_ids = store.list_chunk_ids_for_job(job.job_id).await.unwrap();
        for (i, chunk_id) in chunk_ids.iter().enumerate() {
            store.claim_chunk(*chunk_id).await.unwrap();
            store
                .update_chunk(
                    *chunk_id,
                    ChunkUpdate {
                        status: Some(ChunkStatus::Completed),
                        transcript_text: Some(format!("segment {i}")),
                        last_error: None,
                    },
                )
                .await
                .unwrap();
        }
        let aggregated = aggregate_transcript(&store.get_job_with_chunks(job.job_id).await.unwrap().unwrap().1);
        store
            .update_job_status(job.job_id, JobStatus::Completed, None, Some(&aggregated))
            .await
            .unwrap();

        let result = get_transcript(&store, job.job_id).await.unwrap().unwrap();
        assert_eq!(result.transcript_text, "segment 0\nsegment 1");
    }

    #[tokio::test]
    async fn test_search_transcripts_filters_by_user_and_status() {
        let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        let (job1, chunks1) = new_job("alice", vec!["a.wav".into()]).unwrap();
        store.create_job(&job1, &chunks1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let (job2, chunks2) = new_job("bob", vec!["b.wav".into()]).unwrap();
        store.create_job(&job2, &chunks2).await.unwrap();

        let alice_results = search_transcripts(&store, Some("alice".to_string()), None).await.unwrap();
        assert_eq!(alice_results.len(), 1);
        assert_eq!(alice_results[0].user_id, "alice");

        let queued_results = search_transcripts(&store, None, Some(JobStatus::Queued)).await.unwrap();
        assert_eq!(queued_results.len(), 2);
    }
}

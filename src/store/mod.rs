//! Job Store: durable repository of jobs and their chunks.
//!
//! The trait is the seam the processor, recovery, and query components are
//! built against; [`sqlite::SqliteStore`] is the one concrete backend this
//! crate ships.

#[cfg(feature = "sqlite")]
pub mod sqlite;

use crate::{AudioChunk, ChunkStatus, Job, JobStatus};
use async_trait::async_trait;
use uuid::Uuid;

/// Result of [`JobStore::claim_chunk`] — a conditional transition, not a
/// plain read, so it is modeled as its own type rather than reusing
/// `ChunkStatus` directly.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// The chunk was PENDING or TRANSIENT_ERROR; it is now IN_PROGRESS with
    /// `attempts` incremented.
    Claimed { attempts: u32, audio_path: String },
    /// The chunk was already COMPLETED; no mutation occurred.
    AlreadyCompleted,
    /// The chunk was already PERMANENT_FAILURE; no mutation occurred.
    AlreadyFailed,
}

/// Filter for [`JobStore::search_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub user_id: Option<String>,
    pub status: Option<JobStatus>,
}

/// Fields a caller may update via [`JobStore::update_chunk`]. `None` leaves
/// the field untouched.
#[derive(Debug, Clone, Default)]
pub struct ChunkUpdate {
    pub status: Option<ChunkStatus>,
    pub transcript_text: Option<String>,
    pub last_error: Option<Option<String>>,
}

/// Durable repository of jobs and chunks, per §4.2 of the spec.
///
/// Implementations must make `claim_chunk` atomic: it is the single write
/// point that guards concurrent execution of the same chunk (invariant 6).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert `job` (QUEUED) and `chunks` (PENDING). Fails if `job.job_id`
    /// already exists.
    async fn create_job(&self, job: &Job, chunks: &[AudioChunk]) -> anyhow::Result<()>;

    /// Fetch a job and its chunks, ordered by `sequence`.
    async fn get_job_with_chunks(&self, job_id: Uuid) -> anyhow::Result<Option<(Job, Vec<AudioChunk>)>>;

    /// Update a job's status and, when terminalizing, its `completed_at` and
    /// `transcript_text`.
    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        completed_at: Option<chrono::DateTime<chrono::Utc>>,
        transcript_text: Option<&str>,
    ) -> anyhow::Result<()>;

    /// Chunk ids for a job, ordered by `sequence`.
    async fn list_chunk_ids_for_job(&self, job_id: Uuid) -> anyhow::Result<Vec<i64>>;

    /// Fetch a single chunk by id.
    async fn get_chunk(&self, chunk_id: i64) -> anyhow::Result<Option<AudioChunk>>;

    /// Apply a partial update to a chunk.
    async fn update_chunk(&self, chunk_id: i64, update: ChunkUpdate) -> anyhow::Result<()>;

    /// Atomically claim a chunk: the single serialization point for
    /// concurrent deliveries of the same job (§4.2, §5).
    async fn claim_chunk(&self, chunk_id: i64) -> anyhow::Result<ClaimOutcome>;

    /// Demote every IN_PROGRESS chunk back to PENDING. Used once by
    /// recovery at startup; `attempts` is left untouched (§9 open question
    /// 1).
    async fn reset_in_progress_chunks(&self) -> anyhow::Result<()>;

    /// Job ids whose status is QUEUED or IN_PROGRESS.
    async fn list_non_terminal_job_ids(&self) -> anyhow::Result<Vec<Uuid>>;

    /// Jobs matching `filter`, ordered by `created_at` descending.
    async fn search_jobs(&self, filter: &JobFilter) -> anyhow::Result<Vec<(Job, Vec<AudioChunk>)>>;

    /// Delete a job and all its chunks. Administrative cleanup; never
    /// called by the processor itself.
    async fn delete_job(&self, job_id: Uuid) -> anyhow::Result<()>;
}

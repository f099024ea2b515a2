//! transcribe-core: Idempotent Job Execution Engine for Audio Transcription
//!
//! # Overview
//!
//! This crate is the job execution subsystem of an audio transcription service.
//! A client submits an ordered set of audio chunk paths under a user id; the
//! service persists a job, dispatches per-chunk transcription work to an ASR
//! provider with bounded concurrency and retry/backoff, aggregates chunk
//! transcripts into a final job transcript, and survives process restarts by
//! reclaiming work left mid-flight.
//!
//! # Components
//!
//! - [`gateway`] — bounded-concurrency ASR client with transient/permanent
//!   failure classification.
//! - [`store`] — durable repository of jobs and chunks, with the atomic
//!   `claim_chunk` transition that serializes per-chunk execution.
//! - [`dispatcher`] — at-least-once, per-job de-duplicated hand-off to the
//!   worker entry point.
//! - [`processor`] — the state machine that drives a job to a terminal state.
//! - [`recovery`] — startup routine that reclaims mid-flight chunks and
//!   re-enqueues non-terminal jobs.
//! - [`query`] — deterministic aggregation of a job's chunks into a
//!   user-visible transcript result.
//! - [`config`] — environment-driven configuration for every tunable above.
//!
//! # Example
//!
//! ```no_run
//! use transcribe_core::{config::ServiceConfig, store::sqlite::SqliteStore, store::JobStore};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServiceConfig::from_env_or_default();
//!     let mut store = SqliteStore::open(&config.store_path).await?;
//!
//!     let (job, chunks) = transcribe_core::new_job("u1", vec!["a.wav".into(), "b.wav".into()])?;
//!     store.create_job(&job, &chunks).await?;
//!
//!     Ok(())
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod gateway;
pub mod processor;
pub mod query;
pub mod recovery;
pub mod store;

pub use error::CoreError;
pub use processor::JobProcessor;
pub use query::TranscriptResult;

/// Job execution status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job has been created but no chunk has started processing.
    Queued,
    /// At least one chunk has been claimed for processing.
    InProgress,
    /// Every chunk is `Completed`.
    Completed,
    /// At least one chunk is `PermanentFailure` and none remain non-terminal.
    Failed,
}

impl JobStatus {
    /// A terminal status is one the processor never transitions out of.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(anyhow::anyhow!("invalid job status: {other}")),
        }
    }
}

/// Audio chunk processing status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStatus {
    /// Waiting to be claimed.
    Pending,
    /// Claimed by a worker iteration; an ASR call is (or was) in flight.
    InProgress,
    /// Transcription succeeded.
    Completed,
    /// A transient ASR failure occurred; attempts remain.
    TransientError,
    /// A permanent ASR failure, or attempts exhausted on transient failures.
    PermanentFailure,
}

impl ChunkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChunkStatus::Completed | ChunkStatus::PermanentFailure)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkStatus::Pending => write!(f, "pending"),
            ChunkStatus::InProgress => write!(f, "in_progress"),
            ChunkStatus::Completed => write!(f, "completed"),
            ChunkStatus::TransientError => write!(f, "transient_error"),
            ChunkStatus::PermanentFailure => write!(f, "permanent_failure"),
        }
    }
}

impl std::str::FromStr for ChunkStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChunkStatus::Pending),
            "in_progress" => Ok(ChunkStatus::InProgress),
            "completed" => Ok(ChunkStatus::Completed),
            "transient_error" => Ok(ChunkStatus::TransientError),
            "permanent_failure" => Ok(ChunkStatus::PermanentFailure),
            other => Err(anyhow::anyhow!("invalid chunk status: {other}")),
        }
    }
}

/// A user-submitted transcription job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub job_id: Uuid,
    pub user_id: String,
    pub status: JobStatus,
    pub transcript_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One ordered audio segment belonging to a [`Job`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioChunk {
    pub chunk_id: i64,
    pub job_id: Uuid,
    pub sequence: u32,
    pub audio_path: String,
    pub status: ChunkStatus,
    pub transcript_text: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Construct a fresh [`Job`] and its [`AudioChunk`]s from a submission.
///
/// The job id is assigned here (a v4 UUID). Chunks are numbered densely from
/// 0 in submission order, matching invariant 1 of the data model. Returns an
/// error if `audio_chunk_paths` is empty or contains an empty path, or if
/// `user_id` is empty — these are the only validations the core performs; a
/// richer 422 response belongs to the out-of-scope HTTP adapter.
pub fn new_job(user_id: &str, audio_chunk_paths: Vec<String>) -> anyhow::Result<(Job, Vec<AudioChunk>)> {
    if user_id.is_empty() {
        anyhow::bail!("userId must not be empty");
    }
    if audio_chunk_paths.is_empty() {
        anyhow::bail!("audioChunkPaths must contain at least one entry");
    }
    if audio_chunk_paths.iter().any(|p| p.is_empty()) {
        anyhow::bail!("audioChunkPaths must not contain empty values");
    }

    let now = Utc::now();
    let job_id = Uuid::new_v4();

    let job = Job {
        job_id,
        user_id: user_id.to_string(),
        status: JobStatus::Queued,
        transcript_text: String::new(),
        created_at: now,
        updated_at: now,
        completed_at: None,
    };

    let chunks = audio_chunk_paths
        .into_iter()
        .enumerate()
        .map(|(sequence, audio_path)| AudioChunk {
            chunk_id: 0, // assigned by the store on insert
            job_id,
            sequence: sequence as u32,
            audio_path,
            status: ChunkStatus::Pending,
            transcript_text: String::new(),
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        })
        .collect();

    Ok((job, chunks))
}

/// Join the non-empty transcripts of `chunks` (expected in `sequence` order)
/// with newlines. This is the single aggregation rule invariant 4 and §4.6
/// both refer to; [`processor`] and [`query`] both call through here so the
/// stored and on-the-fly transcripts can never diverge.
pub fn aggregate_transcript<'a>(chunks: impl IntoIterator<Item = &'a AudioChunk>) -> String {
    chunks
        .into_iter()
        .map(|c| c.transcript_text.as_str())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

//! SQLite backend implementation.
//!
//! Provides persistent storage using SQLite with WAL mode for concurrency.
//! This is the one embedded backend the crate ships; `store_path` defaults
//! to a local database file (§4.7).

use super::{ChunkUpdate, ClaimOutcome, JobFilter, JobStore};
use crate::{AudioChunk, ChunkStatus, Job, JobStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{migrate::MigrateDatabase, QueryBuilder, Row};
use std::str::FromStr;
use uuid::Uuid;

/// SQLite-backed job store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a SQLite database at `path`, running migrations.
    pub async fn open(path: &str) -> Result<Self> {
        let db_url = if path.starts_with("sqlite://") {
            path.to_string()
        } else {
            format!("sqlite://{path}")
        };

        if !sqlx::Sqlite::database_exists(&db_url).await.unwrap_or(false) {
            sqlx::Sqlite::create_database(&db_url)
                .await
                .context("failed to create database")?;
        }

        let options = SqliteConnectOptions::from_str(&db_url)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("failed to connect to database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;

        Ok(Self { pool })
    }

    /// In-memory store for tests that don't want a temp file.
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .context("failed to open in-memory database")?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job> {
    let id_str: String = row.try_get("id")?;
    let status_str: String = row.try_get("status")?;
    Ok(Job {
        job_id: Uuid::parse_str(&id_str)?,
        user_id: row.try_get("user_id")?,
        status: JobStatus::from_str(&status_str)?,
        transcript_text: row.try_get("transcript_text")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn row_to_chunk(row: &SqliteRow) -> Result<AudioChunk> {
    let job_id_str: String = row.try_get("job_id")?;
    let status_str: String = row.try_get("status")?;
    Ok(AudioChunk {
        chunk_id: row.try_get("id")?,
        job_id: Uuid::parse_str(&job_id_str)?,
        sequence: row.try_get::<i64, _>("sequence")? as u32,
        audio_path: row.try_get("audio_path")?,
        status: ChunkStatus::from_str(&status_str)?,
        transcript_text: row.try_get("transcript_text")?,
        attempts: row.try_get::<i64, _>("attempts")? as u32,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn create_job(&self, job: &Job, chunks: &[AudioChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO jobs (id, user_id, status, transcript_text, created_at, updated_at, completed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.job_id.to_string())
        .bind(&job.user_id)
        .bind(job.status.to_string())
        .bind(&job.transcript_text)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.completed_at)
        .execute(&mut *tx)
        .await
        .context("job_id collision or insert failure")?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (job_id, sequence, audio_path, status, transcript_text, attempts, last_error, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(chunk.job_id.to_string())
            .bind(chunk.sequence as i64)
            .bind(&chunk.audio_path)
            .bind(chunk.status.to_string())
            .bind(&chunk.transcript_text)
            .bind(chunk.attempts as i64)
            .bind(&chunk.last_error)
            .bind(chunk.created_at)
            .bind(chunk.updated_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_job_with_chunks(&self, job_id: Uuid) -> Result<Option<(Job, Vec<AudioChunk>)>> {
        let job_row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(job_row) = job_row else {
            return Ok(None);
        };
        let job = row_to_job(&job_row)?;

        let chunk_rows = sqlx::query("SELECT * FROM chunks WHERE job_id = ? ORDER BY sequence ASC")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let chunks = chunk_rows.iter().map(row_to_chunk).collect::<Result<Vec<_>>>()?;

        Ok(Some((job, chunks)))
    }

    async fn update_job_status(
        &self,
        job_id: Uuid,
        status: JobStatus,
        completed_at: Option<DateTime<Utc>>,
        transcript_text: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = ?, completed_at = COALESCE(?, completed_at),
             transcript_text = COALESCE(?, transcript_text), updated_at = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(completed_at)
        .bind(transcript_text)
        .bind(Utc::now())
        .bind(job_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_chunk_ids_for_job(&self, job_id: Uuid) -> Result<Vec<i64>> {
        let rows = sqlx::query("SELECT id FROM chunks WHERE job_id = ? ORDER BY sequence ASC")
            .bind(job_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|r| r.get::<i64, _>("id")).collect())
    }

    async fn get_chunk(&self, chunk_id: i64) -> Result<Option<AudioChunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => Ok(Some(row_to_chunk(&r)?)),
            None => Ok(None),
        }
    }

    async fn update_chunk(&self, chunk_id: i64, update: ChunkUpdate) -> Result<()> {
        if update.status.is_none() && update.transcript_text.is_none() && update.last_error.is_none() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new("UPDATE chunks SET updated_at = ");
        builder.push_bind(Utc::now());

        if let Some(status) = update.status {
            builder.push(", status = ").push_bind(status.to_string());
        }
        if let Some(transcript_text) = update.transcript_text {
            builder.push(", transcript_text = ").push_bind(transcript_text);
        }
        if let Some(last_error) = update.last_error {
            builder.push(", last_error = ").push_bind(last_error);
        }
        builder.push(" WHERE id = ").push_bind(chunk_id);

        builder.build().execute(&self.pool).await?;
        Ok(())
    }

    async fn claim_chunk(&self, chunk_id: i64) -> Result<ClaimOutcome> {
        let now = Utc::now();

        let claimed = sqlx::query(
            "UPDATE chunks SET status = 'in_progress', attempts = attempts + 1, last_error = NULL, updated_at = ?
             WHERE id = ? AND status NOT IN ('completed', 'permanent_failure')
             RETURNING attempts, audio_path",
        )
        .bind(now)
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = claimed {
            let attempts: i64 = row.try_get("attempts")?;
            let audio_path: String = row.try_get("audio_path")?;
            return Ok(ClaimOutcome::Claimed {
                attempts: attempts as u32,
                audio_path,
            });
        }

        // Chunk was already terminal; disambiguate which.
        let row = sqlx::query("SELECT status FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?
            .context("chunk not found")?;
        let status: String = row.try_get("status")?;
        match status.as_str() {
            "completed" => Ok(ClaimOutcome::AlreadyCompleted),
            "permanent_failure" => Ok(ClaimOutcome::AlreadyFailed),
            other => anyhow::bail!("unexpected chunk status during claim: {other}"),
        }
    }

    async fn reset_in_progress_chunks(&self) -> Result<()> {
        sqlx::query("UPDATE chunks SET status = 'pending', updated_at = ? WHERE status = 'in_progress'")
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_non_terminal_job_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM jobs WHERE status IN ('queued', 'in_progress')")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|r| Uuid::parse_str(&r.get::<String, _>("id")).map_err(anyhow::Error::from))
            .collect()
    }

    async fn search_jobs(&self, filter: &JobFilter) -> Result<Vec<(Job, Vec<AudioChunk>)>> {
        let mut builder = QueryBuilder::new("SELECT * FROM jobs WHERE 1 = 1");
        if let Some(user_id) = &filter.user_id {
            builder.push(" AND user_id = ").push_bind(user_id.clone());
        }
        if let Some(status) = &filter.status {
            builder.push(" AND status = ").push_bind(status.to_string());
        }
        builder.push(" ORDER BY created_at DESC");

        let job_rows = builder.build().fetch_all(&self.pool).await?;

        let mut results = Vec::with_capacity(job_rows.len());
        for job_row in &job_rows {
            let job = row_to_job(job_row)?;
            let chunk_rows = sqlx::query("SELECT * FROM chunks WHERE job_id = ? ORDER BY sequence ASC")
                .bind(job.job_id.to_string())
                .fetch_all(&self.pool)
                .await?;
            let chunks = chunk_rows.iter().map(row_to_chunk).collect::<Result<Vec<_>>>()?;
            results.push((job, chunks));
        }

        Ok(results)
    }

    async fn delete_job(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(job_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

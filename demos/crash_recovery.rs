//! Crash recovery demo for transcribe-core.
//!
//! Run with: cargo run --example crash_recovery
//!
//! Starts a job, lets its first chunk reach IN_PROGRESS, then drops the
//! store handle to simulate a crash before reopening and running recovery.

use anyhow::Result;
use std::sync::Arc;
use transcribe_core::config::ServiceConfig;
use transcribe_core::dispatcher::InProcessDispatcher;
use transcribe_core::gateway::{SimulatedAsrConfig, SimulatedAsrGateway};
use transcribe_core::store::sqlite::SqliteStore;
use transcribe_core::store::JobStore;
use transcribe_core::{new_job, query, JobProcessor};

const DB_PATH: &str = "crash_recovery_demo.db";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let _ = std::fs::remove_file(DB_PATH);

    println!("=== transcribe-core crash recovery demo ===\n");

    let job_id = {
        println!("--- First run: simulating a crash mid-claim ---\n");
        let store = SqliteStore::open(DB_PATH).await?;
        let (job, chunks) = new_job("demo-user", vec!["intro.wav".into(), "body.wav".into()])?;
        store.create_job(&job, &chunks).await?;

        let chunk_ids = store.list_chunk_ids_for_job(job.job_id).await?;
        store.claim_chunk(chunk_ids[0]).await?;
        println!(
            "Claimed chunk {} (job {}), then 'crashing' before the ASR call returns.\n",
            chunk_ids[0], job.job_id
        );
        job.job_id
    };

    println!("--- Second run: reopening and recovering ---\n");
    let store: Arc<dyn JobStore> = Arc::new(SqliteStore::open(DB_PATH).await?);
    let config = ServiceConfig {
        dispatcher_worker_count: 1,
        ..Default::default()
    };
    let gateway = Arc::new(SimulatedAsrGateway::new(SimulatedAsrConfig {
        max_concurrency: config.asr_concurrency_limit,
        ..Default::default()
    }));
    let processor = Arc::new(JobProcessor::new(store.clone(), gateway, config.retry_policy));
    let (dispatcher, handles) = InProcessDispatcher::spawn(processor, &config);

    transcribe_core::recovery::run(&store, &dispatcher).await?;
    println!("Recovery demoted the in-flight chunk back to pending and re-enqueued the job.");

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    drop(dispatcher);
    for h in handles {
        h.await?;
    }

    let result = query::get_transcript(&store, job_id).await?.expect("job exists");
    println!("\n=== Job complete ===");
    println!("status: {:?}", result.job_status);
    println!("transcript: {}", result.transcript_text);

    std::fs::remove_file(DB_PATH).ok();
    Ok(())
}

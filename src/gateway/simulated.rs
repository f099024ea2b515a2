//! A deterministic, in-process ASR gateway for tests and local development.
//!
//! Mirrors the original service's ASR simulator: a fixed set of audio paths
//! that always fail permanently, a configurable transient-failure rate, and
//! an artificial per-call latency window. A real implementation would
//! replace this with a client for the actual provider behind the same
//! [`AsrGateway`] trait.

use super::{AsrGateway, AsrOutcome};
use async_trait::async_trait;
use rand::Rng;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::debug;

/// Configuration for [`SimulatedAsrGateway`].
#[derive(Debug, Clone)]
pub struct SimulatedAsrConfig {
    /// Maximum number of in-flight `transcribe` calls.
    pub max_concurrency: usize,
    /// Probability (0.0-1.0) that a non-permanent-failure call reports a
    /// transient failure instead of succeeding.
    pub transient_failure_rate: f64,
    /// Audio paths that always fail permanently, regardless of the transient
    /// failure rate.
    pub permanent_failures: HashSet<String>,
    pub min_latency: Duration,
    pub max_latency: Duration,
}

impl Default for SimulatedAsrConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 100,
            transient_failure_rate: 0.0,
            permanent_failures: HashSet::new(),
            min_latency: Duration::from_millis(0),
            max_latency: Duration::from_millis(0),
        }
    }
}

/// A simulated ASR client with the same concurrency and failure
/// characteristics as the production contract in §4.1 of the spec.
pub struct SimulatedAsrGateway {
    config: SimulatedAsrConfig,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl SimulatedAsrGateway {
    pub fn new(config: SimulatedAsrConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        Self {
            config,
            semaphore,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// The highest number of concurrent calls observed. Used by tests to
    /// verify the concurrency cap (§8 universal property 6) is respected.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AsrGateway for SimulatedAsrGateway {
    async fn transcribe(&self, audio_path: &str) -> AsrOutcome {
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = if self.config.max_latency > self.config.min_latency {
            let millis = rand::thread_rng()
                .gen_range(self.config.min_latency.as_millis()..=self.config.max_latency.as_millis());
            Duration::from_millis(millis as u64)
        } else {
            self.config.min_latency
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        debug!(audio_path, "simulated ASR call");

        let outcome = if self.config.permanent_failures.contains(audio_path) {
            AsrOutcome::Permanent(format!("audio path {audio_path} cannot be transcribed"))
        } else if rand::thread_rng().gen_bool(self.config.transient_failure_rate) {
            AsrOutcome::Transient("transient ASR failure".to_string())
        } else {
            AsrOutcome::Success(format!("Transcript for {audio_path}"))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }
}

//! Configuration for the job execution subsystem.
//!
//! Every tunable the other modules expose is collected here so a process can
//! be wired up from a single typed value, constructed from defaults or from
//! the environment.

use crate::error::CoreError;
use std::env;
use std::time::Duration;

/// Retry/backoff policy applied by the job processor to transient ASR
/// failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts before a chunk is permanently failed.
    pub max_retries: u32,
    /// Base backoff; the actual sleep is `backoff_base * attempts` (linear).
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Compute the linear backoff sleep for the given attempt count.
    pub fn backoff_for(&self, attempts: u32) -> Duration {
        self.backoff_base * attempts
    }
}

/// Top-level configuration for the service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub retry_policy: RetryPolicy,
    /// Maximum number of concurrent in-flight ASR calls.
    pub asr_concurrency_limit: usize,
    /// Number of worker tasks draining the in-process dispatcher queue.
    pub dispatcher_worker_count: usize,
    /// Bound on the in-process dispatcher's intake channel.
    pub dispatcher_channel_capacity: usize,
    /// Connection string or bare file path for the embedded store.
    pub store_path: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            asr_concurrency_limit: 100,
            dispatcher_worker_count: 4,
            dispatcher_channel_capacity: 10_000,
            store_path: "transcribe.db".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Build a configuration from environment variables, falling back to
    /// [`ServiceConfig::default`] for anything unset. Unlike
    /// [`ExternalQueueConfig::from_env`], nothing here is fatal-if-missing:
    /// these are tuning knobs, not an external integration contract.
    pub fn from_env_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(v) = env::var("TRANSCRIBE_MAX_RETRIES") {
            if let Ok(parsed) = v.parse() {
                config.retry_policy.max_retries = parsed;
            }
        }
        if let Ok(v) = env::var("TRANSCRIBE_ASR_CONCURRENCY_LIMIT") {
            if let Ok(parsed) = v.parse() {
                config.asr_concurrency_limit = parsed;
            }
        }
        if let Ok(v) = env::var("TRANSCRIBE_DISPATCHER_WORKERS") {
            if let Ok(parsed) = v.parse() {
                config.dispatcher_worker_count = parsed;
            }
        }
        if let Ok(v) = env::var("TRANSCRIBE_STORE_PATH") {
            config.store_path = v;
        }

        config
    }
}

/// Configuration for handing `enqueue(job_id)` off to an externally-hosted
/// durable task queue, mirroring the original service's Cloud Tasks
/// configuration contract. Building the actual cloud client is out of scope
/// (§1 of the spec); this type only captures and validates the contract.
#[derive(Debug, Clone)]
pub struct ExternalQueueConfig {
    pub project_id: String,
    pub location_id: String,
    pub queue_id: String,
    pub handler_url: String,
    pub service_account_email: Option<String>,
    pub audience: Option<String>,
}

impl ExternalQueueConfig {
    /// Load from environment variables. Missing required values are a fatal
    /// misconfiguration (`CoreError::Configuration`), not a silent default —
    /// per §6/§7 of the spec.
    pub fn from_env() -> Result<Self, CoreError> {
        let required = |name: &str| -> Result<String, CoreError> {
            env::var(name).map_err(|_| {
                CoreError::Configuration(format!("missing required environment variable {name}"))
            })
        };

        Ok(Self {
            project_id: required("TASKS_PROJECT_ID")?,
            location_id: required("TASKS_LOCATION_ID")?,
            queue_id: required("TASKS_QUEUE_ID")?,
            handler_url: required("TASKS_HANDLER_URL")?,
            service_account_email: env::var("TASKS_SERVICE_ACCOUNT_EMAIL").ok(),
            audience: env::var("TASKS_AUDIENCE").ok(),
        })
    }
}

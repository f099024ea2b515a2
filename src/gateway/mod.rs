//! ASR Gateway: bounded-concurrency client boundary to the transcription
//! provider.
//!
//! This module is pure with respect to storage — it has no knowledge of jobs
//! or chunks, only audio paths in and transcripts (or classified failures)
//! out.

pub mod simulated;

use async_trait::async_trait;

pub use simulated::{SimulatedAsrConfig, SimulatedAsrGateway};

/// Outcome of a single `transcribe` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsrOutcome {
    /// Transcription succeeded.
    Success(String),
    /// A retryable infrastructure failure (timeout, 5xx, throttling).
    Transient(String),
    /// The audio itself cannot be processed; retrying will not help.
    Permanent(String),
}

/// A client capable of invoking the ASR provider for one audio chunk.
///
/// Implementations must enforce their own concurrency cap internally (e.g.
/// via a `tokio::sync::Semaphore`) — the trait itself places no bound on
/// concurrent callers.
#[async_trait]
pub trait AsrGateway: Send + Sync {
    /// Transcribe the audio at `audio_path`, returning a classified outcome.
    /// This never returns an `Err` for ASR-domain failures; transient and
    /// permanent failures are outcomes, not errors, so the processor can
    /// match on them without downcasting.
    async fn transcribe(&self, audio_path: &str) -> AsrOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_equality() {
        assert_eq!(
            AsrOutcome::Success("hi".into()),
            AsrOutcome::Success("hi".into())
        );
        assert_ne!(
            AsrOutcome::Transient("a".into()),
            AsrOutcome::Permanent("a".into())
        );
    }
}

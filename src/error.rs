//! Crate-wide error taxonomy.
//!
//! Internal component code favors `anyhow::Result` exactly where the teacher
//! crate does (store/gateway/dispatcher/processor plumbing — §7's
//! `StoreError`/`DispatcherError`/`AsrTransient`/`AsrPermanent`/`NotFound`
//! kinds are distinguished structurally there, by `ClaimOutcome` and
//! `AsrOutcome`, rather than by a shared error enum). `CoreError` exists for
//! the one kind that is fatal independent of any in-flight job or chunk:
//! a missing or invalid configuration value at startup. Widen this enum
//! only when a second caller actually needs to match on a kind without
//! downcasting `anyhow::Error`.

use thiserror::Error;

/// Crate-wide error taxonomy. Currently carries only the startup
/// configuration failure (§7); the processor/store/gateway boundaries remain
/// `anyhow::Result` (see module docs above).
#[derive(Debug, Error)]
pub enum CoreError {
    /// A required configuration value was missing or invalid at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::Configuration("missing TASKS_PROJECT_ID".into());
        assert_eq!(err.to_string(), "configuration error: missing TASKS_PROJECT_ID");
    }
}

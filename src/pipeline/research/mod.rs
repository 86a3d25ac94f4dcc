//! Research run pipeline.
//!
//! Turns a natural-language market research request into ranked keyword rows
//! and cluster bundles grounded in web evidence.
//!
//! ## Architecture
//!
//! ```text
//! JobScheduler → ResearchOrchestrator → evidence → prompt → generation
//!                                     → parser → [repair | expansion]
//!                                     → scoring → backfill → hardening
//! ```
//!
//! Search and generation are collaborators behind traits (`traits.rs`); the
//! run-record store is a synchronous trait so that cancelling a queued job
//! finalizes it in the same call.

pub mod types;
pub mod traits;
pub mod context;
pub mod evidence;
pub mod prompt;
pub mod sanitize;
pub mod parser;
pub mod harden;
pub mod scoring;
pub mod backfill;
pub mod orchestrator;
pub mod store;
pub mod scheduler;

pub use types::*;
pub use traits::*;
pub use context::{CancellationToken, RunContext, Stage};
pub use orchestrator::ResearchOrchestrator;
pub use scheduler::{CancelOutcome, JobScheduler, SchedulerConfig, SchedulerStats};
pub use store::InMemoryRunStore;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResearchError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{provider} unavailable: {reason}")]
    ProviderUnavailable {
        provider: &'static str,
        reason: String,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stage '{stage}' timed out")]
    Timeout { stage: String },

    #[error("Run cancelled at stage '{stage}'")]
    Cancelled { stage: String },

    #[error("Scheduler is shut down and no longer accepts jobs")]
    SchedulerClosed,

    #[error("Run store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors from the run-record store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Internal lock error")]
    LockPoisoned,

    #[error("Run not found: {0}")]
    NotFound(uuid::Uuid),
}

impl ResearchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::ProviderUnavailable { .. } => ErrorKind::ProviderUnavailable,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::SchedulerClosed => ErrorKind::SchedulerClosed,
            Self::Store(_) => ErrorKind::Internal,
        }
    }

    fn stage(&self) -> Option<String> {
        match self {
            Self::Timeout { stage } | Self::Cancelled { stage } => Some(stage.clone()),
            _ => None,
        }
    }
}

impl From<&ResearchError> for ErrorDescriptor {
    fn from(err: &ResearchError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            stage: err.stage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_descriptor_carries_stage() {
        let err = ResearchError::Timeout {
            stage: "generation".into(),
        };
        let descriptor = ErrorDescriptor::from(&err);
        assert_eq!(descriptor.kind, ErrorKind::Timeout);
        assert_eq!(descriptor.stage.as_deref(), Some("generation"));
        assert!(descriptor.message.contains("generation"));
    }

    #[test]
    fn provider_error_has_no_stage() {
        let err = ResearchError::ProviderUnavailable {
            provider: "search",
            reason: "HTTP 502".into(),
        };
        let descriptor = ErrorDescriptor::from(&err);
        assert_eq!(descriptor.kind, ErrorKind::ProviderUnavailable);
        assert!(descriptor.stage.is_none());
        assert_eq!(descriptor.message, "search unavailable: HTTP 502");
    }

    #[test]
    fn store_errors_are_internal() {
        let err = ResearchError::from(StoreError::LockPoisoned);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}

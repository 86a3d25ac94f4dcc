//! Collaborator boundaries of the research pipeline.
//!
//! - SearchProvider: web search, one call per sub-query
//! - GenerationClient: single text-generation call, no retries of its own
//! - RunStore: run-record persistence with once-only finalization

use async_trait::async_trait;
use uuid::Uuid;

use super::types::*;
use super::StoreError;
use crate::pipeline::providers::{GenerationError, SearchError};

/// Web search collaborator.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one sub-query. Failures must be distinguishable by kind
    /// (not configured, request failed, non-JSON body, blocked).
    async fn search(
        &self,
        query: &str,
        params: &SearchParams,
    ) -> Result<Vec<SearchDocument>, SearchError>;
}

/// Text-generation collaborator.
///
/// Any non-empty string is a candidate for validation; structural checks
/// are the orchestrator's job.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
    ) -> Result<String, GenerationError>;
}

/// Run-record persistence.
///
/// Finalize calls return `false` when the run was already terminal, so a
/// second caller observes a no-op instead of an error.
pub trait RunStore: Send + Sync {
    /// Create a new QUEUED run.
    fn create(&self, input: PipelineInput) -> Result<ResearchRun, StoreError>;

    fn get(&self, run_id: Uuid) -> Result<Option<ResearchRun>, StoreError>;

    /// QUEUED → RUNNING. Returns `false` if the run is not QUEUED.
    fn mark_running(&self, run_id: Uuid, meta: RunningMeta) -> Result<bool, StoreError>;

    /// RUNNING → SUCCESS.
    fn finalize_success(
        &self,
        run_id: Uuid,
        timings: StageTimings,
        result: PipelineResult,
    ) -> Result<bool, StoreError>;

    /// QUEUED | RUNNING → FAILED.
    fn finalize_failed(
        &self,
        run_id: Uuid,
        timings: StageTimings,
        error: ErrorDescriptor,
    ) -> Result<bool, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify traits are object-safe (can be used as `dyn Trait`)
    #[test]
    fn traits_are_object_safe() {
        fn _assert_search(_: &dyn SearchProvider) {}
        fn _assert_generation(_: &dyn GenerationClient) {}
        fn _assert_store(_: &dyn RunStore) {}
    }
}

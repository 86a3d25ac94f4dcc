//! Research service: single entry point for callers.
//!
//! **Design**:
//! - `submit()` validates and normalizes the request, creates a QUEUED run
//!   and hands it to the scheduler; it returns immediately (fire-and-poll)
//! - `get()` reads the run record; clients poll until it is terminal
//! - `cancel()`, `stats()`, `shutdown()` and `wait_idle()` pass through to
//!   the scheduler

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::pipeline::providers::{OllamaGenerator, TavilySearch};
use crate::pipeline::research::{
    CancelOutcome, ErrorDescriptor, GenerationClient, InMemoryRunStore, JobScheduler,
    PipelineInput, ResearchError, ResearchMode, ResearchOrchestrator, ResearchRun, RunStatus,
    RunStore, SchedulerConfig, SchedulerStats, SearchProvider, StageTimings,
};

pub const DEFAULT_MARKET: &str = "US";
pub const DEFAULT_LANGUAGE: &str = "en";

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// A research request as submitted by a caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchRequest {
    pub query: String,
    /// "quick" (default) or "deep".
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    /// Defaults to the query.
    #[serde(default)]
    pub topic: Option<String>,
}

impl ResearchRequest {
    pub fn new(query: &str) -> Self {
        Self {
            query: query.to_string(),
            ..Self::default()
        }
    }

    pub fn deep(mut self) -> Self {
        self.mode = Some(ResearchMode::Deep.as_str().to_string());
        self
    }

    /// Validate and fill defaults.
    pub fn normalize(&self) -> Result<PipelineInput, ResearchError> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(ResearchError::InvalidRequest("query must not be empty".into()));
        }

        let mode = match non_blank(&self.mode) {
            None => ResearchMode::Quick,
            Some(raw) => ResearchMode::from_str(raw).ok_or_else(|| {
                ResearchError::InvalidRequest(format!("unknown mode '{raw}' (expected quick or deep)"))
            })?,
        };

        Ok(PipelineInput {
            query: query.to_string(),
            mode,
            market: non_blank(&self.market)
                .map(str::to_uppercase)
                .unwrap_or_else(|| DEFAULT_MARKET.to_string()),
            language: non_blank(&self.language)
                .map(str::to_lowercase)
                .unwrap_or_else(|| DEFAULT_LANGUAGE.to_string()),
            topic: non_blank(&self.topic).unwrap_or(query).to_string(),
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Returned by `submit()` before the run has started.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub run_id: Uuid,
    pub status: RunStatus,
}

// ═══════════════════════════════════════════════════════════
// ResearchService
// ═══════════════════════════════════════════════════════════

pub struct ResearchService {
    store: Arc<dyn RunStore>,
    scheduler: JobScheduler,
}

impl ResearchService {
    pub fn new(
        orchestrator: Arc<ResearchOrchestrator>,
        store: Arc<dyn RunStore>,
        config: SchedulerConfig,
    ) -> Self {
        let scheduler = JobScheduler::new(orchestrator, store.clone(), config);
        Self { store, scheduler }
    }

    /// Wire the service with explicit collaborators and an in-memory store.
    pub fn with_providers(
        search: Arc<dyn SearchProvider>,
        generator: Arc<dyn GenerationClient>,
        config: &ServiceConfig,
    ) -> Self {
        let orchestrator = Arc::new(ResearchOrchestrator::new(
            search,
            generator,
            config.generation_timeout,
        ));
        Self::new(
            orchestrator,
            Arc::new(InMemoryRunStore::new()),
            SchedulerConfig::from(config),
        )
    }

    /// Wire the service with the HTTP collaborators described by `config`.
    ///
    /// A missing search key is not an error here: runs fail with a
    /// configuration error when they reach the search stage.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ResearchError> {
        let search = TavilySearch::from_config(config)?;
        if !search.is_configured() {
            tracing::warn!("TAVILY_API_KEY is not set, research runs will fail at the search stage");
        }
        let generator = OllamaGenerator::from_config(config)?;
        tracing::info!(
            model = generator.model(),
            ollama = %config.ollama_base_url,
            max_concurrency = config.max_concurrency,
            "Research service configured"
        );
        Ok(Self::with_providers(Arc::new(search), Arc::new(generator), config))
    }

    /// Create a run and queue it. Returns before the run starts.
    pub fn submit(&self, request: &ResearchRequest) -> Result<SubmitReceipt, ResearchError> {
        let input = request.normalize()?;
        if self.scheduler.is_closed() {
            return Err(ResearchError::SchedulerClosed);
        }

        let run = self.store.create(input)?;
        tracing::info!(run_id = %run.id, mode = %run.input.mode, query = %run.input.query, "Run submitted");

        if let Err(e) = self.scheduler.enqueue(run.id, run.input.clone()) {
            // Lost a race with shutdown: the run must not stay QUEUED forever
            self.store
                .finalize_failed(run.id, StageTimings::new(), ErrorDescriptor::from(&e))?;
            return Err(e);
        }

        Ok(SubmitReceipt {
            run_id: run.id,
            status: RunStatus::Queued,
        })
    }

    pub fn get(&self, run_id: Uuid) -> Result<Option<ResearchRun>, ResearchError> {
        Ok(self.store.get(run_id)?)
    }

    pub fn cancel(&self, run_id: Uuid) -> Result<CancelOutcome, ResearchError> {
        self.scheduler.cancel(run_id)
    }

    pub fn stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

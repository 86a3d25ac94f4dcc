//! Core types for the research pipeline.
//!
//! These types model the full lifecycle of a run:
//! Request → Evidence → Generated insights → Scored rows & clusters → Run record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum evidence references kept on a single row.
pub const MAX_ROW_EVIDENCE: usize = 2;
/// Maximum representative keywords per cluster bundle.
pub const MAX_CLUSTER_KEYWORDS: usize = 5;
/// Maximum recommended actions per cluster bundle.
pub const MAX_CLUSTER_ACTIONS: usize = 3;
/// Maximum evidence references per cluster bundle.
pub const MAX_CLUSTER_EVIDENCE: usize = 2;
/// Maximum cluster bundles in a finished result.
pub const MAX_CLUSTERS: usize = 7;
/// Maximum next-step strings in a result bundle.
pub const MAX_NEXT_STEPS: usize = 7;
/// Maximum source references in a result bundle.
pub const MAX_SOURCES: usize = 7;

/// Per-stage elapsed milliseconds, keyed by stage name.
pub type StageTimings = BTreeMap<String, u64>;

// ═══════════════════════════════════════════
// Mode & Lifecycle
// ═══════════════════════════════════════════

/// Research breadth. Drives caps, floors, temperatures and deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMode {
    Quick,
    Deep,
}

impl ResearchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Deep => "deep",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Some(Self::Quick),
            "deep" => Some(Self::Deep),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle status of a run. A run is in exactly one of these at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized input for one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineInput {
    pub query: String,
    pub mode: ResearchMode,
    pub market: String,
    pub language: String,
    pub topic: String,
}

/// Metadata recorded when a run transitions to RUNNING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunningMeta {
    pub started_at: DateTime<Utc>,
    /// Jobs active in the scheduler at admission, this one included.
    pub active_jobs: usize,
}

/// Error category persisted on FAILED runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ProviderUnavailable,
    InvalidRequest,
    Timeout,
    Cancelled,
    SchedulerClosed,
    Internal,
}

/// Serializable description of why a run failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub kind: ErrorKind,
    pub message: String,
    /// Stage the run was in when it failed, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}

impl ErrorDescriptor {
    pub fn cancelled(stage: &str) -> Self {
        Self {
            kind: ErrorKind::Cancelled,
            message: format!("Run cancelled at stage '{stage}'"),
            stage: Some(stage.to_string()),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: message.into(),
            stage: None,
        }
    }
}

/// Persisted record of one research run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchRun {
    pub id: Uuid,
    pub input: PipelineInput,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub timings: StageTimings,
    pub error: Option<ErrorDescriptor>,
    pub result: Option<PipelineResult>,
}

impl ResearchRun {
    /// A freshly created run, QUEUED with no timings.
    pub fn queued(input: PipelineInput) -> Self {
        Self {
            id: Uuid::new_v4(),
            input,
            status: RunStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            timings: StageTimings::new(),
            error: None,
            result: None,
        }
    }
}

// ═══════════════════════════════════════════
// Search & Evidence
// ═══════════════════════════════════════════

/// Provider breadth setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchDepth {
    Basic,
    Advanced,
}

impl SearchDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Advanced => "advanced",
        }
    }
}

/// Parameters sent with every search sub-query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    pub max_results: u32,
    pub depth: SearchDepth,
}

/// A raw document as returned by the search provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_at: Option<String>,
    pub score: Option<f64>,
}

/// A selected, deduplicated search result used as grounding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceItem {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
    pub domain: String,
    pub sub_query: String,
    pub captured_at: DateTime<Utc>,
}

/// A url + title pointer to a piece of evidence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvidenceRef {
    pub url: String,
    pub title: String,
}

impl From<&EvidenceItem> for EvidenceRef {
    fn from(item: &EvidenceItem) -> Self {
        Self {
            url: item.url.clone(),
            title: item.title.clone(),
        }
    }
}

// ═══════════════════════════════════════════
// Rows & Clusters
// ═══════════════════════════════════════════

/// Search intent behind a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Buying,
    Inspiration,
    Diy,
    Informational,
    Supplier,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Buying => "buying",
            Self::Inspiration => "inspiration",
            Self::Diy => "diy",
            Self::Informational => "informational",
            Self::Supplier => "supplier",
        }
    }

    /// Parse leniently; unknown values map to `Informational`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "buying" | "commercial" | "transactional" => Self::Buying,
            "inspiration" => Self::Inspiration,
            "diy" => Self::Diy,
            "supplier" | "wholesale" => Self::Supplier,
            _ => Self::Informational,
        }
    }
}

/// Recommended action priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Priority {
    P0,
    P1,
    P2,
}

impl Priority {
    /// Parse leniently; unknown values map to `P1`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "P0" | "HIGH" => Self::P0,
            "P2" | "LOW" => Self::P2,
            _ => Self::P1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionItem {
    pub title: String,
    pub priority: Priority,
}

/// One keyword-level research finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    pub row_id: String,
    pub cluster: String,
    pub keyword: String,
    pub intent: Intent,
    pub mentions: u32,
    pub recency_score: f64,
    /// Always recomputed by the scorer, never taken from generator output.
    pub research_score: f64,
    pub sources_count: u32,
    pub domains_count: u32,
    pub evidence: Vec<EvidenceRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionItem>,
    pub cluster_id: Option<String>,
    pub rank: Option<u32>,
}

/// A group of related rows with synthesized recommended actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterBundle {
    pub cluster: String,
    pub keywords: Vec<String>,
    pub actions: Vec<ActionItem>,
    pub evidence: Vec<EvidenceRef>,
    pub rank: u32,
}

/// Top-level narrative of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultBundle {
    pub title: String,
    pub summary: String,
    pub next_steps: Vec<String>,
    pub sources: Vec<EvidenceRef>,
}

/// Validated generator output, before scoring and hardening.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResearchInsights {
    pub rows: Vec<Row>,
    pub clusters: Vec<ClusterBundle>,
    pub result_bundle: Option<ResultBundle>,
    /// Rows present in the output that failed their own shape check.
    pub dropped_rows: usize,
}

// ═══════════════════════════════════════════
// Pipeline Result
// ═══════════════════════════════════════════

/// Which path produced the final result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineOutcome {
    Generated,
    Repaired,
    Expanded,
    Fallback,
}

/// Why a run degraded to the placeholder result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    NoEvidence,
    InvalidOutput,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineDiagnostics {
    pub generation_calls: u32,
    pub dropped_rows: usize,
    pub fallback_reason: Option<FallbackReason>,
    pub clusters_backfilled: bool,
    pub expansion_attempted: bool,
}

/// Final output of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub outcome: PipelineOutcome,
    /// True when the result is the empty placeholder.
    pub degraded: bool,
    pub rows: Vec<Row>,
    pub clusters: Vec<ClusterBundle>,
    pub result_bundle: ResultBundle,
    pub evidence: Vec<EvidenceItem>,
    pub diagnostics: PipelineDiagnostics,
}

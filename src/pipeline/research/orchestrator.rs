//! Pipeline orchestrator.
//!
//! Drives one run through search, evidence selection, generation with
//! repair and expansion, then the shared finalize step (score, rank,
//! backfill, harden). Generation is a small state machine:
//!
//! ```text
//! initial ──valid──────────────────────────▶ Generated ─┐
//!    │ invalid / provider error                         │ deep & rows < floor
//!    ▼                                                  ▼
//! repair ──valid──▶ Repaired ──────────────────────▶ expansion ──valid──▶ Expanded
//!    │ invalid                                          │ failure: keep previous
//!    ▼
//! Fallback (terminal)
//! ```
//!
//! Every state goes through `finalize`, so the result invariants hold
//! whichever path produced it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use tracing::Instrument;

use super::backfill::backfill_clusters;
use super::context::{RunContext, Stage};
use super::evidence::{flatten_documents, select_evidence};
use super::harden::{fallback_bundle, harden_bundle};
use super::parser::{validate_output, ValidationOutcome};
use super::prompt::{build_generation_request, build_sub_queries, GenerationRequest};
use super::scoring::{rank_clusters, rank_rows};
use super::traits::{GenerationClient, SearchProvider};
use super::types::*;
use super::ResearchError;
use crate::pipeline::providers::SearchError;
use crate::pipeline_config::{derive_profile, ModeProfile};

/// Where a run's generation phase ended up.
#[derive(Debug)]
enum GenerationState {
    Generated(ResearchInsights),
    Repaired(ResearchInsights),
    Expanded(ResearchInsights),
    Fallback(FallbackReason),
}

/// How the first generation call went, when it did not validate.
enum InitialFailure {
    Invalid(String),
    Provider(ResearchError),
}

pub struct ResearchOrchestrator {
    search: Arc<dyn SearchProvider>,
    generator: Arc<dyn GenerationClient>,
    generation_timeout: Duration,
}

impl ResearchOrchestrator {
    pub fn new(
        search: Arc<dyn SearchProvider>,
        generator: Arc<dyn GenerationClient>,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            search,
            generator,
            generation_timeout,
        }
    }

    /// Run the full pipeline for `input`.
    ///
    /// Cancellation is observed at stage boundaries only. An empty evidence
    /// set or a failed repair yields a degraded fallback result, not an error.
    pub async fn run(
        &self,
        input: &PipelineInput,
        ctx: &RunContext,
    ) -> Result<PipelineResult, ResearchError> {
        let span = tracing::info_span!("research_run", run_id = %ctx.run_id(), mode = %input.mode);
        self.run_inner(input, ctx).instrument(span).await
    }

    async fn run_inner(
        &self,
        input: &PipelineInput,
        ctx: &RunContext,
    ) -> Result<PipelineResult, ResearchError> {
        let profile = derive_profile(input.mode);
        let mut diag = PipelineDiagnostics::default();

        // ── Search ──
        ctx.checkpoint(Stage::Search)?;
        let started = Instant::now();
        let batches = self.search_all(input, &profile).await?;
        ctx.record(Stage::Search, started.elapsed());

        // ── Selection ──
        ctx.enter(Stage::Selection);
        let started = Instant::now();
        let pool = flatten_documents(batches, Utc::now());
        let evidence = select_evidence(&pool, profile.total_evidence_cap, profile.per_domain_cap);
        ctx.record(Stage::Selection, started.elapsed());
        tracing::info!(pool = pool.len(), selected = evidence.len(), "Evidence selected");

        if evidence.is_empty() {
            tracing::warn!("No evidence selected, skipping generation");
            let result = self.finalize(
                GenerationState::Fallback(FallbackReason::NoEvidence),
                input,
                &profile,
                &evidence,
                ctx,
                &mut diag,
            );
            return Ok(with_diagnostics(result, diag));
        }

        // ── Generation & repair ──
        let request = build_generation_request(input, &profile, &evidence);
        ctx.checkpoint(Stage::Generation)?;
        let state = self.generate_with_repair(&request, &profile, ctx, &mut diag).await?;
        let mut result = self.finalize(state, input, &profile, &evidence, ctx, &mut diag);

        // ── Expansion ──
        if profile.expansion_enabled
            && result.outcome != PipelineOutcome::Fallback
            && result.rows.len() < profile.min_rows
        {
            if let Some(expanded) = self.expand(&request, &result, &profile, ctx, &mut diag).await? {
                result = self.finalize(
                    GenerationState::Expanded(expanded),
                    input,
                    &profile,
                    &evidence,
                    ctx,
                    &mut diag,
                );
            }
        }

        tracing::info!(
            outcome = ?result.outcome,
            rows = result.rows.len(),
            clusters = result.clusters.len(),
            generation_calls = diag.generation_calls,
            "Pipeline complete"
        );
        Ok(with_diagnostics(result, diag))
    }

    // ═══════════════════════════════════════════
    // Search
    // ═══════════════════════════════════════════

    /// Dispatch all sub-queries concurrently.
    ///
    /// Unconfigured search is fatal. Other failures skip the sub-query; the
    /// run fails only when every sub-query failed.
    async fn search_all(
        &self,
        input: &PipelineInput,
        profile: &ModeProfile,
    ) -> Result<Vec<(String, Vec<SearchDocument>)>, ResearchError> {
        let queries = build_sub_queries(input, profile);
        let params = profile.search_params();
        let outcomes = join_all(queries.iter().map(|q| self.search.search(q, &params))).await;

        let mut batches = Vec::with_capacity(queries.len());
        let mut first_error: Option<SearchError> = None;
        for (query, outcome) in queries.into_iter().zip(outcomes) {
            match outcome {
                Ok(documents) => {
                    tracing::debug!(sub_query = %query, documents = documents.len(), "Sub-query succeeded");
                    batches.push((query, documents));
                }
                Err(SearchError::NotConfigured(reason)) => {
                    return Err(ResearchError::Configuration(reason));
                }
                Err(e) => {
                    tracing::warn!(sub_query = %query, error = %e, "Search sub-query failed, skipping");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if batches.is_empty() => Err(e.into()),
            _ => Ok(batches),
        }
    }

    // ═══════════════════════════════════════════
    // Generation
    // ═══════════════════════════════════════════

    /// One generation call under the per-call deadline.
    async fn call(
        &self,
        request: &GenerationRequest,
        stage: Stage,
        ctx: &RunContext,
        diag: &mut PipelineDiagnostics,
    ) -> Result<String, ResearchError> {
        diag.generation_calls += 1;
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.generation_timeout,
            self.generator.generate(
                &request.system_prompt,
                &request.user_prompt,
                request.temperature,
            ),
        )
        .await;
        ctx.record(stage, started.elapsed());

        match outcome {
            Ok(response) => response.map_err(ResearchError::from),
            Err(_) => Err(ResearchError::Timeout {
                stage: stage.as_str().to_string(),
            }),
        }
    }

    async fn generate_with_repair(
        &self,
        request: &GenerationRequest,
        profile: &ModeProfile,
        ctx: &RunContext,
        diag: &mut PipelineDiagnostics,
    ) -> Result<GenerationState, ResearchError> {
        let failure = match self.call(request, Stage::Generation, ctx, diag).await {
            Ok(raw) => match validate_output(&raw) {
                ValidationOutcome::Valid(insights) => {
                    return Ok(GenerationState::Generated(insights));
                }
                ValidationOutcome::Invalid(reason) => InitialFailure::Invalid(reason),
            },
            Err(e @ ResearchError::ProviderUnavailable { .. }) => InitialFailure::Provider(e),
            Err(e) => return Err(e),
        };

        let reason = match &failure {
            InitialFailure::Invalid(reason) => reason.clone(),
            InitialFailure::Provider(e) => format!("generation failed: {e}"),
        };
        tracing::warn!(attempt = 1, reason = %reason, "Generation output unusable, issuing repair call");

        ctx.checkpoint(Stage::Repair)?;
        let repair = request.repair(&reason, profile.retry_temperature);
        match self.call(&repair, Stage::Repair, ctx, diag).await {
            Ok(raw) => match validate_output(&raw) {
                ValidationOutcome::Valid(insights) => {
                    tracing::info!(rows = insights.rows.len(), "Repair call produced valid output");
                    Ok(GenerationState::Repaired(insights))
                }
                ValidationOutcome::Invalid(reason) => {
                    tracing::warn!(attempt = 2, reason = %reason, "Repair output invalid, using fallback result");
                    Ok(GenerationState::Fallback(FallbackReason::InvalidOutput))
                }
            },
            Err(e @ (ResearchError::Configuration(_) | ResearchError::Timeout { .. })) => Err(e),
            Err(e) => match failure {
                InitialFailure::Provider(_) => Err(e),
                InitialFailure::Invalid(_) => {
                    tracing::warn!(attempt = 2, error = %e, "Repair call failed, using fallback result");
                    Ok(GenerationState::Fallback(FallbackReason::InvalidOutput))
                }
            },
        }
    }

    /// Single expansion attempt. `None` keeps the current result.
    async fn expand(
        &self,
        request: &GenerationRequest,
        current: &PipelineResult,
        profile: &ModeProfile,
        ctx: &RunContext,
        diag: &mut PipelineDiagnostics,
    ) -> Result<Option<ResearchInsights>, ResearchError> {
        ctx.checkpoint(Stage::Expansion)?;
        diag.expansion_attempted = true;
        tracing::info!(
            rows = current.rows.len(),
            min_rows = profile.min_rows,
            "Row count under floor, issuing expansion call"
        );

        let keywords: Vec<&str> = current.rows.iter().map(|r| r.keyword.as_str()).collect();
        let expansion = request.expansion(
            &keywords,
            current.clusters.len(),
            profile,
            profile.retry_temperature,
        );
        match self.call(&expansion, Stage::Expansion, ctx, diag).await {
            Ok(raw) => match validate_output(&raw) {
                ValidationOutcome::Valid(insights) if insights.rows.len() >= current.rows.len() => {
                    Ok(Some(insights))
                }
                ValidationOutcome::Valid(insights) => {
                    tracing::warn!(
                        expanded_rows = insights.rows.len(),
                        current_rows = current.rows.len(),
                        "Expansion returned fewer rows, keeping previous result"
                    );
                    Ok(None)
                }
                ValidationOutcome::Invalid(reason) => {
                    tracing::warn!(reason = %reason, "Expansion output invalid, keeping previous result");
                    Ok(None)
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "Expansion call failed, keeping previous result");
                Ok(None)
            }
        }
    }

    // ═══════════════════════════════════════════
    // Finalize
    // ═══════════════════════════════════════════

    /// Shared post-processing for every generation state.
    fn finalize(
        &self,
        state: GenerationState,
        input: &PipelineInput,
        profile: &ModeProfile,
        evidence: &[EvidenceItem],
        ctx: &RunContext,
        diag: &mut PipelineDiagnostics,
    ) -> PipelineResult {
        ctx.enter(Stage::Scoring);
        let started = Instant::now();

        let (outcome, insights) = match state {
            GenerationState::Generated(i) => (PipelineOutcome::Generated, i),
            GenerationState::Repaired(i) => (PipelineOutcome::Repaired, i),
            GenerationState::Expanded(i) => (PipelineOutcome::Expanded, i),
            GenerationState::Fallback(reason) => {
                diag.fallback_reason = Some(reason);
                let bundle = harden_bundle(Some(fallback_bundle(input, evidence)), input, evidence, &[]);
                ctx.record(Stage::Scoring, started.elapsed());
                return PipelineResult {
                    outcome: PipelineOutcome::Fallback,
                    degraded: true,
                    rows: Vec::new(),
                    clusters: Vec::new(),
                    result_bundle: bundle,
                    evidence: evidence.to_vec(),
                    diagnostics: PipelineDiagnostics::default(),
                };
            }
        };

        diag.dropped_rows = insights.dropped_rows;
        let rows = rank_rows(insights.rows);
        let mut clusters = rank_clusters(insights.clusters, &rows, profile.max_clusters);

        if clusters.len() < profile.min_clusters && !rows.is_empty() {
            let backfilled = backfill_clusters(&rows, profile.max_clusters);
            if backfilled.len() >= clusters.len() {
                tracing::info!(
                    generated = clusters.len(),
                    backfilled = backfilled.len(),
                    min_clusters = profile.min_clusters,
                    "Clusters under floor, backfilled from rows"
                );
                clusters = backfilled;
                diag.clusters_backfilled = true;
            }
        }

        let result_bundle = harden_bundle(insights.result_bundle, input, evidence, &rows);
        ctx.record(Stage::Scoring, started.elapsed());

        PipelineResult {
            outcome,
            degraded: false,
            rows,
            clusters,
            result_bundle,
            evidence: evidence.to_vec(),
            diagnostics: PipelineDiagnostics::default(),
        }
    }
}

fn with_diagnostics(mut result: PipelineResult, diag: PipelineDiagnostics) -> PipelineResult {
    result.diagnostics = diag;
    result
}

//! Per-run execution context: cancellation token, current stage, timings.
//!
//! One `RunContext` is created per admitted job and threaded through every
//! stage call. Cancellation is cooperative: the token is only consulted at
//! `checkpoint()` calls, never preempting an in-flight provider call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use uuid::Uuid;

use super::types::StageTimings;
use super::ResearchError;

/// Named pipeline stages, used for checkpoints, timings and error tagging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Search,
    Selection,
    Generation,
    Repair,
    Expansion,
    Scoring,
    Persistence,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Search => "search",
            Self::Selection => "selection",
            Self::Generation => "generation",
            Self::Repair => "repair",
            Self::Expansion => "expansion",
            Self::Scoring => "scoring",
            Self::Persistence => "persistence",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Execution context for one run.
#[derive(Debug)]
pub struct RunContext {
    run_id: Uuid,
    token: CancellationToken,
    started: Instant,
    /// Current stage and the instant it was entered.
    stage: Mutex<(Stage, Instant)>,
    timings: Mutex<StageTimings>,
}

impl RunContext {
    pub fn new(run_id: Uuid, token: CancellationToken) -> Self {
        Self {
            run_id,
            token,
            started: Instant::now(),
            stage: Mutex::new((Stage::Queued, Instant::now())),
            timings: Mutex::new(StageTimings::new()),
        }
    }

    /// Context with a fresh token, for running the pipeline outside the scheduler.
    pub fn detached() -> Self {
        Self::new(Uuid::new_v4(), CancellationToken::new())
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Enter `stage`, failing with `Cancelled` if cancellation was requested.
    pub fn checkpoint(&self, stage: Stage) -> Result<(), ResearchError> {
        if self.token.is_cancelled() {
            tracing::info!(run_id = %self.run_id, stage = stage.as_str(), "Cancellation observed at checkpoint");
            return Err(ResearchError::Cancelled {
                stage: stage.as_str().to_string(),
            });
        }
        self.enter(stage);
        Ok(())
    }

    /// Mark `stage` as current without consulting the token.
    pub fn enter(&self, stage: Stage) {
        if let Ok(mut current) = self.stage.lock() {
            *current = (stage, Instant::now());
        }
    }

    pub fn current_stage(&self) -> Stage {
        self.stage.lock().map(|s| s.0).unwrap_or(Stage::Queued)
    }

    /// Record the time spent so far in the current stage and return it.
    ///
    /// For a stage that was cut short (run deadline) and never reached its
    /// own `record` call.
    pub fn record_interrupted(&self) -> Stage {
        let (stage, entered) = self
            .stage
            .lock()
            .map(|s| *s)
            .unwrap_or((Stage::Queued, self.started));
        self.record(stage, entered.elapsed());
        stage
    }

    /// Add `elapsed` to the stage's accumulated milliseconds.
    pub fn record(&self, stage: Stage, elapsed: Duration) {
        if let Ok(mut timings) = self.timings.lock() {
            *timings.entry(stage.as_str().to_string()).or_insert(0) += elapsed.as_millis() as u64;
        }
    }

    /// Snapshot of recorded timings, plus `total` since context creation.
    pub fn timings(&self) -> StageTimings {
        let mut snapshot = self
            .timings
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default();
        snapshot.insert("total".to_string(), self.started.elapsed().as_millis() as u64);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_clones_share_flag() {
        let token = CancellationToken::new();
        let handle = token.clone();
        assert!(!handle.is_cancelled());
        token.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn checkpoint_enters_stage_when_not_cancelled() {
        let ctx = RunContext::detached();
        assert_eq!(ctx.current_stage(), Stage::Queued);
        ctx.checkpoint(Stage::Search).unwrap();
        assert_eq!(ctx.current_stage(), Stage::Search);
    }

    #[test]
    fn checkpoint_fails_after_cancel() {
        let ctx = RunContext::detached();
        ctx.checkpoint(Stage::Search).unwrap();
        ctx.token().cancel();

        let err = ctx.checkpoint(Stage::Generation).unwrap_err();
        match err {
            ResearchError::Cancelled { stage } => assert_eq!(stage, "generation"),
            other => panic!("expected Cancelled, got {other:?}"),
        }
        // Stage is not advanced past the failed checkpoint
        assert_eq!(ctx.current_stage(), Stage::Search);
    }

    #[test]
    fn record_accumulates_per_stage() {
        let ctx = RunContext::detached();
        ctx.record(Stage::Generation, Duration::from_millis(40));
        ctx.record(Stage::Generation, Duration::from_millis(2));
        ctx.record(Stage::Search, Duration::from_millis(7));

        let timings = ctx.timings();
        assert_eq!(timings["generation"], 42);
        assert_eq!(timings["search"], 7);
        assert!(timings.contains_key("total"));
    }

    #[test]
    fn interrupted_stage_is_recorded() {
        let ctx = RunContext::detached();
        ctx.checkpoint(Stage::Search).unwrap();
        ctx.record(Stage::Search, Duration::from_millis(3));
        ctx.checkpoint(Stage::Generation).unwrap();
        std::thread::sleep(Duration::from_millis(15));

        assert_eq!(ctx.record_interrupted(), Stage::Generation);
        let timings = ctx.timings();
        assert!(timings["generation"] >= 15);
        assert_eq!(timings["search"], 3);
    }
}

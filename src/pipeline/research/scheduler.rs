//! Bounded-concurrency job scheduler.
//!
//! **Design**:
//! - At most `max_concurrency` jobs run at once; the rest wait FIFO
//! - Admission happens on `enqueue()` and whenever a job releases its slot
//! - Each admitted job runs in its own task under a per-mode deadline; a
//!   panic inside the pipeline is captured and finalized as an internal error
//! - `cancel()` on a queued job finalizes it FAILED synchronously; on an
//!   active job it sets the cancellation token observed at stage checkpoints
//! - `shutdown()` rejects new jobs; already-queued jobs still drain

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use uuid::Uuid;

use super::context::{CancellationToken, RunContext, Stage};
use super::orchestrator::ResearchOrchestrator;
use super::traits::RunStore;
use super::types::*;
use super::{ResearchError, StoreError};
use crate::config::ServiceConfig;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerConfig {
    /// Concurrency ceiling (at least 1).
    pub max_concurrency: usize,
    pub quick_timeout: Duration,
    pub deep_timeout: Duration,
}

impl SchedulerConfig {
    pub fn deadline_for(&self, mode: ResearchMode) -> Duration {
        match mode {
            ResearchMode::Quick => self.quick_timeout,
            ResearchMode::Deep => self.deep_timeout,
        }
    }
}

impl From<&ServiceConfig> for SchedulerConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.max(1),
            quick_timeout: config.quick_timeout,
            deep_timeout: config.deep_timeout,
        }
    }
}

/// What `cancel()` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The job was still queued and is now FAILED.
    CancelledWhileQueued,
    /// The job is running; it stops at its next stage checkpoint.
    CancelRequested,
    /// No queued or active job with this id.
    Unknown,
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub active: usize,
    pub queued: usize,
    pub max_concurrency: usize,
    pub closed: bool,
}

struct QueuedJob {
    run_id: Uuid,
    input: PipelineInput,
    enqueued_at: Instant,
}

/// A job taken off the queue, ready to be spawned.
struct Admission {
    job: QueuedJob,
    token: CancellationToken,
    active_jobs: usize,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<QueuedJob>,
    active: HashMap<Uuid, CancellationToken>,
    closed: bool,
}

struct Inner {
    orchestrator: Arc<ResearchOrchestrator>,
    store: Arc<dyn RunStore>,
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    idle: Notify,
}

// ═══════════════════════════════════════════════════════════
// JobScheduler
// ═══════════════════════════════════════════════════════════

/// Admits, runs, cancels and times out research jobs.
///
/// Cheap to clone; all clones share the same queue.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl JobScheduler {
    pub fn new(
        orchestrator: Arc<ResearchOrchestrator>,
        store: Arc<dyn RunStore>,
        config: SchedulerConfig,
    ) -> Self {
        let config = SchedulerConfig {
            max_concurrency: config.max_concurrency.max(1),
            ..config
        };
        Self {
            inner: Arc::new(Inner {
                orchestrator,
                store,
                config,
                state: Mutex::new(SchedulerState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Queue a job for a run already created in the store.
    ///
    /// Starts it immediately when a slot is free. Must be called from
    /// within a tokio runtime for the job to start.
    pub fn enqueue(&self, run_id: Uuid, input: PipelineInput) -> Result<(), ResearchError> {
        {
            let mut state = self.lock_state()?;
            if state.closed {
                return Err(ResearchError::SchedulerClosed);
            }
            state.queue.push_back(QueuedJob {
                run_id,
                input,
                enqueued_at: Instant::now(),
            });
            tracing::debug!(%run_id, queued = state.queue.len(), "Job enqueued");
        }
        self.drain();
        Ok(())
    }

    /// Cancel a queued or running job.
    pub fn cancel(&self, run_id: Uuid) -> Result<CancelOutcome, ResearchError> {
        {
            let mut state = self.lock_state()?;
            match state.queue.iter().position(|j| j.run_id == run_id) {
                Some(position) => {
                    state.queue.remove(position);
                }
                None => {
                    return Ok(match state.active.get(&run_id) {
                        Some(token) => {
                            token.cancel();
                            tracing::info!(%run_id, "Cancellation requested for running job");
                            CancelOutcome::CancelRequested
                        }
                        None => CancelOutcome::Unknown,
                    });
                }
            }
        }

        self.inner.store.finalize_failed(
            run_id,
            StageTimings::new(),
            ErrorDescriptor::cancelled(Stage::Queued.as_str()),
        )?;
        tracing::info!(%run_id, "Queued job cancelled");
        self.notify_if_idle();
        Ok(CancelOutcome::CancelledWhileQueued)
    }

    /// Stop accepting new jobs. Queued and running jobs are unaffected.
    pub fn shutdown(&self) {
        if let Ok(mut state) = self.inner.state.lock() {
            if !state.closed {
                state.closed = true;
                tracing::info!(
                    active = state.active.len(),
                    queued = state.queue.len(),
                    "Scheduler shut down, draining remaining jobs"
                );
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    pub fn stats(&self) -> SchedulerStats {
        let (active, queued, closed) = self
            .inner
            .state
            .lock()
            .map(|s| (s.active.len(), s.queue.len(), s.closed))
            .unwrap_or((0, 0, true));
        SchedulerStats {
            active,
            queued,
            max_concurrency: self.inner.config.max_concurrency,
            closed,
        }
    }

    /// Resolve once no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    // ── Internal ────────────────────────────────────────────

    fn lock_state(&self) -> Result<MutexGuard<'_, SchedulerState>, StoreError> {
        self.inner.state.lock().map_err(|_| StoreError::LockPoisoned)
    }

    fn is_idle(&self) -> bool {
        self.inner
            .state
            .lock()
            .map(|s| s.queue.is_empty() && s.active.is_empty())
            .unwrap_or(true)
    }

    fn notify_if_idle(&self) {
        if self.is_idle() {
            self.inner.idle.notify_waiters();
        }
    }

    /// Admit queued jobs while slots are free.
    fn drain(&self) {
        let handle = match Handle::try_current() {
            Ok(h) => h,
            Err(_) => {
                tracing::warn!("No async runtime available, jobs stay queued");
                return;
            }
        };

        let admitted = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            let mut admitted = Vec::new();
            while state.active.len() < self.inner.config.max_concurrency {
                let Some(job) = state.queue.pop_front() else {
                    break;
                };
                let token = CancellationToken::new();
                state.active.insert(job.run_id, token.clone());
                admitted.push(Admission {
                    job,
                    token,
                    active_jobs: state.active.len(),
                });
            }
            admitted
        };

        for admission in admitted {
            handle.spawn(self.clone().run_job(admission));
        }
    }

    async fn run_job(self, admission: Admission) {
        let Admission {
            job,
            token,
            active_jobs,
        } = admission;
        let run_id = job.run_id;
        let _slot = ActiveSlot {
            scheduler: self.clone(),
            run_id,
        };
        let store = &self.inner.store;

        if token.is_cancelled() {
            if let Err(e) = store.finalize_failed(
                run_id,
                StageTimings::new(),
                ErrorDescriptor::cancelled(Stage::Queued.as_str()),
            ) {
                tracing::error!(%run_id, error = %e, "Failed to record cancellation");
            }
            return;
        }

        let meta = RunningMeta {
            started_at: Utc::now(),
            active_jobs,
        };
        match store.mark_running(run_id, meta) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(%run_id, "Run is no longer queued, skipping");
                return;
            }
            Err(e) => {
                tracing::error!(%run_id, error = %e, "Failed to mark run as running");
                return;
            }
        }

        let mode = job.input.mode;
        let deadline = self.inner.config.deadline_for(mode);
        tracing::info!(
            %run_id,
            %mode,
            active_jobs,
            queue_wait_ms = job.enqueued_at.elapsed().as_millis() as u64,
            "Run started"
        );

        let ctx = Arc::new(RunContext::new(run_id, token));
        let orchestrator = self.inner.orchestrator.clone();
        let task_ctx = ctx.clone();
        let input = job.input;
        let mut task = tokio::spawn(async move { orchestrator.run(&input, &task_ctx).await });

        let finished = tokio::time::timeout(deadline, &mut task).await;
        let settled = Instant::now();
        let outcome = match finished {
            Ok(Ok(Ok(_))) if ctx.token().is_cancelled() => {
                Err(ErrorDescriptor::cancelled(Stage::Persistence.as_str()))
            }
            Ok(Ok(Ok(result))) => Ok(result),
            Ok(Ok(Err(e))) => Err(ErrorDescriptor::from(&e)),
            Ok(Err(join_error)) => {
                tracing::error!(%run_id, error = %join_error, "Pipeline task panicked");
                Err(ErrorDescriptor::internal(format!("Pipeline task failed: {join_error}")))
            }
            Err(_) => {
                task.abort();
                let stage = ctx.record_interrupted();
                tracing::warn!(%run_id, %stage, deadline_ms = deadline.as_millis() as u64, "Run timed out");
                Err(ErrorDescriptor::from(&ResearchError::Timeout {
                    stage: stage.as_str().to_string(),
                }))
            }
        };

        // Persistence covers everything from the pipeline settling up to the store write
        ctx.enter(Stage::Persistence);
        ctx.record(Stage::Persistence, settled.elapsed());
        let timings = ctx.timings();
        let total_ms = timings.get("total").copied().unwrap_or(0);

        let stored = match outcome {
            Ok(result) => {
                let outcome = result.outcome;
                let stored = store.finalize_success(run_id, timings, result);
                tracing::info!(%run_id, ?outcome, total_ms, "Run succeeded");
                stored
            }
            Err(descriptor) => {
                tracing::warn!(
                    %run_id,
                    kind = ?descriptor.kind,
                    stage = descriptor.stage.as_deref().unwrap_or("-"),
                    message = %descriptor.message,
                    total_ms,
                    "Run failed"
                );
                store.finalize_failed(run_id, timings, descriptor)
            }
        };

        match stored {
            Ok(true) => {}
            Ok(false) => tracing::debug!(%run_id, "Run was already finalized"),
            Err(e) => tracing::error!(%run_id, error = %e, "Failed to persist run outcome"),
        }
        tracing::debug!(
            %run_id,
            duration_ms = settled.elapsed().as_millis() as u64,
            "Run record persisted"
        );
    }
}

// ═══════════════════════════════════════════════════════════
// ActiveSlot: RAII concurrency slot
// ═══════════════════════════════════════════════════════════

/// Releases a job's concurrency slot when dropped and admits the next
/// queued job. Dropped on every exit path of `run_job`.
struct ActiveSlot {
    scheduler: JobScheduler,
    run_id: Uuid,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        if let Ok(mut state) = self.scheduler.inner.state.lock() {
            state.active.remove(&self.run_id);
        }
        self.scheduler.drain();
        self.scheduler.notify_if_idle();
    }
}

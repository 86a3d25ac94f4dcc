//! In-memory run-record store.
//!
//! Status transitions are guarded so that each run is finalized exactly
//! once: QUEUED → RUNNING → SUCCESS | FAILED, or QUEUED → FAILED.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use super::traits::RunStore;
use super::types::*;
use super::StoreError;

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: Mutex<HashMap<Uuid, ResearchRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.runs.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Apply `update` to the run under the lock.
    fn with_run<T>(
        &self,
        run_id: Uuid,
        update: impl FnOnce(&mut ResearchRun) -> T,
    ) -> Result<T, StoreError> {
        let mut runs = self.runs.lock().map_err(|_| StoreError::LockPoisoned)?;
        let run = runs.get_mut(&run_id).ok_or(StoreError::NotFound(run_id))?;
        Ok(update(run))
    }
}

impl RunStore for InMemoryRunStore {
    fn create(&self, input: PipelineInput) -> Result<ResearchRun, StoreError> {
        let run = ResearchRun::queued(input);
        let mut runs = self.runs.lock().map_err(|_| StoreError::LockPoisoned)?;
        runs.insert(run.id, run.clone());
        Ok(run)
    }

    fn get(&self, run_id: Uuid) -> Result<Option<ResearchRun>, StoreError> {
        let runs = self.runs.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(runs.get(&run_id).cloned())
    }

    fn mark_running(&self, run_id: Uuid, meta: RunningMeta) -> Result<bool, StoreError> {
        self.with_run(run_id, |run| {
            if run.status != RunStatus::Queued {
                return false;
            }
            run.status = RunStatus::Running;
            run.started_at = Some(meta.started_at);
            true
        })
    }

    fn finalize_success(
        &self,
        run_id: Uuid,
        timings: StageTimings,
        result: PipelineResult,
    ) -> Result<bool, StoreError> {
        self.with_run(run_id, |run| {
            if run.status != RunStatus::Running {
                return false;
            }
            run.status = RunStatus::Success;
            run.finished_at = Some(Utc::now());
            run.timings = timings;
            run.result = Some(result);
            true
        })
    }

    fn finalize_failed(
        &self,
        run_id: Uuid,
        timings: StageTimings,
        error: ErrorDescriptor,
    ) -> Result<bool, StoreError> {
        self.with_run(run_id, |run| {
            if run.status.is_terminal() {
                return false;
            }
            run.status = RunStatus::Failed;
            run.finished_at = Some(Utc::now());
            run.timings = timings;
            run.error = Some(error);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::research::harden::fallback_bundle;

    fn input() -> PipelineInput {
        PipelineInput {
            query: "party decor".into(),
            mode: ResearchMode::Quick,
            market: "US".into(),
            language: "en".into(),
            topic: "party decor".into(),
        }
    }

    fn meta() -> RunningMeta {
        RunningMeta {
            started_at: Utc::now(),
            active_jobs: 1,
        }
    }

    fn result() -> PipelineResult {
        PipelineResult {
            outcome: PipelineOutcome::Fallback,
            degraded: true,
            rows: vec![],
            clusters: vec![],
            result_bundle: fallback_bundle(&input(), &[]),
            evidence: vec![],
            diagnostics: PipelineDiagnostics::default(),
        }
    }

    #[test]
    fn create_then_get() {
        let store = InMemoryRunStore::new();
        let run = store.create(input()).unwrap();
        let fetched = store.get(run.id).unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Queued);
        assert_eq!(store.len(), 1);
        assert!(store.get(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn full_success_lifecycle() {
        let store = InMemoryRunStore::new();
        let run = store.create(input()).unwrap();

        assert!(store.mark_running(run.id, meta()).unwrap());
        assert!(!store.mark_running(run.id, meta()).unwrap());

        let mut timings = StageTimings::new();
        timings.insert("total".into(), 12);
        assert!(store.finalize_success(run.id, timings, result()).unwrap());

        let done = store.get(run.id).unwrap().unwrap();
        assert_eq!(done.status, RunStatus::Success);
        assert!(done.started_at.is_some());
        assert!(done.finished_at.is_some());
        assert_eq!(done.timings.get("total"), Some(&12));
        assert!(done.result.is_some());
    }

    #[test]
    fn finalize_is_once_only() {
        let store = InMemoryRunStore::new();
        let run = store.create(input()).unwrap();
        store.mark_running(run.id, meta()).unwrap();

        assert!(store.finalize_success(run.id, StageTimings::new(), result()).unwrap());
        assert!(!store
            .finalize_failed(run.id, StageTimings::new(), ErrorDescriptor::cancelled("search"))
            .unwrap());
        assert!(!store.finalize_success(run.id, StageTimings::new(), result()).unwrap());
        assert_eq!(store.get(run.id).unwrap().unwrap().status, RunStatus::Success);
    }

    #[test]
    fn queued_run_fails_without_running() {
        let store = InMemoryRunStore::new();
        let run = store.create(input()).unwrap();

        assert!(store
            .finalize_failed(run.id, StageTimings::new(), ErrorDescriptor::cancelled("queued"))
            .unwrap());
        let failed = store.get(run.id).unwrap().unwrap();
        assert_eq!(failed.status, RunStatus::Failed);
        assert!(failed.started_at.is_none());
        assert_eq!(failed.error.unwrap().kind, ErrorKind::Cancelled);

        // A failed run can never start
        assert!(!store.mark_running(run.id, meta()).unwrap());
    }

    #[test]
    fn success_requires_running() {
        let store = InMemoryRunStore::new();
        let run = store.create(input()).unwrap();
        assert!(!store.finalize_success(run.id, StageTimings::new(), result()).unwrap());
        assert_eq!(store.get(run.id).unwrap().unwrap().status, RunStatus::Queued);
    }

    #[test]
    fn unknown_run_is_not_found() {
        let store = InMemoryRunStore::new();
        let err = store.mark_running(Uuid::new_v4(), meta()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}

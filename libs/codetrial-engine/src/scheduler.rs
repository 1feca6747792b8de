/// Submission Queue & Scheduler
///
/// **Core Responsibility:**
/// Own every submission from admission to its terminal state, decide when it
/// runs, and keep its result around for polling.
///
/// **Scheduling Rules:**
/// 1. At most `max_concurrent_per_session` submissions Running per session;
///    later ones from that session wait FIFO behind them
/// 2. At most `worker_pool_size` submissions Running overall
/// 3. At most `max_queued` submissions waiting; a submission that cannot
///    start right away is refused beyond that
/// 4. A Running submission gets its test's deadline, measured from the
///    Running transition
///
/// **Critical Architectural Boundary:**
/// - Admission, dispatch and completion all happen under ONE lock, so
///   capacity accounting cannot race
/// - Nothing awaits while the lock is held; tasks are spawned after release
/// - `submit` and `cancel` never wait on execution

use crate::error::ServiceError;
use crate::evaluator::{EvaluationJob, Evaluator};
use crate::executor::{run_submission, RunOutcome};
use crate::metrics;
use crate::reporter::build_result;
use codetrial_common::config::ServiceConfig;
use codetrial_common::types::{
    Language, Submission, SubmissionId, SubmissionResult, SubmissionState, TestCase, Verdict,
};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent_per_session: usize,
    pub worker_pool_size: usize,
    pub max_queued: usize,
    /// Used when a submission carries no deadline of its own
    pub default_deadline: Duration,
    pub result_retention: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_service(&ServiceConfig::default())
    }
}

impl SchedulerConfig {
    pub fn from_service(config: &ServiceConfig) -> Self {
        Self {
            max_concurrent_per_session: config.max_concurrent_per_session,
            worker_pool_size: config.worker_pool_size,
            max_queued: config.max_queued,
            default_deadline: config.test_duration,
            result_retention: config.result_retention,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSubmission {
    pub session_id: String,
    pub language: Language,
    pub source_code: String,
    pub test_id: String,
    pub test_cases: Vec<TestCase>,
    pub deadline: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SubmissionHandle {
    pub submission_id: SubmissionId,
    pub state: SubmissionState,
}

/// Point-in-time view of one submission
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionView {
    pub submission_id: SubmissionId,
    pub session_id: String,
    pub state: SubmissionState,
    pub completed_cases: usize,
    pub total_cases: usize,
    /// Present once the submission is terminal
    #[serde(skip)]
    pub result: Option<SubmissionResult>,
}

struct Entry {
    submission: Submission,
    job: Arc<EvaluationJob>,
    deadline: Duration,
    cancel: CancellationToken,
    verdicts: Vec<Verdict>,
    result: Option<SubmissionResult>,
    finished_at: Option<Instant>,
    state_tx: watch::Sender<SubmissionState>,
}

impl Entry {
    fn view(&self) -> SubmissionView {
        SubmissionView {
            submission_id: self.submission.id,
            session_id: self.submission.session_id.clone(),
            state: self.submission.state,
            completed_cases: self
                .result
                .as_ref()
                .map_or(self.verdicts.len(), |r| r.verdicts.len()),
            total_cases: self.job.test_cases.len(),
            result: self.result.clone(),
        }
    }
}

/// Work handed to a spawned task once the lock is released
struct Dispatch {
    id: SubmissionId,
    session_id: String,
    job: Arc<EvaluationJob>,
    deadline: Duration,
    cancel: CancellationToken,
}

#[derive(Default)]
struct SchedulerState {
    entries: HashMap<SubmissionId, Entry>,
    ready: VecDeque<SubmissionId>,
    running_per_session: HashMap<String, usize>,
    active: usize,
}

struct Inner {
    config: SchedulerConfig,
    evaluator: Evaluator,
    state: Mutex<SchedulerState>,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(evaluator: Evaluator, config: SchedulerConfig) -> Self {
        info!(
            max_concurrent_per_session = config.max_concurrent_per_session,
            worker_pool_size = config.worker_pool_size,
            max_queued = config.max_queued,
            runner = evaluator.runner_name(),
            "Scheduler ready"
        );

        Self {
            inner: Arc::new(Inner {
                config,
                evaluator,
                state: Mutex::new(SchedulerState::default()),
            }),
        }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.inner.evaluator
    }

    /// Admit a submission; it starts immediately if capacity allows
    pub fn submit(&self, new: NewSubmission) -> Result<SubmissionHandle, ServiceError> {
        if !self.inner.evaluator.registry().is_enabled(new.language) {
            return Err(ServiceError::UnsupportedLanguage(new.language.to_string()));
        }
        if new.test_cases.is_empty() {
            return Err(ServiceError::EmptyTestSet(new.test_id));
        }

        let id = Uuid::new_v4();
        let deadline = new.deadline.unwrap_or(self.inner.config.default_deadline);

        let (handle, dispatches) = {
            let mut state = self.inner.state.lock();
            self.inner.prune_expired(&mut state);

            let job = Arc::new(EvaluationJob {
                submission_id: id,
                language: new.language,
                source_code: new.source_code.clone(),
                test_cases: new.test_cases,
            });
            let (state_tx, _) = watch::channel(SubmissionState::Queued);

            let submission = Submission {
                id,
                session_id: new.session_id,
                source_code: new.source_code,
                language: new.language,
                test_id: new.test_id,
                created_at: chrono::Utc::now(),
                state: SubmissionState::Queued,
            };

            let session_id = submission.session_id.clone();
            let cases = job.test_cases.len();

            state.entries.insert(
                id,
                Entry {
                    submission,
                    job,
                    deadline,
                    cancel: CancellationToken::new(),
                    verdicts: Vec::new(),
                    result: None,
                    finished_at: None,
                    state_tx,
                },
            );
            state.ready.push_back(id);

            // Admission is decided after a trial dispatch: only submissions
            // left waiting count against the queue bound
            let dispatches = self.inner.dispatch(&mut state);
            let current = state
                .entries
                .get(&id)
                .map_or(SubmissionState::Queued, |e| e.submission.state);

            if current == SubmissionState::Queued && state.ready.len() > self.inner.config.max_queued {
                state.entries.remove(&id);
                state.ready.retain(|queued| *queued != id);
                metrics::QUEUE_DEPTH.set(state.ready.len() as i64);

                let queued = state.ready.len();
                warn!(
                    session_id = %session_id,
                    queued,
                    limit = self.inner.config.max_queued,
                    "Scheduler at capacity, rejecting submission"
                );
                drop(state);
                self.inner.spawn_all(dispatches);
                return Err(ServiceError::SchedulerCapacityExceeded {
                    queued,
                    limit: self.inner.config.max_queued,
                });
            }

            metrics::SUBMISSIONS_TOTAL
                .with_label_values(&[new.language.as_str()])
                .inc();
            info!(
                submission_id = %id,
                session_id = %session_id,
                language = %new.language,
                state = %current,
                cases,
                "Submission admitted"
            );

            (
                SubmissionHandle {
                    submission_id: id,
                    state: current,
                },
                dispatches,
            )
        };

        self.inner.spawn_all(dispatches);
        Ok(handle)
    }

    pub fn status(&self, id: SubmissionId) -> Option<SubmissionView> {
        let mut state = self.inner.state.lock();
        self.inner.prune_expired(&mut state);
        state.entries.get(&id).map(Entry::view)
    }

    /// Cancel one submission.
    ///
    /// A queued submission is Cancelled on return; a running one is signalled
    /// and reaches Cancelled once its sandbox has been torn down.
    pub fn cancel(&self, id: SubmissionId) -> Result<SubmissionState, ServiceError> {
        let mut state = self.inner.state.lock();
        self.inner.cancel_locked(&mut state, id)
    }

    /// Cancel everything a session still has queued or running
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let mut state = self.inner.state.lock();
        let mut ids: Vec<(chrono::DateTime<chrono::Utc>, SubmissionId)> = state
            .entries
            .values()
            .filter(|e| e.submission.session_id == session_id && !e.submission.state.is_terminal())
            .map(|e| (e.submission.created_at, e.submission.id))
            .collect();
        ids.sort();

        let cancelled = ids
            .into_iter()
            .filter(|(_, id)| self.inner.cancel_locked(&mut state, *id).is_ok())
            .count();

        info!(session_id = %session_id, cancelled, "Session submissions cancelled");
        cancelled
    }

    /// Wait until the submission is terminal and return its result.
    ///
    /// `None` if the id is unknown or the entry was evicted meanwhile.
    pub async fn wait(&self, id: SubmissionId) -> Option<SubmissionResult> {
        let mut rx = {
            let state = self.inner.state.lock();
            state.entries.get(&id)?.state_tx.subscribe()
        };

        // An Err means the entry was evicted; the lookup below reports that
        let _ = rx.wait_for(|s| s.is_terminal()).await;

        self.status(id).and_then(|view| view.result)
    }

    pub fn queued_count(&self) -> usize {
        self.inner.state.lock().ready.len()
    }

    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active
    }

    /// Cancel all outstanding work and wait for running tasks to finish
    pub async fn shutdown(&self) {
        let outstanding: Vec<SubmissionId> = {
            let state = self.inner.state.lock();
            state
                .entries
                .values()
                .filter(|e| !e.submission.state.is_terminal())
                .map(|e| e.submission.id)
                .collect()
        };

        info!(outstanding = outstanding.len(), "Scheduler shutting down");

        for id in &outstanding {
            let _ = self.cancel(*id);
        }
        for id in outstanding {
            self.wait(id).await;
        }
    }
}

impl Inner {
    /// Move queued submissions to Running while capacity allows
    fn dispatch(&self, state: &mut SchedulerState) -> Vec<Dispatch> {
        let mut dispatches = Vec::new();
        let mut i = 0;

        while i < state.ready.len() && state.active < self.config.worker_pool_size {
            let id = state.ready[i];
            let Some(entry) = state.entries.get_mut(&id) else {
                state.ready.remove(i);
                continue;
            };

            let session_running = state
                .running_per_session
                .get(&entry.submission.session_id)
                .copied()
                .unwrap_or(0);
            if session_running >= self.config.max_concurrent_per_session {
                i += 1;
                continue;
            }

            match entry.submission.state.transition(SubmissionState::Running) {
                Ok(next) => {
                    entry.submission.state = next;
                    entry.state_tx.send_replace(next);
                }
                Err(e) => {
                    error!(submission_id = %id, error = %e, "Refusing to start submission");
                    state.ready.remove(i);
                    continue;
                }
            }

            let session_id = entry.submission.session_id.clone();
            dispatches.push(Dispatch {
                id,
                session_id: session_id.clone(),
                job: Arc::clone(&entry.job),
                deadline: entry.deadline,
                cancel: entry.cancel.clone(),
            });

            state.ready.remove(i);
            *state.running_per_session.entry(session_id).or_insert(0) += 1;
            state.active += 1;
        }

        metrics::QUEUE_DEPTH.set(state.ready.len() as i64);
        metrics::ACTIVE_SUBMISSIONS.set(state.active as i64);
        dispatches
    }

    fn cancel_locked(
        &self,
        state: &mut SchedulerState,
        id: SubmissionId,
    ) -> Result<SubmissionState, ServiceError> {
        let entry = state.entries.get_mut(&id).ok_or(ServiceError::NotFound(id))?;

        match entry.submission.state {
            SubmissionState::Queued => {
                entry.cancel.cancel();
                let total = entry.job.test_cases.len();
                Self::finish_entry(entry, SubmissionState::Cancelled, total, None)?;
                state.ready.retain(|queued| *queued != id);
                metrics::QUEUE_DEPTH.set(state.ready.len() as i64);
                info!(submission_id = %id, "Queued submission cancelled");
                Ok(SubmissionState::Cancelled)
            }
            SubmissionState::Running => {
                entry.cancel.cancel();
                info!(submission_id = %id, "Cancellation requested for running submission");
                Ok(SubmissionState::Running)
            }
            terminal => Err(ServiceError::AlreadyFinished { id, state: terminal }),
        }
    }

    /// Record the terminal state and the assembled result on an entry
    fn finish_entry(
        entry: &mut Entry,
        next: SubmissionState,
        total_cases: usize,
        error_message: Option<String>,
    ) -> Result<(), ServiceError> {
        let id = entry.submission.id;
        let next = entry.submission.state.transition(next).map_err(|e| {
            error!(submission_id = %id, error = %e, "Rejected state transition");
            ServiceError::from(e)
        })?;

        entry.submission.state = next;
        let verdicts = std::mem::take(&mut entry.verdicts);
        entry.result = Some(build_result(id, next, verdicts, total_cases, error_message));
        entry.finished_at = Some(Instant::now());
        entry.state_tx.send_replace(next);

        metrics::SUBMISSIONS_FINISHED_TOTAL
            .with_label_values(&[next.as_str()])
            .inc();
        Ok(())
    }

    fn record_verdict(&self, id: SubmissionId, verdict: Verdict) {
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(&id) {
            entry.verdicts.push(verdict);
        }
    }

    /// Called by the run task once execution is over
    fn complete(&self, dispatch: &Dispatch, outcome: RunOutcome) -> Vec<Dispatch> {
        let mut state = self.state.lock();

        if let Some(entry) = state.entries.get_mut(&dispatch.id) {
            let (next, message) = match outcome {
                RunOutcome::Completed => (SubmissionState::Completed, None),
                RunOutcome::Failed(message) => (SubmissionState::Failed, Some(message)),
                RunOutcome::TimedOut => (SubmissionState::TimedOut, None),
                RunOutcome::Cancelled => (SubmissionState::Cancelled, None),
            };
            let total = entry.job.test_cases.len();
            if Self::finish_entry(entry, next, total, message).is_ok() {
                info!(submission_id = %dispatch.id, state = %next, "Submission finished");
            }
        }

        state.active = state.active.saturating_sub(1);
        if let Some(count) = state.running_per_session.get_mut(&dispatch.session_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                state.running_per_session.remove(&dispatch.session_id);
            }
        }

        self.dispatch(&mut state)
    }

    /// Drop terminal entries older than the retention window
    fn prune_expired(&self, state: &mut SchedulerState) {
        let retention = self.config.result_retention;
        let before = state.entries.len();
        state
            .entries
            .retain(|_, e| e.finished_at.map_or(true, |at| at.elapsed() < retention));

        let evicted = before - state.entries.len();
        if evicted > 0 {
            info!(evicted, "Expired results evicted");
        }
    }

    fn spawn_all(self: &Arc<Self>, dispatches: Vec<Dispatch>) {
        for dispatch in dispatches {
            let inner = Arc::clone(self);
            tokio::spawn(async move { inner.run(dispatch).await });
        }
    }

    #[instrument(skip_all, fields(submission_id = %dispatch.id, session_id = %dispatch.session_id, language = %dispatch.job.language))]
    async fn run(self: Arc<Self>, dispatch: Dispatch) {
        info!(deadline_secs = dispatch.deadline.as_secs(), "Submission running");

        let recorder = Arc::clone(&self);
        let id = dispatch.id;
        let outcome = run_submission(
            &self.evaluator,
            Arc::clone(&dispatch.job),
            dispatch.deadline,
            &dispatch.cancel,
            move |verdict| recorder.record_verdict(id, verdict),
        )
        .await;

        let next = self.complete(&dispatch, outcome);
        self.spawn_all(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{registry, sort_cases, ScriptedRunner};
    use codetrial_common::languages::LanguageRegistry;
    use std::collections::HashSet;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent_per_session: 1,
            worker_pool_size: 4,
            max_queued: 16,
            default_deadline: Duration::from_secs(1800),
            result_retention: Duration::from_secs(3600),
        }
    }

    fn scheduler(config: SchedulerConfig) -> Scheduler {
        let evaluator = Evaluator::new(ScriptedRunner::new(), registry(), 1024);
        Scheduler::new(evaluator, config)
    }

    fn submission(session: &str, source: &str) -> NewSubmission {
        NewSubmission {
            session_id: session.to_string(),
            language: Language::Python,
            source_code: source.to_string(),
            test_id: "array-basics".to_string(),
            test_cases: sort_cases(),
            deadline: None,
        }
    }

    fn state_of(scheduler: &Scheduler, id: SubmissionId) -> SubmissionState {
        scheduler.status(id).unwrap().state
    }

    #[tokio::test]
    async fn test_correct_submission_completes_and_passes() {
        let scheduler = scheduler(config());
        let handle = scheduler.submit(submission("alice", "sort")).unwrap();

        let result = scheduler.wait(handle.submission_id).await.unwrap();

        assert_eq!(result.state, SubmissionState::Completed);
        assert!(result.overall_passed);
        assert_eq!(result.verdicts.len(), 2);
        assert_eq!(result.total_cases, 2);
    }

    #[tokio::test]
    async fn test_noop_submission_fails_first_case() {
        let scheduler = scheduler(config());
        let handle = scheduler.submit(submission("alice", "echo")).unwrap();

        let result = scheduler.wait(handle.submission_id).await.unwrap();

        assert_eq!(result.state, SubmissionState::Completed);
        assert!(!result.overall_passed);
        assert!(!result.verdicts[0].passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_runs_one_at_a_time_in_order() {
        let scheduler = scheduler(config());
        let first = scheduler.submit(submission("alice", "sleep:1000")).unwrap();
        let second = scheduler.submit(submission("alice", "sleep:1000")).unwrap();

        assert_eq!(first.state, SubmissionState::Running);
        assert_eq!(second.state, SubmissionState::Queued);
        assert_eq!(scheduler.queued_count(), 1);

        scheduler.wait(first.submission_id).await.unwrap();
        tokio::task::yield_now().await;
        assert_eq!(state_of(&scheduler, second.submission_id), SubmissionState::Running);

        let result = scheduler.wait(second.submission_id).await.unwrap();
        assert_eq!(result.state, SubmissionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sessions_run_concurrently_up_to_pool_size() {
        let mut cfg = config();
        cfg.worker_pool_size = 2;
        let scheduler = scheduler(cfg);

        let a = scheduler.submit(submission("alice", "sleep:1000")).unwrap();
        let b = scheduler.submit(submission("bob", "sleep:1000")).unwrap();
        let c = scheduler.submit(submission("carol", "sleep:1000")).unwrap();

        assert_eq!(a.state, SubmissionState::Running);
        assert_eq!(b.state, SubmissionState::Running);
        assert_eq!(c.state, SubmissionState::Queued);
        assert_eq!(scheduler.active_count(), 2);

        let result = scheduler.wait(c.submission_id).await.unwrap();
        assert_eq!(result.state, SubmissionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_bound_rejects_with_capacity_error() {
        let mut cfg = config();
        cfg.worker_pool_size = 1;
        cfg.max_queued = 1;
        let scheduler = scheduler(cfg);

        scheduler.submit(submission("alice", "sleep:1000")).unwrap();
        scheduler.submit(submission("bob", "sleep:1000")).unwrap();
        let err = scheduler.submit(submission("carol", "sleep:1000")).unwrap_err();

        assert_eq!(
            err,
            ServiceError::SchedulerCapacityExceeded { queued: 1, limit: 1 }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_still_admits_work_that_can_start() {
        let mut cfg = config();
        cfg.worker_pool_size = 4;
        cfg.max_queued = 1;
        let scheduler = scheduler(cfg);

        scheduler.submit(submission("alice", "sleep:1000")).unwrap();
        let waiting = scheduler.submit(submission("alice", "sleep:1000")).unwrap();
        assert_eq!(waiting.state, SubmissionState::Queued);
        assert_eq!(scheduler.queued_count(), 1);

        let bob = scheduler.submit(submission("bob", "sleep:1000")).unwrap();
        assert_eq!(bob.state, SubmissionState::Running);
        assert_eq!(scheduler.active_count(), 2);

        let err = scheduler.submit(submission("alice", "sleep:1000")).unwrap_err();
        assert_eq!(
            err,
            ServiceError::SchedulerCapacityExceeded { queued: 1, limit: 1 }
        );
        assert_eq!(scheduler.queued_count(), 1);

        let result = scheduler.wait(bob.submission_id).await.unwrap();
        assert_eq!(result.state, SubmissionState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_queued_is_immediate_with_no_verdicts() {
        let scheduler = scheduler(config());
        scheduler.submit(submission("alice", "sleep:1000")).unwrap();
        let queued = scheduler.submit(submission("alice", "sort")).unwrap();

        let state = scheduler.cancel(queued.submission_id).unwrap();
        assert_eq!(state, SubmissionState::Cancelled);

        let view = scheduler.status(queued.submission_id).unwrap();
        let result = view.result.unwrap();
        assert_eq!(result.state, SubmissionState::Cancelled);
        assert!(result.verdicts.is_empty());
        assert!(result.partial);
        assert_eq!(scheduler.queued_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_running_is_cooperative() {
        let scheduler = scheduler(config());
        let handle = scheduler.submit(submission("alice", "sleep:60000")).unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(scheduler.cancel(handle.submission_id).unwrap(), SubmissionState::Running);

        let result = scheduler.wait(handle.submission_id).await.unwrap();
        assert_eq!(result.state, SubmissionState::Cancelled);
        assert!(result.partial);
        assert!(!result.overall_passed);
    }

    #[tokio::test]
    async fn test_cancel_finished_submission_is_rejected() {
        let scheduler = scheduler(config());
        let handle = scheduler.submit(submission("alice", "sort")).unwrap();
        scheduler.wait(handle.submission_id).await.unwrap();

        let err = scheduler.cancel(handle.submission_id).unwrap_err();
        assert_eq!(
            err,
            ServiceError::AlreadyFinished {
                id: handle.submission_id,
                state: SubmissionState::Completed
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out_submission() {
        let scheduler = scheduler(config());
        let mut new = submission("alice", "sleep:30000");
        new.deadline = Some(Duration::from_secs(45));
        let handle = scheduler.submit(new).unwrap();

        let started = Instant::now();
        let result = scheduler.wait(handle.submission_id).await.unwrap();

        assert_eq!(result.state, SubmissionState::TimedOut);
        assert!(result.partial);
        assert_eq!(result.verdicts.len(), 1);
        assert!(started.elapsed() >= Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_internal_fault_fails_submission() {
        let scheduler = scheduler(config());
        let handle = scheduler.submit(submission("alice", "broken")).unwrap();

        let result = scheduler.wait(handle.submission_id).await.unwrap();

        assert_eq!(result.state, SubmissionState::Failed);
        assert!(result.error.is_some());
        assert!(!result.overall_passed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_session_cancels_everything_it_owns() {
        let scheduler = scheduler(config());
        let running = scheduler.submit(submission("alice", "sleep:60000")).unwrap();
        let queued = scheduler.submit(submission("alice", "sleep:60000")).unwrap();
        let other = scheduler.submit(submission("bob", "sleep:1000")).unwrap();

        assert_eq!(scheduler.cancel_session("alice"), 2);

        assert_eq!(state_of(&scheduler, queued.submission_id), SubmissionState::Cancelled);
        let result = scheduler.wait(running.submission_id).await.unwrap();
        assert_eq!(result.state, SubmissionState::Cancelled);

        let result = scheduler.wait(other.submission_id).await.unwrap();
        assert_eq!(result.state, SubmissionState::Completed);
    }

    #[tokio::test]
    async fn test_disabled_language_and_empty_tests_rejected() {
        let enabled: HashSet<Language> = [Language::Bash].into_iter().collect();
        let registry = LanguageRegistry::builtin().restrict_to(&enabled).unwrap();
        let evaluator = Evaluator::new(ScriptedRunner::new(), Arc::new(registry), 1024);
        let scheduler = Scheduler::new(evaluator, config());

        let err = scheduler.submit(submission("alice", "sort")).unwrap_err();
        assert_eq!(err, ServiceError::UnsupportedLanguage("python".to_string()));

        let mut empty = submission("alice", "sort");
        empty.language = Language::Bash;
        empty.test_cases.clear();
        assert_eq!(
            scheduler.submit(empty).unwrap_err(),
            ServiceError::EmptyTestSet("array-basics".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_evicted_after_retention() {
        let mut cfg = config();
        cfg.result_retention = Duration::from_secs(60);
        let scheduler = scheduler(cfg);

        let handle = scheduler.submit(submission("alice", "sort")).unwrap();
        scheduler.wait(handle.submission_id).await.unwrap();
        assert!(scheduler.status(handle.submission_id).is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(scheduler.status(handle.submission_id).is_none());
    }

    #[tokio::test]
    async fn test_unknown_submission() {
        let scheduler = scheduler(config());
        let id = Uuid::new_v4();

        assert!(scheduler.status(id).is_none());
        assert_eq!(scheduler.cancel(id).unwrap_err(), ServiceError::NotFound(id));
        assert!(scheduler.wait(id).await.is_none());
    }
}

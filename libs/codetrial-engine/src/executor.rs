/// Submission Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Drive one Running submission to a terminal outcome.
///
/// **Architecture:**
/// 1. Pull verdicts from the evaluator stream (evaluator.rs)
/// 2. Hand each verdict to the caller as soon as it exists
/// 3. Race the stream against the deadline and the cancel token
///
/// This module is the glue layer - it knows nothing about:
/// - How code executes (runner's job)
/// - How outputs are judged (evaluator's job)
/// - Which state the submission is in (scheduler's job)

use crate::error::EvaluationError;
use crate::evaluator::{EvaluationJob, Evaluator};
use codetrial_common::types::Verdict;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Message reported to the submitter when grading fails on our side
pub const INTERNAL_FAULT_MESSAGE: &str = "internal error while grading; please resubmit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Failed(String),
    TimedOut,
    Cancelled,
}

/// Evaluate `job` until every case is judged, the deadline passes or `cancel` fires.
///
/// The in-flight runner invocation is torn down before this returns.
pub async fn run_submission<F>(
    evaluator: &Evaluator,
    job: Arc<EvaluationJob>,
    deadline: Duration,
    cancel: &CancellationToken,
    mut on_verdict: F,
) -> RunOutcome
where
    F: FnMut(Verdict),
{
    let submission_id = job.submission_id;

    // Child token: cancelled by the caller or by our own deadline
    let run_token = cancel.child_token();
    let mut verdicts = evaluator.evaluate(job, run_token.clone());

    let expiry = tokio::time::sleep(deadline);
    tokio::pin!(expiry);

    let outcome = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => break RunOutcome::Cancelled,

            _ = &mut expiry => {
                info!(submission_id = %submission_id, deadline_secs = deadline.as_secs(), "Deadline passed");
                break RunOutcome::TimedOut;
            }

            next = verdicts.next() => match next {
                Some(Ok(verdict)) => on_verdict(verdict),
                Some(Err(EvaluationError::Cancelled)) => break RunOutcome::Cancelled,
                Some(Err(err)) => {
                    error!(submission_id = %submission_id, error = %err, "Grading failed");
                    break RunOutcome::Failed(INTERNAL_FAULT_MESSAGE.to_string());
                }
                None => break RunOutcome::Completed,
            },
        }
    };

    // Dropping the stream drops the runner future, which tears down its sandbox
    run_token.cancel();
    drop(verdicts);

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{registry, sort_cases, ScriptedRunner};
    use codetrial_common::types::Language;
    use uuid::Uuid;

    fn job(source: &str) -> Arc<EvaluationJob> {
        Arc::new(EvaluationJob {
            submission_id: Uuid::new_v4(),
            language: Language::Python,
            source_code: source.to_string(),
            test_cases: sort_cases(),
        })
    }

    #[tokio::test]
    async fn test_completed_collects_all_verdicts() {
        let evaluator = Evaluator::new(ScriptedRunner::new(), registry(), 1024);
        let mut verdicts = Vec::new();

        let outcome = run_submission(
            &evaluator,
            job("sort"),
            Duration::from_secs(60),
            &CancellationToken::new(),
            |v| verdicts.push(v),
        )
        .await;

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(verdicts.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_times_out_slow_program() {
        let evaluator = Evaluator::new(ScriptedRunner::new(), registry(), 1024);
        let mut verdicts = Vec::new();

        let outcome = run_submission(
            &evaluator,
            job("sleep:10000"),
            Duration::from_secs(15),
            &CancellationToken::new(),
            |v| verdicts.push(v),
        )
        .await;

        assert_eq!(outcome, RunOutcome::TimedOut);
        assert_eq!(verdicts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_running_case() {
        let evaluator = Evaluator::new(ScriptedRunner::new(), registry(), 1024);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let outcome = run_submission(
            &evaluator,
            job("sleep:60000"),
            Duration::from_secs(3600),
            &cancel,
            |_| {},
        )
        .await;

        assert_eq!(outcome, RunOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_internal_fault_fails_with_generic_message() {
        let evaluator = Evaluator::new(ScriptedRunner::new(), registry(), 1024);

        let outcome = run_submission(
            &evaluator,
            job("broken"),
            Duration::from_secs(60),
            &CancellationToken::new(),
            |_| {},
        )
        .await;

        assert_eq!(outcome, RunOutcome::Failed(INTERNAL_FAULT_MESSAGE.to_string()));
    }
}

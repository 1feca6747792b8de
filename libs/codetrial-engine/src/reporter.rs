/// Result Reporter - Final Result Assembly
///
/// **Core Responsibility:**
/// Fold the verdicts collected so far and the terminal state into an
/// immutable [`SubmissionResult`].
///
/// **Aggregation Rules:**
/// - overall_passed: state is Completed, every case has a verdict, every
///   verdict passed and no case faulted
/// - partial: the submission stopped early (TimedOut or Cancelled)
/// - Verdicts are kept in declaration order

use codetrial_common::types::{SubmissionId, SubmissionResult, SubmissionState, Verdict};
use tracing::info;

pub fn build_result(
    submission_id: SubmissionId,
    state: SubmissionState,
    mut verdicts: Vec<Verdict>,
    total_cases: usize,
    error: Option<String>,
) -> SubmissionResult {
    verdicts.sort_by_key(|v| v.test_case_index);

    let passed_count = verdicts.iter().filter(|v| v.passed).count();
    let overall_passed = state == SubmissionState::Completed
        && verdicts.len() == total_cases
        && verdicts.iter().all(|v| v.passed && v.fault.is_none());

    let partial = matches!(state, SubmissionState::TimedOut | SubmissionState::Cancelled);

    info!(
        submission_id = %submission_id,
        state = %state,
        passed = passed_count,
        total = total_cases,
        overall_passed,
        "Result assembled"
    );

    SubmissionResult {
        submission_id,
        state,
        verdicts,
        overall_passed,
        partial,
        total_cases,
        error,
        finished_at: chrono::Utc::now(),
    }
}

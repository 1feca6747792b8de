/// Test-Case Evaluator - Language-Agnostic Judging
///
/// **Core Responsibility:**
/// Run a submission against its test cases, one runner invocation per case in
/// declaration order, and turn each outcome into a [`Verdict`].
///
/// **Critical Properties:**
/// - Knows nothing about containers or processes (that is the runner's job)
/// - Knows nothing about queues or deadlines (that is the scheduler's job)
/// - Produces a lazy, finite stream; dropping it stops evaluation
///
/// **Normalization Rules (Applied to All Languages):**
/// - Trailing whitespace on each line: IGNORED
/// - Trailing blank lines: IGNORED
/// - Line endings (\n vs \r\n): IGNORED
/// - Leading whitespace: SIGNIFICANT
/// - Case sensitivity: YES (exact match required)
///
/// **Fault Handling:**
/// - Runtime faults and resource limits fail the case; the next case still runs
/// - A compile error fails the case and every remaining case without recompiling
/// - Infrastructure failures are retried once, then end the stream

use crate::error::{EvaluationError, SandboxError};
use crate::metrics;
use crate::sandbox::{ResourceLimits, SandboxRunner};
use codetrial_common::languages::LanguageRegistry;
use codetrial_common::types::{
    ExecutionResult, FaultKind, Language, SubmissionId, TestCase, Verdict,
};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runner attempts per case before an infrastructure failure is final
const MAX_ATTEMPTS: u32 = 2;

/// Longest line shown in a diff summary
const PREVIEW_CHARS: usize = 200;

/// Everything needed to judge one submission
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub submission_id: SubmissionId,
    pub language: Language,
    pub source_code: String,
    pub test_cases: Vec<TestCase>,
}

/// Normalize output string for comparison
///
/// Strips trailing whitespace per line and drops trailing blank lines.
/// Internal whitespace, leading whitespace and case are preserved.
pub fn normalize_output(output: &str) -> String {
    let mut lines: Vec<&str> = output.lines().map(str::trim_end).collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

fn preview(line: &str) -> String {
    if line.chars().count() <= PREVIEW_CHARS {
        return line.to_string();
    }
    let mut cut: String = line.chars().take(PREVIEW_CHARS).collect();
    cut.push_str("...");
    cut
}

/// Describe the first line where normalized outputs differ
pub fn diff_summary(actual: &str, expected: &str) -> Option<String> {
    let actual = normalize_output(actual);
    let expected = normalize_output(expected);
    if actual == expected {
        return None;
    }

    let mut actual_lines = actual.lines();
    let mut expected_lines = expected.lines();
    let mut line_no = 1;

    loop {
        match (actual_lines.next(), expected_lines.next()) {
            (Some(a), Some(e)) if a == e => line_no += 1,
            (Some(a), Some(e)) => {
                return Some(format!(
                    "line {}: expected `{}`, got `{}`",
                    line_no,
                    preview(e),
                    preview(a)
                ))
            }
            (None, Some(e)) => {
                return Some(format!(
                    "line {}: expected `{}`, got end of output",
                    line_no,
                    preview(e)
                ))
            }
            (Some(a), None) => {
                return Some(format!(
                    "line {}: expected end of output, got `{}`",
                    line_no,
                    preview(a)
                ))
            }
            // Both empty: outputs differ only before normalization
            (None, None) => return Some("outputs differ".to_string()),
        }
    }
}

fn judge(index: usize, case: &TestCase, exec: ExecutionResult) -> Verdict {
    let mut summary = diff_summary(&exec.stdout, &case.expected_output);
    if summary.is_some() && exec.truncated {
        summary = summary.map(|s| format!("{} (output truncated)", s));
    }

    Verdict {
        test_case_index: index,
        passed: summary.is_none(),
        actual_output: exec.stdout,
        diff_summary: summary,
        fault: None,
        wall_time_ms: exec.wall_time_ms,
    }
}

fn compile_failure(index: usize, output: &str) -> Verdict {
    Verdict {
        test_case_index: index,
        passed: false,
        actual_output: String::new(),
        diff_summary: Some(format!("compilation failed:\n{}", output)),
        fault: Some(FaultKind::CompileError),
        wall_time_ms: 0,
    }
}

fn fault_verdict(index: usize, err: SandboxError, wall_time_ms: u64) -> Verdict {
    let fault = err.fault_kind();
    let summary = err.to_string();
    let (stdout, detail) = match err {
        SandboxError::RuntimeFault { stdout, stderr, .. } => (stdout, stderr),
        SandboxError::ResourceExceeded { stdout, .. } => (stdout, String::new()),
        _ => (String::new(), String::new()),
    };

    let detail = detail.trim_end();
    let diff_summary = if detail.is_empty() {
        summary
    } else {
        format!("{}: {}", summary, detail)
    };

    Verdict {
        test_case_index: index,
        passed: false,
        actual_output: stdout,
        diff_summary: Some(diff_summary),
        fault,
        wall_time_ms,
    }
}

/// Drives a runner over test cases and judges each outcome
#[derive(Clone)]
pub struct Evaluator {
    runner: Arc<dyn SandboxRunner>,
    registry: Arc<LanguageRegistry>,
    output_limit_bytes: usize,
}

impl Evaluator {
    pub fn new(
        runner: Arc<dyn SandboxRunner>,
        registry: Arc<LanguageRegistry>,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            runner,
            registry,
            output_limit_bytes,
        }
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    pub fn runner_name(&self) -> &'static str {
        self.runner.name()
    }

    /// Lazily evaluate every case of `job`.
    ///
    /// The stream yields one verdict per case in order. It ends early with a
    /// single `Err` on cancellation or a repeated infrastructure failure.
    pub fn evaluate(
        &self,
        job: Arc<EvaluationJob>,
        cancel: CancellationToken,
    ) -> BoxStream<'static, Result<Verdict, EvaluationError>> {
        let limits = self
            .registry
            .get_config(job.language)
            .map(|config| ResourceLimits::for_language(&config.limits, self.output_limit_bytes))
            .map_err(|e| e.to_string());

        let cursor = CaseCursor {
            evaluator: self.clone(),
            job,
            limits,
            cancel,
            next: 0,
            compile_output: None,
            finished: false,
        };

        stream::unfold(cursor, |mut cursor| async move {
            if cursor.finished || cursor.next >= cursor.job.test_cases.len() {
                return None;
            }
            let index = cursor.next;
            cursor.next += 1;

            let item = cursor.step(index).await;
            if item.is_err() {
                cursor.finished = true;
            }
            Some((item, cursor))
        })
        .boxed()
    }
}

struct CaseCursor {
    evaluator: Evaluator,
    job: Arc<EvaluationJob>,
    limits: Result<ResourceLimits, String>,
    cancel: CancellationToken,
    next: usize,
    /// Set once compilation fails; later cases reuse it
    compile_output: Option<String>,
    finished: bool,
}

impl CaseCursor {
    async fn step(&mut self, index: usize) -> Result<Verdict, EvaluationError> {
        if let Some(output) = &self.compile_output {
            return Ok(compile_failure(index, output));
        }
        if self.cancel.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }

        let limits = match &self.limits {
            Ok(limits) => *limits,
            Err(message) => {
                return Err(EvaluationError::InternalFault {
                    attempts: 0,
                    message: message.clone(),
                })
            }
        };

        let job = Arc::clone(&self.job);
        let case = &job.test_cases[index];
        let mut attempts = 0;

        loop {
            attempts += 1;
            let started = Instant::now();
            let outcome = self
                .evaluator
                .runner
                .execute(&job.source_code, job.language, &case.input, &limits, &self.cancel)
                .await;
            let elapsed = started.elapsed();

            match outcome {
                Ok(exec) => {
                    metrics::CASE_DURATION_SECONDS
                        .with_label_values(&[job.language.as_str()])
                        .observe(elapsed.as_secs_f64());
                    let verdict = judge(index, case, exec);
                    debug!(
                        submission_id = %job.submission_id,
                        test_case = index,
                        passed = verdict.passed,
                        "Case judged"
                    );
                    return Ok(verdict);
                }
                Err(SandboxError::CompileError { output }) => {
                    debug!(submission_id = %job.submission_id, "Compilation failed; remaining cases fail");
                    let verdict = compile_failure(index, &output);
                    self.compile_output = Some(output);
                    return Ok(verdict);
                }
                Err(SandboxError::Cancelled) => return Err(EvaluationError::Cancelled),
                Err(SandboxError::Internal(message)) => {
                    metrics::SANDBOX_INTERNAL_FAULTS_TOTAL.inc();
                    warn!(
                        submission_id = %job.submission_id,
                        test_case = index,
                        attempt = attempts,
                        runner = self.evaluator.runner.name(),
                        error = %message,
                        "Sandbox infrastructure failure"
                    );
                    if attempts >= MAX_ATTEMPTS {
                        return Err(EvaluationError::InternalFault { attempts, message });
                    }
                }
                Err(fault) => {
                    metrics::CASE_DURATION_SECONDS
                        .with_label_values(&[job.language.as_str()])
                        .observe(elapsed.as_secs_f64());
                    return Ok(fault_verdict(index, fault, elapsed.as_millis() as u64));
                }
            }
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type SubmissionId = Uuid;

/// Session used when a client does not identify itself
pub const ANONYMOUS_SESSION: &str = "anonymous";

/// Supported submission languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Java,
    Rust,
    Bash,
}

impl Language {
    pub const ALL: [Language; 4] = [Language::Python, Language::Java, Language::Rust, Language::Bash];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Java => "java",
            Language::Rust => "rust",
            Language::Bash => "bash",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language '{0}'")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            "rust" | "rs" => Ok(Language::Rust),
            "bash" | "sh" => Ok(Language::Bash),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A mock test from the catalog: metadata plus the case set submissions are graded against
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub id: String,
    pub title: String,
    pub description: String,
    pub function_name: String,
    pub duration_minutes: u32,
    pub difficulty: Difficulty,
    pub test_cases: Vec<TestCase>,
}

/// Lifecycle of a submission.
///
/// ```text
/// Queued ──► Running ──► Completed | Failed | TimedOut | Cancelled
///    └──────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionState {
    Queued,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid submission transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: SubmissionState,
    pub to: SubmissionState,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SubmissionState::Queued | SubmissionState::Running)
    }

    pub fn can_transition_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, TimedOut)
                | (Running, Cancelled)
        )
    }

    /// Returns the next state, or the rejected transition
    pub fn transition(self, next: SubmissionState) -> Result<SubmissionState, InvalidTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(InvalidTransition { from: self, to: next })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionState::Queued => "queued",
            SubmissionState::Running => "running",
            SubmissionState::Completed => "completed",
            SubmissionState::Failed => "failed",
            SubmissionState::TimedOut => "timed_out",
            SubmissionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SubmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub session_id: String,
    pub source_code: String,
    pub language: Language,
    pub test_id: String,
    pub created_at: DateTime<Utc>,
    pub state: SubmissionState,
}

/// Output of one successful program run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub wall_time_ms: u64,
    pub truncated: bool,
}

/// Which kind of fault kept a case from producing comparable output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    CompileError,
    RuntimeFault,
    ResourceExceeded,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FaultKind::CompileError => "compile error",
            FaultKind::RuntimeFault => "runtime fault",
            FaultKind::ResourceExceeded => "resource exceeded",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub test_case_index: usize,
    pub passed: bool,
    pub actual_output: String,
    pub diff_summary: Option<String>,
    pub fault: Option<FaultKind>,
    pub wall_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub submission_id: SubmissionId,
    pub state: SubmissionState,
    pub verdicts: Vec<Verdict>,
    pub overall_passed: bool,
    /// Set when the submission stopped before every case was graded
    pub partial: bool,
    pub total_cases: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

//! Error taxonomy.
//!
//! Per-case faults (`CompileError`, `RuntimeFault`, `ResourceExceeded`) are
//! folded into verdicts by the evaluator. Infrastructure faults end
//! evaluation as [`EvaluationError::InternalFault`] and the submission as
//! Failed. Admission and lookup failures reach callers as [`ServiceError`].

use codetrial_common::types::{FaultKind, InvalidTransition, SubmissionId, SubmissionState};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    CpuTime,
    WallTime,
    Memory,
    OutputSize,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Resource::CpuTime => "cpu time",
            Resource::WallTime => "wall time",
            Resource::Memory => "memory",
            Resource::OutputSize => "output size",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SandboxError {
    #[error("compilation failed")]
    CompileError { output: String },

    #[error("runtime fault ({})", describe_exit(.exit_code, .signal))]
    RuntimeFault {
        exit_code: Option<i32>,
        signal: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("{resource} limit exceeded")]
    ResourceExceeded {
        resource: Resource,
        stdout: String,
        stderr: String,
    },

    #[error("execution cancelled")]
    Cancelled,

    #[error("sandbox infrastructure failure: {0}")]
    Internal(String),
}

impl SandboxError {
    pub fn internal(err: impl fmt::Display) -> Self {
        SandboxError::Internal(err.to_string())
    }

    /// Fault kind for per-case faults, `None` for cancellation and infrastructure failures
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            SandboxError::CompileError { .. } => Some(FaultKind::CompileError),
            SandboxError::RuntimeFault { .. } => Some(FaultKind::RuntimeFault),
            SandboxError::ResourceExceeded { .. } => Some(FaultKind::ResourceExceeded),
            SandboxError::Cancelled | SandboxError::Internal(_) => None,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>, signal: &Option<i32>) -> String {
    match (*exit_code, *signal) {
        (_, Some(sig)) => format!("killed by signal {}", sig),
        (Some(code), None) => format!("exit code {}", code),
        (None, None) => "no exit status".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("evaluation cancelled")]
    Cancelled,

    #[error("sandbox infrastructure failure after {attempts} attempts: {message}")]
    InternalFault { attempts: u32, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("scheduler at capacity ({queued} submissions queued, limit {limit}); retry later")]
    SchedulerCapacityExceeded { queued: usize, limit: usize },

    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),

    #[error("test '{0}' has no test cases")]
    EmptyTestSet(String),

    #[error("submission {0} not found")]
    NotFound(SubmissionId),

    #[error("submission {id} already finished as {state}")]
    AlreadyFinished { id: SubmissionId, state: SubmissionState },

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_fault_message() {
        let err = SandboxError::RuntimeFault {
            exit_code: Some(1),
            signal: None,
            stdout: String::new(),
            stderr: "Traceback".to_string(),
        };
        assert_eq!(err.to_string(), "runtime fault (exit code 1)");

        let err = SandboxError::RuntimeFault {
            exit_code: None,
            signal: Some(11),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.to_string(), "runtime fault (killed by signal 11)");
    }

    #[test]
    fn test_fault_kinds() {
        let err = SandboxError::ResourceExceeded {
            resource: Resource::WallTime,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(err.fault_kind(), Some(FaultKind::ResourceExceeded));
        assert_eq!(err.to_string(), "wall time limit exceeded");
        assert_eq!(SandboxError::Cancelled.fault_kind(), None);
        assert_eq!(SandboxError::internal("daemon down").fault_kind(), None);
    }
}

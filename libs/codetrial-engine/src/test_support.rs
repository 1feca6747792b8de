// In-memory runner for evaluator and scheduler tests.
//
// Behaviour is picked by the source code text:
//   "sort"          prints the JSON array from stdin in ascending order
//   "echo"          prints stdin back
//   "sleep:<ms>"    sleeps, honouring cancellation, then echoes
//   "crash"         exits 1 with "boom" on stderr
//   "hog"           exceeds the memory limit on the first call, then sorts
//   "compile-error" fails to compile
//   "flaky"         infrastructure failure on the first call only
//   "broken"        infrastructure failure on every call

use crate::error::{Resource, SandboxError};
use crate::sandbox::{ResourceLimits, SandboxRunner};
use async_trait::async_trait;
use codetrial_common::languages::LanguageRegistry;
use codetrial_common::types::{ExecutionResult, Language, TestCase};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
pub struct ScriptedRunner {
    calls: AtomicUsize,
}

impl ScriptedRunner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn ok(stdout: String) -> Result<ExecutionResult, SandboxError> {
    Ok(ExecutionResult {
        stdout,
        stderr: String::new(),
        exit_code: Some(0),
        wall_time_ms: 1,
        truncated: false,
    })
}

fn sort_json(input: &str) -> String {
    let mut values: Vec<i64> = serde_json::from_str(input.trim()).unwrap_or_default();
    values.sort_unstable();
    format!("{}\n", serde_json::to_string(&values).unwrap_or_default())
}

#[async_trait]
impl SandboxRunner for ScriptedRunner {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn execute(
        &self,
        source_code: &str,
        _language: Language,
        input: &str,
        _limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(ms) = source_code.strip_prefix("sleep:") {
            let ms: u64 = ms.trim().parse().unwrap_or(1000);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => return ok(input.to_string()),
                _ = cancel.cancelled() => return Err(SandboxError::Cancelled),
            }
        }

        match source_code {
            "sort" => ok(sort_json(input)),
            "crash" => Err(SandboxError::RuntimeFault {
                exit_code: Some(1),
                signal: None,
                stdout: String::new(),
                stderr: "boom".to_string(),
            }),
            "hog" if call == 0 => Err(SandboxError::ResourceExceeded {
                resource: Resource::Memory,
                stdout: String::new(),
                stderr: "MemoryError".to_string(),
            }),
            "hog" => ok(sort_json(input)),
            "compile-error" => Err(SandboxError::CompileError {
                output: "main.py:1: SyntaxError: invalid syntax".to_string(),
            }),
            "flaky" if call == 0 => Err(SandboxError::internal("daemon hiccup")),
            "broken" => Err(SandboxError::internal("daemon unavailable")),
            _ => ok(input.to_string()),
        }
    }
}

pub fn registry() -> Arc<LanguageRegistry> {
    Arc::new(LanguageRegistry::builtin())
}

pub fn sort_cases() -> Vec<TestCase> {
    vec![
        TestCase {
            input: "[3,1,2]".to_string(),
            expected_output: "[1,2,3]".to_string(),
        },
        TestCase {
            input: "[5,2,8,1]".to_string(),
            expected_output: "[1,2,5,8]".to_string(),
        },
    ]
}

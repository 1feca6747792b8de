//! Sandbox Runner - executes one untrusted program.
//!
//! **Core Responsibility:**
//! Run source code with a single test input under resource limits and return
//! the captured output, or the fault that stopped it.
//!
//! **Critical Architectural Boundary:**
//! - A runner knows HOW to execute (local processes, Docker containers)
//! - A runner does NOT compare outputs or assign verdicts
//! - Every execution owns its scratch space and tears it down on return,
//!   including when the future is dropped mid-flight

pub mod docker;
pub mod process;

use crate::error::SandboxError;
use async_trait::async_trait;
use codetrial_common::languages::LanguageLimits;
use codetrial_common::types::{ExecutionResult, Language};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

pub use docker::DockerSandbox;
pub use process::ProcessSandbox;

/// Safety limits to prevent pathological inputs from reaching a sandbox
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Compilation gets a fixed budget independent of the per-case limits
pub const COMPILE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub cpu_time: Duration,
    pub wall_time: Duration,
    pub memory_bytes: u64,
    /// Cap applied to stdout and stderr separately
    pub output_limit_bytes: usize,
}

impl ResourceLimits {
    pub fn for_language(limits: &LanguageLimits, output_limit_bytes: usize) -> Self {
        Self {
            cpu_time: Duration::from_millis(limits.cpu_time_ms),
            wall_time: Duration::from_millis(limits.wall_time_ms),
            memory_bytes: limits.memory_limit_mb * 1024 * 1024,
            output_limit_bytes,
        }
    }
}

#[async_trait]
pub trait SandboxRunner: Send + Sync {
    /// Short backend name for logs and metrics
    fn name(&self) -> &'static str;

    /// Compile (if the language needs it) and run `source_code` once with `input` on stdin.
    ///
    /// Returns `Ok` only for a clean exit; non-zero exits, signals and limit
    /// violations are reported as [`SandboxError`] variants.
    async fn execute(
        &self,
        source_code: &str,
        language: Language,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError>;
}

pub(crate) fn check_input_sizes(source_code: &str, input: &str) -> Result<(), SandboxError> {
    if source_code.len() > MAX_SOURCE_CODE_BYTES {
        return Err(SandboxError::CompileError {
            output: format!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES),
        });
    }
    if input.len() > MAX_TEST_INPUT_BYTES {
        return Err(SandboxError::internal(format!(
            "Test input exceeds maximum size of {} bytes",
            MAX_TEST_INPUT_BYTES
        )));
    }
    Ok(())
}

/// Read a stream to the end, keeping at most `cap` bytes.
///
/// The rest is drained and dropped so the writer never blocks on a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        if n > room {
            kept.extend_from_slice(&chunk[..room]);
            truncated = true;
        } else {
            kept.extend_from_slice(&chunk[..n]);
        }
    }

    Ok((kept, truncated))
}

/// What language runtimes print when an allocation is refused
const ALLOCATION_FAILURE_MARKERS: &[&str] = &[
    "memoryerror",          // python
    "outofmemoryerror",     // jvm
    "memory allocation of", // rust alloc error handler
    "cannot allocate",      // bash xmalloc, libc ENOMEM
    "bad_alloc",            // c++
    "out of memory",
];

/// Whether a failed program reported running out of memory.
///
/// Under an address space cap the kernel refuses the allocation rather than
/// killing the process, so the runtime's own report is the evidence.
pub(crate) fn reports_allocation_failure(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    ALLOCATION_FAILURE_MARKERS
        .iter()
        .any(|marker| stderr.contains(marker))
}

/// Cap an already collected string at a char boundary
pub(crate) fn truncate_output(mut output: String, cap: usize) -> (String, bool) {
    if output.len() <= cap {
        return (output, false);
    }
    let mut end = cap;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    output.truncate(end);
    (output, true)
}

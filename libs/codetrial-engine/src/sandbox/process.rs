//! Local process backend.
//!
//! Each execution gets a fresh scratch directory, a cleared environment and
//! its own process group. CPU time, address space, file size and open file
//! rlimits are applied in the child before exec; wall time is enforced here.
//! The whole process group is killed and the directory removed on every exit
//! path, including when the execution future is dropped. The group leader is
//! only reaped after that kill, so the group id cannot have been recycled.

use super::{
    check_input_sizes, read_capped, reports_allocation_failure, ResourceLimits, SandboxRunner,
    COMPILE_TIMEOUT,
};
use crate::error::{Resource, SandboxError};
use async_trait::async_trait;
use codetrial_common::languages::{LanguageConfig, LanguageRegistry};
use codetrial_common::types::{ExecutionResult, Language};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const FALLBACK_PATH: &str = "/usr/local/bin:/usr/bin:/bin";
const MAX_FILE_SIZE_BYTES: u64 = 64 * 1024 * 1024;
const MAX_OPEN_FILES: u64 = 64;

/// How long to wait for stdout/stderr to close once the process is gone
const PIPE_GRACE: Duration = Duration::from_secs(1);

/// Scratch directory for one execution, removed on drop
struct Workspace {
    path: PathBuf,
}

impl Workspace {
    async fn create(root: &Path) -> Result<Self, SandboxError> {
        let path = root.join(format!("run-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| SandboxError::internal(format!("create workspace {}: {}", path.display(), e)))?;
        Ok(Self { path })
    }

    async fn write(&self, file_name: &str, contents: &str) -> Result<(), SandboxError> {
        let target = self.path.join(file_name);
        tokio::fs::write(&target, contents)
            .await
            .map_err(|e| SandboxError::internal(format!("write {}: {}", target.display(), e)))
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove sandbox workspace");
            }
        }
    }
}

/// Kills the child's process group when dropped
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn kill(&self) {
        if let Some(pgid) = self.pgid {
            kill_process_group(pgid);
        }
    }

    /// Call once the leader has been reaped
    fn disarm(&mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    // ESRCH just means everything already exited
    unsafe {
        libc::killpg(pgid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {}

/// Wait for the child to exit without reaping it
#[cfg(unix)]
async fn leader_exited(child: &mut Child) -> io::Result<()> {
    let Some(pid) = child.id() else {
        return Ok(());
    };

    tokio::task::spawn_blocking(move || loop {
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    })
    .await
    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

#[cfg(not(unix))]
async fn leader_exited(child: &mut Child) -> io::Result<()> {
    child.wait().await.map(|_| ())
}

#[cfg(unix)]
fn apply_rlimits(limits: &ResourceLimits) -> io::Result<()> {
    macro_rules! set_limit {
        ($resource:expr, $soft:expr, $hard:expr) => {{
            let lim = libc::rlimit {
                rlim_cur: ($soft) as libc::rlim_t,
                rlim_max: ($hard) as libc::rlim_t,
            };
            if unsafe { libc::setrlimit($resource, &lim) } != 0 {
                return Err(io::Error::last_os_error());
            }
        }};
    }

    // SIGXCPU at the soft limit, SIGKILL one second later
    let cpu_secs = (limits.cpu_time.as_millis() as u64).saturating_add(999) / 1000;
    set_limit!(libc::RLIMIT_CPU, cpu_secs, cpu_secs + 1);
    if limits.memory_bytes > 0 {
        set_limit!(libc::RLIMIT_AS, limits.memory_bytes, limits.memory_bytes);
    }
    set_limit!(libc::RLIMIT_FSIZE, MAX_FILE_SIZE_BYTES, MAX_FILE_SIZE_BYTES);
    set_limit!(libc::RLIMIT_NOFILE, MAX_OPEN_FILES, MAX_OPEN_FILES);
    set_limit!(libc::RLIMIT_CORE, 0, 0);
    Ok(())
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn resource_for_signal(signal: i32) -> Option<Resource> {
    match signal {
        libc::SIGXCPU => Some(Resource::CpuTime),
        libc::SIGXFSZ => Some(Resource::OutputSize),
        // The kernel OOM killer and the hard CPU limit both deliver SIGKILL
        libc::SIGKILL => Some(Resource::Memory),
        _ => None,
    }
}

#[cfg(not(unix))]
fn resource_for_signal(_signal: i32) -> Option<Resource> {
    None
}

enum Stop {
    Exited(io::Result<()>),
    WallTimeExceeded,
    Cancelled,
}

enum Termination {
    Exited(ExitStatus),
    WallTimeExceeded,
}

/// Raw outcome of one spawned command
struct Finished {
    termination: Termination,
    stdout: String,
    stderr: String,
    truncated: bool,
    elapsed: Duration,
}

/// Runs submissions as plain child processes on this host
pub struct ProcessSandbox {
    registry: Arc<LanguageRegistry>,
    root: PathBuf,
}

impl ProcessSandbox {
    pub fn new(registry: Arc<LanguageRegistry>, root: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            root: root.into(),
        }
    }

    async fn compile(
        &self,
        workspace: &Workspace,
        config: &LanguageConfig,
        argv: &[String],
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<(), SandboxError> {
        // Compilers get a fixed budget and no address space cap
        let compile_limits = ResourceLimits {
            cpu_time: COMPILE_TIMEOUT,
            wall_time: COMPILE_TIMEOUT,
            memory_bytes: 0,
            output_limit_bytes: limits.output_limit_bytes,
        };

        let finished = self
            .run_command(workspace, argv, "", &compile_limits, cancel)
            .await?;

        match finished.termination {
            Termination::Exited(status) if status.success() => {
                debug!(
                    language = %config.name,
                    compile_ms = finished.elapsed.as_millis() as u64,
                    "Compilation succeeded"
                );
                Ok(())
            }
            Termination::Exited(_) => {
                let mut output = finished.stderr;
                if !finished.stdout.is_empty() {
                    if !output.is_empty() && !output.ends_with('\n') {
                        output.push('\n');
                    }
                    output.push_str(&finished.stdout);
                }
                Err(SandboxError::CompileError { output })
            }
            Termination::WallTimeExceeded => Err(SandboxError::CompileError {
                output: format!("Compilation timed out after {}s", COMPILE_TIMEOUT.as_secs()),
            }),
        }
    }

    async fn run_command(
        &self,
        workspace: &Workspace,
        argv: &[String],
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<Finished, SandboxError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| SandboxError::internal("empty command line"))?;

        let path = std::env::var_os("PATH").unwrap_or_else(|| FALLBACK_PATH.into());

        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(&workspace.path)
            .env_clear()
            .env("PATH", path)
            .env("HOME", &workspace.path)
            .env("LANG", "C.UTF-8")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        {
            let rlimits = *limits;
            cmd.process_group(0);
            // setrlimit is async-signal-safe, so it may run between fork and exec
            unsafe {
                cmd.pre_exec(move || apply_rlimits(&rlimits));
            }
        }

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| SandboxError::internal(format!("spawn '{}': {}", program, e)))?;
        let mut group = ProcessGroupGuard { pgid: child.id() };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SandboxError::internal("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SandboxError::internal("stderr was not captured"))?;
        let stdin = child.stdin.take();

        let input = input.as_bytes().to_vec();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                // Programs that never read stdin close it early; a broken pipe is fine
                let _ = stdin.write_all(&input).await;
                let _ = stdin.shutdown().await;
            }
        });

        let cap = limits.output_limit_bytes;
        let stdout_reader = tokio::spawn(read_capped(stdout, cap));
        let stderr_reader = tokio::spawn(read_capped(stderr, cap));

        let stop = tokio::select! {
            exited = leader_exited(&mut child) => Stop::Exited(exited),
            _ = tokio::time::sleep(limits.wall_time) => Stop::WallTimeExceeded,
            _ = cancel.cancelled() => Stop::Cancelled,
        };
        let elapsed = started.elapsed();

        // The leader is not reaped yet. Stragglers in the group would keep
        // the pipes open.
        group.kill();
        if !matches!(stop, Stop::Exited(_)) {
            let _ = child.start_kill();
        }
        writer.abort();
        let status = child.wait().await;
        group.disarm();

        let termination = match stop {
            Stop::Exited(exited) => {
                let status = exited.and(status).map_err(|e| {
                    SandboxError::internal(format!("wait for '{}': {}", program, e))
                })?;
                Termination::Exited(status)
            }
            Stop::WallTimeExceeded => Termination::WallTimeExceeded,
            Stop::Cancelled => return Err(SandboxError::Cancelled),
        };

        let (stdout, stdout_truncated) = collect_output(stdout_reader).await;
        let (stderr, stderr_truncated) = collect_output(stderr_reader).await;

        Ok(Finished {
            termination,
            stdout,
            stderr,
            truncated: stdout_truncated || stderr_truncated,
            elapsed,
        })
    }
}

async fn collect_output(reader: JoinHandle<io::Result<(Vec<u8>, bool)>>) -> (String, bool) {
    let abort = reader.abort_handle();
    match tokio::time::timeout(PIPE_GRACE, reader).await {
        Ok(Ok(Ok((bytes, truncated)))) => (String::from_utf8_lossy(&bytes).into_owned(), truncated),
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "Failed to read sandbox output");
            (String::new(), true)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "Sandbox output reader panicked");
            (String::new(), true)
        }
        Err(_) => {
            // Something outside the process group still holds the pipe
            abort.abort();
            (String::new(), true)
        }
    }
}

fn classify(finished: Finished, limits: &ResourceLimits) -> Result<ExecutionResult, SandboxError> {
    let Finished {
        termination,
        stdout,
        stderr,
        truncated,
        elapsed,
    } = finished;

    let status = match termination {
        Termination::WallTimeExceeded => {
            return Err(SandboxError::ResourceExceeded {
                resource: Resource::WallTime,
                stdout,
                stderr,
            })
        }
        Termination::Exited(status) => status,
    };

    if status.success() {
        return Ok(ExecutionResult {
            stdout,
            stderr,
            exit_code: status.code(),
            wall_time_ms: elapsed.as_millis() as u64,
            truncated,
        });
    }

    let signal = exit_signal(&status);
    let resource = signal.and_then(resource_for_signal).or_else(|| {
        (limits.memory_bytes > 0 && reports_allocation_failure(&stderr)).then_some(Resource::Memory)
    });

    match resource {
        Some(resource) => Err(SandboxError::ResourceExceeded {
            resource,
            stdout,
            stderr,
        }),
        None => Err(SandboxError::RuntimeFault {
            exit_code: status.code(),
            signal,
            stdout,
            stderr,
        }),
    }
}

#[async_trait]
impl SandboxRunner for ProcessSandbox {
    fn name(&self) -> &'static str {
        "process"
    }

    #[instrument(skip(self, source_code, input, limits, cancel), fields(language = %language))]
    async fn execute(
        &self,
        source_code: &str,
        language: Language,
        input: &str,
        limits: &ResourceLimits,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError> {
        check_input_sizes(source_code, input)?;

        let config = self
            .registry
            .get_config(language)
            .map_err(SandboxError::internal)?;

        let workspace = Workspace::create(&self.root).await?;
        workspace.write(&config.source_file, source_code).await?;

        if let Some(compile) = &config.compile {
            self.compile(&workspace, config, compile, limits, cancel).await?;
        }

        let finished = self
            .run_command(&workspace, &config.run, input, limits, cancel)
            .await?;

        debug!(
            elapsed_ms = finished.elapsed.as_millis() as u64,
            truncated = finished.truncated,
            "Process finished"
        );

        classify(finished, limits)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sandbox(root: &Path) -> ProcessSandbox {
        ProcessSandbox::new(Arc::new(LanguageRegistry::builtin()), root)
    }

    fn limits() -> ResourceLimits {
        ResourceLimits {
            cpu_time: Duration::from_secs(2),
            wall_time: Duration::from_secs(5),
            memory_bytes: 256 * 1024 * 1024,
            output_limit_bytes: 1024,
        }
    }

    fn count_entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn test_echoes_stdin() {
        let root = tempfile::tempdir().unwrap();
        let result = sandbox(root.path())
            .execute(
                "read -r line\necho \"got $line\"",
                Language::Bash,
                "hello\n",
                &limits(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.stdout, "got hello\n");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.truncated);
        assert_eq!(count_entries(root.path()), 0, "workspace must be removed");
    }

    #[tokio::test]
    async fn test_syntax_error_is_compile_error() {
        let root = tempfile::tempdir().unwrap();
        let err = sandbox(root.path())
            .execute("if then fi (", Language::Bash, "", &limits(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SandboxError::CompileError { output } => assert!(!output.is_empty()),
            other => panic!("expected compile error, got {:?}", other),
        }
        assert_eq!(count_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_runtime_fault() {
        let root = tempfile::tempdir().unwrap();
        let err = sandbox(root.path())
            .execute("echo boom >&2\nexit 3", Language::Bash, "", &limits(), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            SandboxError::RuntimeFault {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert!(stderr.contains("boom"));
            }
            other => panic!("expected runtime fault, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wall_time_limit() {
        let root = tempfile::tempdir().unwrap();
        let mut tight = limits();
        tight.wall_time = Duration::from_millis(300);

        let started = Instant::now();
        let err = sandbox(root.path())
            .execute("sleep 10", Language::Bash, "", &tight, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SandboxError::ResourceExceeded {
                resource: Resource::WallTime,
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(count_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_cpu_time_limit() {
        let root = tempfile::tempdir().unwrap();
        let mut tight = limits();
        tight.cpu_time = Duration::from_secs(1);
        tight.wall_time = Duration::from_secs(20);

        let err = sandbox(root.path())
            .execute("while :; do :; done", Language::Bash, "", &tight, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                SandboxError::ResourceExceeded {
                    resource: Resource::CpuTime,
                    ..
                }
            ),
            "got {:?}",
            err
        );
        assert_eq!(count_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_memory_limit() {
        let root = tempfile::tempdir().unwrap();
        let mut roomy = limits();
        roomy.cpu_time = Duration::from_secs(10);
        roomy.wall_time = Duration::from_secs(20);

        // 600MB into a shell variable against a 256MB cap
        let err = sandbox(root.path())
            .execute(
                "x=$(head -c 600000000 /dev/zero | tr '\\0' a)\necho ${#x}",
                Language::Bash,
                "",
                &roomy,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(
                err,
                SandboxError::ResourceExceeded {
                    resource: Resource::Memory,
                    ..
                }
            ),
            "got {:?}",
            err
        );
        assert_eq!(count_entries(root.path()), 0);
    }

    #[test]
    fn test_runtime_allocation_failure_is_memory() {
        use std::os::unix::process::ExitStatusExt;

        let finished = |stderr: &str| Finished {
            termination: Termination::Exited(ExitStatus::from_raw(1 << 8)),
            stdout: String::new(),
            stderr: stderr.to_string(),
            truncated: false,
            elapsed: Duration::from_millis(40),
        };
        let memory_error = "Traceback (most recent call last):\n  File \"main.py\", line 1, in <module>\nMemoryError\n";

        assert!(matches!(
            classify(finished(memory_error), &limits()),
            Err(SandboxError::ResourceExceeded {
                resource: Resource::Memory,
                ..
            })
        ));
        assert!(matches!(
            classify(finished("ValueError: bad input\n"), &limits()),
            Err(SandboxError::RuntimeFault {
                exit_code: Some(1),
                ..
            })
        ));

        let mut uncapped = limits();
        uncapped.memory_bytes = 0;
        assert!(matches!(
            classify(finished(memory_error), &uncapped),
            Err(SandboxError::RuntimeFault { .. })
        ));
    }

    #[tokio::test]
    async fn test_background_children_are_killed_after_exit() {
        let root = tempfile::tempdir().unwrap();

        let result = sandbox(root.path())
            .execute(
                "sleep 30 &\necho done\nexit 0",
                Language::Bash,
                "",
                &limits(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.stdout, "done\n");
        assert_eq!(result.exit_code, Some(0));
        assert!(!result.truncated, "stdout must close once the group is killed");
        assert_eq!(count_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let root = tempfile::tempdir().unwrap();
        let result = sandbox(root.path())
            .execute(
                "for i in $(seq 1 2000); do echo 0123456789; done",
                Language::Bash,
                "",
                &limits(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(result.stdout.len(), 1024);
        assert!(result.truncated);
    }

    #[tokio::test]
    async fn test_cancellation_tears_down() {
        let root = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = sandbox(root.path())
            .execute("sleep 10", Language::Bash, "", &limits(), &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, SandboxError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(count_entries(root.path()), 0);
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_internal() {
        let root = tempfile::tempdir().unwrap();
        let mut config = LanguageRegistry::builtin()
            .get_config(Language::Bash)
            .unwrap()
            .clone();
        config.compile = None;
        config.run = vec!["/nonexistent/interpreter".to_string()];
        let registry = LanguageRegistry::new(vec![config]).unwrap();

        let err = ProcessSandbox::new(Arc::new(registry), root.path())
            .execute("echo hi", Language::Bash, "", &limits(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, SandboxError::Internal(_)));
    }
}

/// Docker-based sandbox backend
///
/// **Docker Execution Rules:**
/// 1. Pulls the language image if it is not present
/// 2. Creates one container per execution:
///    - Network disabled
///    - Memory, CPU and pid limits enforced by the daemon
/// 3. Writes the source and test input into /code
/// 4. Runs the compile step (if any), then the program with input on stdin
/// 5. Captures stdout/stderr up to the output cap
/// 6. Kills the container on wall timeout or cancellation
/// 7. Force-removes the container through a drop guard, whatever happened

use super::{
    check_input_sizes, reports_allocation_failure, truncate_output, ResourceLimits, SandboxRunner,
    COMPILE_TIMEOUT,
};
use crate::error::{Resource, SandboxError};
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use codetrial_common::languages::{LanguageConfig, LanguageRegistry};
use codetrial_common::types::{ExecutionResult, Language};
use futures_util::stream::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

const CODE_DIR: &str = "/code";
const INPUT_FILE: &str = "/code/.stdin";
/// Base64 chunk written per exec; keeps each argv well under the kernel limit
const WRITE_CHUNK_BYTES: usize = 48 * 1024;
const PIDS_LIMIT: i64 = 64;

/// Container cleanup guard - guarantees container removal on drop
/// This ensures containers are cleaned up even if execution panics or is cancelled
struct ContainerGuard {
    docker: Docker,
    container_id: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        // Best-effort cleanup - cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

struct ExecOutput {
    stdout: String,
    stderr: String,
    truncated: bool,
    exit_code: Option<i64>,
}

enum ExecStop {
    Finished(Result<ExecOutput, SandboxError>),
    TimedOut,
    Cancelled,
}

/// Quote one argument for `sh -c`
fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+".contains(c))
    {
        return arg.to_string();
    }
    format!("'{}'", arg.replace('\'', r"'\''"))
}

fn shell_command(argv: &[String]) -> String {
    argv.iter().map(|a| shell_quote(a)).collect::<Vec<_>>().join(" ")
}

fn push_capped(buf: &mut String, bytes: &[u8], cap: usize, truncated: &mut bool) {
    if buf.len() >= cap {
        *truncated = true;
        return;
    }
    buf.push_str(&String::from_utf8_lossy(bytes));
    if buf.len() > cap {
        let (kept, _) = truncate_output(std::mem::take(buf), cap);
        *buf = kept;
        *truncated = true;
    }
}

/// Map a `sh` exit status to a fault; shells report death by signal N as 128 + N
fn classify_exit(code: i64, stdout: String, stderr: String) -> SandboxError {
    match code {
        137 => SandboxError::ResourceExceeded {
            resource: Resource::Memory,
            stdout,
            stderr,
        },
        152 => SandboxError::ResourceExceeded {
            resource: Resource::CpuTime,
            stdout,
            stderr,
        },
        153 => SandboxError::ResourceExceeded {
            resource: Resource::OutputSize,
            stdout,
            stderr,
        },
        // Runtimes with their own heap cap fail before the cgroup OOM killer fires
        _ if reports_allocation_failure(&stderr) => SandboxError::ResourceExceeded {
            resource: Resource::Memory,
            stdout,
            stderr,
        },
        c if c > 128 && c < 160 => SandboxError::RuntimeFault {
            exit_code: Some(c as i32),
            signal: Some((c - 128) as i32),
            stdout,
            stderr,
        },
        c => SandboxError::RuntimeFault {
            exit_code: Some(c as i32),
            signal: None,
            stdout,
            stderr,
        },
    }
}

pub struct DockerSandbox {
    docker: Docker,
    registry: Arc<LanguageRegistry>,
}

impl DockerSandbox {
    pub fn connect(registry: Arc<LanguageRegistry>) -> anyhow::Result<Self> {
        let docker = Docker::connect_with_local_defaults().context("Failed to connect to Docker daemon")?;
        Ok(Self { docker, registry })
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %image, "Image cache miss, pulling");

        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| SandboxError::internal(format!("pull {}: {}", image, e)))?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    async fn create_container(
        &self,
        config: &LanguageConfig,
        limits: &ResourceLimits,
    ) -> Result<ContainerGuard, SandboxError> {
        let keep_alive = COMPILE_TIMEOUT + limits.wall_time + Duration::from_secs(30);
        let container_name = format!("codetrial-{}", uuid::Uuid::new_v4());

        let container_config = Config {
            image: Some(config.image.clone()),
            cmd: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("sleep {}", keep_alive.as_secs()),
            ]),
            entrypoint: Some(vec![]),
            working_dir: Some(CODE_DIR.to_string()),
            network_disabled: Some(true), // SECURITY: No network access
            host_config: Some(bollard::models::HostConfig {
                memory: Some(limits.memory_bytes as i64),
                memory_swap: Some(limits.memory_bytes as i64),
                nano_cpus: Some((config.cpu_limit as f64 * 1_000_000_000.0) as i64),
                pids_limit: Some(PIDS_LIMIT),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), container_config)
            .await
            .map_err(|e| SandboxError::internal(format!("create container: {}", e)))?;

        // Guard exists before start so a failed start is still cleaned up
        let guard = ContainerGuard {
            docker: self.docker.clone(),
            container_id: container.id,
        };

        self.docker
            .start_container(&guard.container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::internal(format!("start container: {}", e)))?;

        Ok(guard)
    }

    /// Run `script` with `sh -c` inside the container and collect its output
    async fn exec(&self, container_id: &str, script: String, cap: usize) -> Result<ExecOutput, SandboxError> {
        let exec_config = CreateExecOptions {
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), script]),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            working_dir: Some(CODE_DIR.to_string()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(container_id, exec_config)
            .await
            .map_err(|e| SandboxError::internal(format!("create exec: {}", e)))?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(&exec.id, Some(start_config))
            .await
            .map_err(|e| SandboxError::internal(format!("start exec: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        let mut truncated = false;

        match started {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(LogOutput::StdOut { message }) => {
                            push_capped(&mut stdout, &message, cap, &mut truncated)
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            push_capped(&mut stderr, &message, cap, &mut truncated)
                        }
                        Ok(_) => {}
                        Err(e) => {
                            return Err(SandboxError::internal(format!("read exec output: {}", e)));
                        }
                    }
                }
            }
            StartExecResults::Detached => {
                return Err(SandboxError::internal("exec started detached"));
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| SandboxError::internal(format!("inspect exec: {}", e)))?;

        Ok(ExecOutput {
            stdout,
            stderr,
            truncated,
            exit_code: inspect.exit_code,
        })
    }

    /// Exec with a wall clock limit; the container is killed if it runs over or is cancelled
    async fn exec_bounded(
        &self,
        container_id: &str,
        script: String,
        cap: usize,
        wall_time: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<ExecOutput>, SandboxError> {
        let stop = tokio::select! {
            out = self.exec(container_id, script, cap) => ExecStop::Finished(out),
            _ = tokio::time::sleep(wall_time) => ExecStop::TimedOut,
            _ = cancel.cancelled() => ExecStop::Cancelled,
        };

        match stop {
            ExecStop::Finished(out) => out.map(Some),
            ExecStop::TimedOut => {
                self.kill(container_id).await;
                Ok(None)
            }
            ExecStop::Cancelled => {
                self.kill(container_id).await;
                Err(SandboxError::Cancelled)
            }
        }
    }

    async fn kill(&self, container_id: &str) {
        if let Err(e) = self
            .docker
            .kill_container(container_id, None::<KillContainerOptions<String>>)
            .await
        {
            warn!(container_id = %container_id, error = %e, "Failed to kill container");
        }
    }

    /// Write a file into the container in base64 chunks
    async fn write_file(&self, container_id: &str, path: &str, contents: &str) -> Result<(), SandboxError> {
        let encoded = general_purpose::STANDARD.encode(contents);
        let quoted_path = shell_quote(path);

        self.exec_checked(container_id, format!(": > {}", quoted_path)).await?;

        // Chunk boundaries are multiples of 4 so every chunk decodes on its own
        for chunk in encoded.as_bytes().chunks(WRITE_CHUNK_BYTES) {
            let chunk = String::from_utf8_lossy(chunk);
            let script = format!("printf '%s' '{}' | base64 -d >> {}", chunk, quoted_path);
            self.exec_checked(container_id, script).await?;
        }
        Ok(())
    }

    async fn exec_checked(&self, container_id: &str, script: String) -> Result<(), SandboxError> {
        let out = self.exec(container_id, script, 4096).await?;
        if out.exit_code != Some(0) {
            return Err(SandboxError::internal(format!(
                "file write failed in container: {}",
                out.stderr.trim()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxRunner for DockerSandbox {
    fn name(&self) -> &'static str {
        "docker"
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

        self.ensure_image(&config.image).await?;
        let container = self.create_container(config, limits).await?;
        let container_id = container.container_id.as_str();

        let source_path = format!("{}/{}", CODE_DIR, config.source_file);
        self.write_file(container_id, &source_path, source_code).await?;
        self.write_file(container_id, INPUT_FILE, input).await?;

        if let Some(compile) = &config.compile {
            let script = format!("{} 2>&1", shell_command(compile));
            match self
                .exec_bounded(container_id, script, limits.output_limit_bytes, COMPILE_TIMEOUT, cancel)
                .await?
            {
                Some(out) if out.exit_code == Some(0) => {}
                Some(out) => return Err(SandboxError::CompileError { output: out.stdout }),
                None => {
                    return Err(SandboxError::CompileError {
                        output: format!("Compilation timed out after {}s", COMPILE_TIMEOUT.as_secs()),
                    })
                }
            }
        }

        let cpu_secs = (limits.cpu_time.as_millis() as u64).saturating_add(999) / 1000;
        let script = format!(
            "ulimit -t {} && exec {} < {}",
            cpu_secs,
            shell_command(&config.run),
            INPUT_FILE
        );

        let start_time = Instant::now();
        let run = self
            .exec_bounded(container_id, script, limits.output_limit_bytes, limits.wall_time, cancel)
            .await?;
        let wall_time_ms = start_time.elapsed().as_millis() as u64;

        let Some(out) = run else {
            return Err(SandboxError::ResourceExceeded {
                resource: Resource::WallTime,
                stdout: String::new(),
                stderr: String::new(),
            });
        };

        match out.exit_code {
            Some(0) => Ok(ExecutionResult {
                stdout: out.stdout,
                stderr: out.stderr,
                exit_code: Some(0),
                wall_time_ms,
                truncated: out.truncated,
            }),
            Some(code) => Err(classify_exit(code, out.stdout, out.stderr)),
            None => Err(SandboxError::internal("no exit code reported for exec")),
        }
    }
}

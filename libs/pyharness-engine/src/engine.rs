/// Execution Engine - Sandboxed Program Execution
///
/// **Core Responsibility:**
/// Stage a program, run it in an isolated environment under a hard wall-clock
/// timeout, and return the raw combined output.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (Docker container, local process)
/// - Engine does NOT know about harnesses or test results
/// - A crash or timeout of the program is data, reported inline in the output
/// - Only failing to stage or start the program is an error
///
/// **Staging:**
/// Every invocation gets a fresh temporary directory and, for Docker, a
/// uniquely named container. Nothing is shared between concurrent runs.

use crate::output::OutputBuffer;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures_util::stream::StreamExt;
use pyharness_common::config::{Backend, SandboxConfig};
use pyharness_common::protocol::{
    exit_status_marker, PROGRAM_FILE, SANDBOX_MOUNT, TIMEOUT_MARKER,
};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Program plus side files, staged together into one directory
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub program: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub name: String,
    pub contents: String,
}

impl Artifact {
    /// Program with no side files (direct run)
    pub fn program(source: impl Into<String>) -> Self {
        Self {
            program: source.into(),
            attachments: Vec::new(),
        }
    }

    fn size(&self) -> usize {
        self.program.len() + self.attachments.iter().map(|a| a.contents.len()).sum::<usize>()
    }
}

/// What came back from one sandboxed run
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    /// stdout and stderr interleaved in arrival order, plus diagnostic lines
    pub combined: String,
    pub exit_code: Option<i64>,
    pub timed_out: bool,
    pub truncated: bool,
    pub elapsed: Duration,
}

/// Setup-level failures: the program never got to run
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("source is {size} bytes, limit is {limit} bytes")]
    SourceTooLarge { size: usize, limit: usize },
    #[error("unable to stage source: {source}")]
    Staging { source: io::Error },
    #[error("unable to connect to Docker daemon: {source}")]
    DockerConnect { source: bollard::errors::Error },
    #[error("unable to pull image '{image}': {source}")]
    ImagePull {
        image: String,
        source: bollard::errors::Error,
    },
    #[error("unable to create container: {source}")]
    CreateContainer { source: bollard::errors::Error },
    #[error("unable to start container: {source}")]
    StartContainer { source: bollard::errors::Error },
    #[error("unable to start interpreter '{program}': {source}")]
    Spawn { program: String, source: io::Error },
}

/// Swappable execution backend
#[async_trait]
pub trait Sandbox: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, artifact: &Artifact, timeout: Duration) -> Result<RawOutput, SandboxError>;
}

/// Build the backend selected in config
pub fn connect(config: &SandboxConfig) -> Result<Arc<dyn Sandbox>, SandboxError> {
    match config.backend {
        Backend::Docker => Ok(Arc::new(DockerEngine::new(config)?)),
        Backend::Process => {
            warn!(
                interpreter = %config.local_interpreter,
                "Process backend selected: programs run WITHOUT isolation"
            );
            Ok(Arc::new(ProcessEngine::python(config)))
        }
    }
}

#[cfg(unix)]
fn open_permissions(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn open_permissions(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

/// Write the artifact into a fresh, uniquely named directory.
///
/// The directory and files are world-readable so an unprivileged user inside
/// the container can read the read-only bind mount.
pub fn stage(artifact: &Artifact, max_source_bytes: usize) -> Result<TempDir, SandboxError> {
    let size = artifact.size();
    if size > max_source_bytes {
        return Err(SandboxError::SourceTooLarge {
            size,
            limit: max_source_bytes,
        });
    }

    let staging = || -> io::Result<TempDir> {
        let dir = tempfile::Builder::new().prefix("pyharness-").tempdir()?;
        open_permissions(dir.path(), 0o755)?;

        let files = std::iter::once((PROGRAM_FILE, artifact.program.as_str())).chain(
            artifact
                .attachments
                .iter()
                .map(|a| (a.name.as_str(), a.contents.as_str())),
        );
        for (name, contents) in files {
            let path = dir.path().join(name);
            fs::write(&path, contents)?;
            open_permissions(&path, 0o644)?;
        }
        Ok(dir)
    };

    let dir = staging().map_err(|e| SandboxError::Staging { source: e })?;
    debug!(dir = %dir.path().display(), bytes = size, "Staged artifact");
    Ok(dir)
}

fn diagnostics(timed_out: bool, exit_code: Option<i64>) -> Vec<String> {
    if timed_out {
        vec![TIMEOUT_MARKER.to_string()]
    } else {
        match exit_code {
            Some(code) if code != 0 => vec![exit_status_marker(code)],
            _ => Vec::new(),
        }
    }
}

/// Container cleanup guard - guarantees container removal on drop
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl<'a> Drop for ContainerGuard<'a> {
    fn drop(&mut self) {
        // Drop cannot be async; removal is best-effort in the background
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to clean up container");
            }
        });
    }
}

/// Docker-based engine: one disposable container per run
///
/// **Container Rules:**
/// - Staging directory bind-mounted read-only at `/sandbox`
/// - Network disabled, all capabilities dropped, no-new-privileges
/// - Read-only root filesystem with a small tmpfs at `/tmp`
/// - Runs as `nobody`, with memory/CPU/pids limits from config
/// - Removed on drop, killed first if the timeout fires
pub struct DockerEngine {
    docker: Docker,
    config: SandboxConfig,
}

impl DockerEngine {
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::DockerConnect { source: e })?;

        Ok(Self {
            docker,
            config: config.clone(),
        })
    }

    /// Pull the image if it is not cached locally
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
            result.map_err(|e| SandboxError::ImagePull {
                image: image.to_string(),
                source: e,
            })?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }

    fn container_config(&self, staging: &Path) -> Config<String> {
        let program = format!("{}/{}", SANDBOX_MOUNT, PROGRAM_FILE);

        Config {
            image: Some(self.config.image.clone()),
            cmd: Some(vec![
                self.config.interpreter.clone(),
                "-u".to_string(),
                "-B".to_string(),
                program,
            ]),
            env: Some(vec![
                "PYTHONDONTWRITEBYTECODE=1".to_string(),
                "PYTHONIOENCODING=utf-8".to_string(),
            ]),
            user: Some("65534:65534".to_string()),
            working_dir: Some("/tmp".to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(bollard::models::HostConfig {
                binds: Some(vec![format!("{}:{}:ro", staging.display(), SANDBOX_MOUNT)]),
                network_mode: Some("none".to_string()),
                memory: Some(self.config.memory_limit_bytes()),
                memory_swap: Some(self.config.memory_limit_bytes()),
                nano_cpus: Some(self.config.nano_cpus()),
                pids_limit: Some(self.config.pids_limit),
                readonly_rootfs: Some(true),
                tmpfs: Some(HashMap::from([(
                    "/tmp".to_string(),
                    "rw,noexec,size=16m".to_string(),
                )])),
                cap_drop: Some(vec!["ALL".to_string()]),
                security_opt: Some(vec!["no-new-privileges".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Follow the container's logs to EOF, then fetch its exit code
    async fn collect(&self, container_id: &str, buffer: &mut OutputBuffer) -> Option<i64> {
        let logs_options = Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            ..Default::default()
        });

        let mut logs = self.docker.logs(container_id, logs_options);
        while let Some(output) = logs.next().await {
            match output {
                Ok(LogOutput::StdOut { message }) | Ok(LogOutput::StdErr { message }) => {
                    buffer.push(&message);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(container_id = %container_id, error = %e, "Error reading container logs");
                    buffer.push(format!("\n[Log stream error: {}]\n", e).as_bytes());
                    break;
                }
            }
        }

        let wait_options = Some(WaitContainerOptions {
            condition: "not-running",
        });

        let mut wait = self.docker.wait_container(container_id, wait_options);
        match wait.next().await {
            Some(Ok(response)) => Some(response.status_code),
            // bollard reports non-zero exits as an error carrying the code
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Some(code),
            Some(Err(e)) => {
                warn!(container_id = %container_id, error = %e, "Failed to get container exit code");
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl Sandbox for DockerEngine {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn run(&self, artifact: &Artifact, timeout: Duration) -> Result<RawOutput, SandboxError> {
        let staging = stage(artifact, self.config.max_source_bytes)?;

        self.ensure_image(&self.config.image).await?;

        let container_name = format!("pyharness-{}", uuid::Uuid::new_v4());
        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), self.container_config(staging.path()))
            .await
            .map_err(|e| SandboxError::CreateContainer { source: e })?;

        let container_id = container.id.clone();
        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| SandboxError::StartContainer { source: e })?;

        debug!(container = %container_name, timeout_ms = timeout.as_millis() as u64, "Container started");

        let mut buffer = OutputBuffer::new(self.config.max_output_bytes);
        let outcome = tokio::time::timeout(timeout, self.collect(&container_id, &mut buffer)).await;

        let (exit_code, timed_out) = match outcome {
            Ok(code) => (code, false),
            Err(_) => {
                warn!(
                    container = %container_name,
                    timeout_ms = timeout.as_millis() as u64,
                    "Execution timed out, killing container"
                );
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(container = %container_name, error = %e, "Failed to kill timed-out container");
                }
                (None, true)
            }
        };

        let elapsed = start_time.elapsed();
        let truncated = buffer.truncated();

        debug!(
            container = %container_name,
            exit_code = ?exit_code,
            timed_out,
            truncated,
            elapsed_ms = elapsed.as_millis() as u64,
            "Container finished"
        );

        Ok(RawOutput {
            combined: buffer.finish(&diagnostics(timed_out, exit_code)),
            exit_code,
            timed_out,
            truncated,
            elapsed,
        })
    }
}

/// Local interpreter engine. No isolation beyond a private working directory
/// and a private process group; intended for development hosts without Docker.
pub struct ProcessEngine {
    program: String,
    args: Vec<String>,
    max_source_bytes: usize,
    max_output_bytes: usize,
}

impl ProcessEngine {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        max_source_bytes: usize,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            max_source_bytes,
            max_output_bytes,
        }
    }

    pub fn python(config: &SandboxConfig) -> Self {
        Self::new(
            config.local_interpreter.clone(),
            vec!["-u".to_string(), "-B".to_string()],
            config.max_source_bytes,
            config.max_output_bytes,
        )
    }
}

/// Read stdout and stderr as they arrive until both close, then reap the child
async fn pump(child: &mut Child, buffer: &mut OutputBuffer) -> io::Result<std::process::ExitStatus> {
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stdout not captured"))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "stderr not captured"))?;

    let mut out_chunk = [0u8; 4096];
    let mut err_chunk = [0u8; 4096];
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            read = stdout.read(&mut out_chunk), if out_open => match read? {
                0 => out_open = false,
                n => buffer.push(&out_chunk[..n]),
            },
            read = stderr.read(&mut err_chunk), if err_open => match read? {
                0 => err_open = false,
                n => buffer.push(&err_chunk[..n]),
            },
        }
    }

    child.wait().await
}

fn status_code(status: std::process::ExitStatus) -> Option<i64> {
    if let Some(code) = status.code() {
        return Some(code as i64);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(128 + signal as i64);
        }
    }
    None
}

/// SIGKILL every process left in the group led by `leader`
#[cfg(unix)]
fn kill_group(leader: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = leader else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(error = %e, pgid = pid, "Failed to kill process group"),
    }
}

#[cfg(not(unix))]
fn kill_group(_leader: Option<u32>) {}

#[async_trait]
impl Sandbox for ProcessEngine {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run(&self, artifact: &Artifact, timeout: Duration) -> Result<RawOutput, SandboxError> {
        let staging = stage(artifact, self.max_source_bytes)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(staging.path().join(PROGRAM_FILE))
            .current_dir(staging.path())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // own process group, so anything the program forks can be killed with it
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| SandboxError::Spawn {
            program: self.program.clone(),
            source: e,
        })?;
        let group = child.id();

        let start_time = Instant::now();
        let mut buffer = OutputBuffer::new(self.max_output_bytes);
        let outcome = tokio::time::timeout(timeout, pump(&mut child, &mut buffer)).await;

        let (exit_code, timed_out) = match outcome {
            Ok(Ok(status)) => (status_code(status), false),
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to read interpreter output");
                buffer.push(format!("\n[Output read error: {}]\n", e).as_bytes());
                (None, false)
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Execution timed out, killing process");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                (None, true)
            }
        };

        // background processes left behind must not outlive the run
        kill_group(group);

        let elapsed = start_time.elapsed();
        let truncated = buffer.truncated();

        Ok(RawOutput {
            combined: buffer.finish(&diagnostics(timed_out, exit_code)),
            exit_code,
            timed_out,
            truncated,
            elapsed,
        })
    }
}

//! Sandbox execution engine.
//!
//! This module provides the `SandboxEngine` trait and a Docker-based
//! implementation using the `bollard` crate. The sandbox creates isolated
//! Linux containers with strict resource limits, no host network access,
//! and a read-only root filesystem. Learner input is never interpolated
//! into a host shell string: every execution is an argument vector handed
//! to the container runtime, with optional attached stdin.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use skillforge_core::{Error, Result};

// =============================================================================
// Sandbox Types
// =============================================================================

/// Unique identifier for a sandbox container.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SandboxId(pub String);

impl std::fmt::Display for SandboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Configuration for creating a sandbox container.
///
/// The hardened defaults (no network, read-only rootfs, dropped
/// capabilities, pids cap) apply to learner sandboxes; managed service
/// containers such as the database instance opt out via
/// [`ContainerSpec::service`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Docker image to run.
    pub image: String,
    /// Maximum memory in megabytes.
    pub memory_limit_mb: u64,
    /// Fraction of a CPU core (0.5 = half a core).
    pub cpu_share: f64,
    /// Network access is opt-in per lab.
    pub allow_network: bool,
    /// Writable scratch directory mounted as tmpfs. `None` for service
    /// containers that manage their own filesystem.
    pub workdir: Option<String>,
    /// KEY=VALUE environment entries.
    pub env: Vec<String>,
    /// Process to run. `None` keeps the container idle (`sleep infinity`)
    /// so commands can be exec'd into it.
    pub cmd: Option<Vec<String>>,
    /// When false, the hardening flags (read-only rootfs, cap-drop ALL)
    /// are relaxed; used only for engine-managed service containers.
    pub hardened: bool,
}

impl ContainerSpec {
    /// A hardened learner sandbox for the given image.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            memory_limit_mb: 256,
            cpu_share: 0.5,
            allow_network: false,
            workdir: Some("/workspace".into()),
            env: Vec::new(),
            cmd: None,
            hardened: true,
        }
    }

    /// An engine-managed service container (e.g. the database instance):
    /// still network-isolated and resource-capped, but with a writable
    /// filesystem and its own entrypoint.
    pub fn service(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            memory_limit_mb: 256,
            cpu_share: 0.5,
            allow_network: false,
            workdir: None,
            env: Vec::new(),
            cmd: None,
            hardened: false,
        }
    }

    pub fn with_limits(mut self, memory_limit_mb: u64, cpu_share: f64) -> Self {
        self.memory_limit_mb = memory_limit_mb;
        self.cpu_share = cpu_share;
        self
    }

    pub fn with_network(mut self, allow_network: bool) -> Self {
        self.allow_network = allow_network;
        self
    }

    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }
}

/// A file staged into the sandbox before execution.
#[derive(Debug, Clone)]
pub struct SandboxFile {
    /// Absolute path inside the container.
    pub path: String,
    pub content: Vec<u8>,
}

impl SandboxFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Result of executing a command in the sandbox.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Exit code of the command.
    pub exit_code: i64,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Whether the command hit the wall-clock timeout.
    pub timed_out: bool,
}

impl ExecOutput {
    /// Whether the execution was successful (exit code 0, no timeout).
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out
    }

    /// stdout and stderr merged for terminal display.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

// =============================================================================
// Sandbox Engine Trait
// =============================================================================

/// Trait for sandbox execution backends.
///
/// Implementations provide isolated environments for running untrusted
/// learner input. The default implementation uses Docker containers via
/// `bollard`.
#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Create and start a new sandbox container.
    async fn create(&self, spec: &ContainerSpec) -> Result<SandboxId>;

    /// Execute an argument vector inside the sandbox, optionally feeding
    /// `stdin`. A timeout is reported in the output rather than as an
    /// error; the caller decides whether the session survives.
    async fn exec(
        &self,
        id: &SandboxId,
        argv: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput>;

    /// Write a file into the sandbox at an absolute path.
    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()>;

    /// Destroy the sandbox and release its resources. Kills anything
    /// still running inside.
    async fn destroy(&self, id: &SandboxId) -> Result<()>;

    /// Check if the sandbox backend is available (e.g. Docker daemon
    /// running).
    async fn is_available(&self) -> bool;

    /// Run a single command in a fresh, throwaway sandbox: create, stage
    /// files, execute, and tear down. Teardown runs on every path, so a
    /// timed-out or wedged child is killed with its container.
    async fn run_once(
        &self,
        spec: &ContainerSpec,
        files: &[SandboxFile],
        argv: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let id = self.create(spec).await?;

        let mut staged = Ok(());
        for file in files {
            staged = self.write_file(&id, &file.path, &file.content).await;
            if staged.is_err() {
                break;
            }
        }

        let outcome = match staged {
            Ok(()) => self.exec(&id, argv, stdin, timeout).await,
            Err(e) => Err(e),
        };

        if let Err(e) = self.destroy(&id).await {
            tracing::warn!(sandbox_id = %id, error = %e, "Failed to tear down one-shot sandbox");
        }

        outcome
    }
}

// =============================================================================
// Docker Sandbox Implementation
// =============================================================================

/// Docker-based sandbox engine using the `bollard` crate.
///
/// Creates isolated containers with:
/// - No host network access (opt-in per lab)
/// - Read-only root filesystem (writable tmpfs workdir only)
/// - Memory and CPU limits
/// - Dropped capabilities and no privilege escalation
/// - Pids and open-file caps
pub struct DockerSandbox {
    docker: bollard::Docker,
}

impl DockerSandbox {
    /// Connect to the local Docker daemon.
    pub fn new() -> Result<Self> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            Error::provisioning(format!(
                "Failed to connect to Docker daemon: {}. Is Docker running?",
                e
            ))
        })?;
        Ok(Self { docker })
    }

    /// Create from an existing bollard Docker client (for testing).
    pub fn from_client(docker: bollard::Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl SandboxEngine for DockerSandbox {
    async fn create(&self, spec: &ContainerSpec) -> Result<SandboxId> {
        use bollard::container::{Config, CreateContainerOptions};
        use bollard::models::{HostConfig, Mount, MountTypeEnum};

        let sandbox_id = format!("sf-sandbox-{}", uuid::Uuid::new_v4());
        let memory_bytes = (spec.memory_limit_mb * 1024 * 1024) as i64;
        let cpu_quota = (spec.cpu_share * 100_000.0) as i64;

        let mounts = spec.workdir.as_ref().map(|workdir| {
            // tmpfs scratch space, sized at half the memory cap
            vec![Mount {
                target: Some(workdir.clone()),
                typ: Some(MountTypeEnum::TMPFS),
                tmpfs_options: Some(bollard::models::MountTmpfsOptions {
                    size_bytes: Some(memory_bytes / 2),
                    ..Default::default()
                }),
                ..Default::default()
            }]
        });

        let host_config = HostConfig {
            memory: Some(memory_bytes),
            cpu_quota: Some(cpu_quota),
            cpu_period: Some(100_000), // standard 100ms period
            network_mode: Some(if spec.allow_network {
                "bridge".to_string()
            } else {
                "none".to_string()
            }),
            mounts,
            readonly_rootfs: Some(spec.hardened),
            cap_drop: spec.hardened.then(|| vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            // Prevent fork bombs and descriptor exhaustion
            pids_limit: Some(128),
            ulimits: Some(vec![bollard::models::ResourcesUlimits {
                name: Some("nofile".to_string()),
                soft: Some(1024),
                hard: Some(2048),
            }]),
            ..Default::default()
        };

        let cmd = spec
            .cmd
            .clone()
            .unwrap_or_else(|| vec!["sleep".to_string(), "infinity".to_string()]);

        let container_config = Config {
            image: Some(spec.image.clone()),
            working_dir: spec.workdir.clone(),
            cmd: Some(cmd),
            env: Some(spec.env.clone()),
            host_config: Some(host_config),
            labels: Some(std::collections::HashMap::from([(
                "managed-by".to_string(),
                "skillforge-sandbox".to_string(),
            )])),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: &sandbox_id,
            platform: None,
        };

        self.docker
            .create_container(Some(options), container_config)
            .await
            .map_err(|e| {
                Error::provisioning(format!("Failed to create sandbox container: {}", e))
            })?;

        self.docker
            .start_container::<String>(&sandbox_id, None)
            .await
            .map_err(|e| {
                Error::provisioning(format!("Failed to start sandbox container: {}", e))
            })?;

        tracing::info!(sandbox_id = %sandbox_id, image = %spec.image, "Sandbox container created and started");

        Ok(SandboxId(sandbox_id))
    }

    async fn exec(
        &self,
        id: &SandboxId,
        argv: &[String],
        stdin: Option<&str>,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        use bollard::exec::{CreateExecOptions, StartExecResults};

        let exec_options = CreateExecOptions {
            cmd: Some(argv.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            attach_stdin: Some(stdin.is_some()),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&id.0, exec_options)
            .await
            .map_err(|e| Error::runtime(format!("Failed to create exec in sandbox: {}", e)))?;

        let start_result = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::runtime(format!("Failed to start exec in sandbox: {}", e)))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, mut input } = start_result {
            use futures::StreamExt;
            use tokio::io::AsyncWriteExt;

            if let Some(data) = stdin {
                if let Err(e) = input.write_all(data.as_bytes()).await {
                    tracing::debug!(sandbox_id = %id, error = %e, "Sandbox stdin closed early");
                }
                let _ = input.shutdown().await;
            }
            drop(input);

            let collect_future = async {
                while let Some(msg) = output.next().await {
                    match msg {
                        Ok(bollard::container::LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(bollard::container::LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {} // ignore stdin echoes
                        Err(e) => {
                            stderr.push_str(&format!("\n[sandbox error: {}]", e));
                            break;
                        }
                    }
                }
            };

            // The wall-clock limit. Docker has no API to kill a single
            // exec, so on expiry the caller destroys the owning container,
            // which kills the child with it.
            match tokio::time::timeout(timeout, collect_future).await {
                Ok(()) => {}
                Err(_) => {
                    tracing::warn!(sandbox_id = %id, argv = ?argv, "Sandbox exec timed out");
                    return Ok(ExecOutput {
                        exit_code: -1,
                        stdout,
                        stderr,
                        timed_out: true,
                    });
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::runtime(format!("Failed to inspect exec result: {}", e)))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
            timed_out: false,
        })
    }

    async fn write_file(&self, id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        // Base64 piping keeps the payload inert; the encoded alphabet
        // cannot escape the quoting.
        let b64 = base64::engine::general_purpose::STANDARD.encode(content);
        let script = format!("echo '{}' | base64 -d > {}", b64, path);
        let argv = vec!["sh".to_string(), "-c".to_string(), script];

        let result = self.exec(id, &argv, None, Duration::from_secs(10)).await?;
        if !result.success() {
            return Err(Error::runtime(format!(
                "Failed to write file '{}' in sandbox: {}",
                path, result.stderr
            )));
        }
        Ok(())
    }

    async fn destroy(&self, id: &SandboxId) -> Result<()> {
        use bollard::container::{RemoveContainerOptions, StopContainerOptions};

        // Stop with a short grace period, then force-remove
        let _ = self
            .docker
            .stop_container(&id.0, Some(StopContainerOptions { t: 2 }))
            .await;

        self.docker
            .remove_container(
                &id.0,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| Error::runtime(format!("Failed to remove sandbox container: {}", e)))?;

        tracing::info!(sandbox_id = %id, "Sandbox container destroyed");
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.docker.ping().await.is_ok()
    }
}

// =============================================================================
// Mock Sandbox (for testing without Docker)
// =============================================================================

/// One recorded exec invocation, for asserting argv shape in tests.
#[derive(Debug, Clone)]
pub struct RecordedExec {
    pub argv: Vec<String>,
    pub stdin: Option<String>,
}

/// In-memory mock sandbox for unit testing.
#[derive(Default)]
pub struct MockSandbox {
    pub exec_responses: std::sync::Arc<tokio::sync::Mutex<Vec<ExecOutput>>>,
    pub files: std::sync::Arc<tokio::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>>,
    pub execs: std::sync::Arc<tokio::sync::Mutex<Vec<RecordedExec>>>,
    pub created: std::sync::atomic::AtomicUsize,
    pub destroyed: std::sync::atomic::AtomicUsize,
}

impl MockSandbox {
    /// Create a mock sandbox with predefined exec responses, returned in
    /// order.
    pub fn new(responses: Vec<ExecOutput>) -> Self {
        Self {
            exec_responses: std::sync::Arc::new(tokio::sync::Mutex::new(responses)),
            ..Default::default()
        }
    }

    /// Number of containers created so far.
    pub fn created_count(&self) -> usize {
        self.created.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Number of containers destroyed so far.
    pub fn destroyed_count(&self) -> usize {
        self.destroyed.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxEngine for MockSandbox {
    async fn create(&self, _spec: &ContainerSpec) -> Result<SandboxId> {
        self.created
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(SandboxId(format!("mock-sandbox-{}", uuid::Uuid::new_v4())))
    }

    async fn exec(
        &self,
        _id: &SandboxId,
        argv: &[String],
        stdin: Option<&str>,
        _timeout: Duration,
    ) -> Result<ExecOutput> {
        self.execs.lock().await.push(RecordedExec {
            argv: argv.to_vec(),
            stdin: stdin.map(String::from),
        });

        let mut responses = self.exec_responses.lock().await;
        if responses.is_empty() {
            Ok(ExecOutput {
                exit_code: 0,
                stdout: "[mock] command executed".to_string(),
                stderr: String::new(),
                timed_out: false,
            })
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn write_file(&self, _id: &SandboxId, path: &str, content: &[u8]) -> Result<()> {
        self.files
            .lock()
            .await
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn destroy(&self, _id: &SandboxId) -> Result<()> {
        self.destroyed
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn is_available(&self) -> bool {
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_spec_defaults_are_hardened() {
        let spec = ContainerSpec::new("alpine:3.19");
        assert!(spec.hardened);
        assert!(!spec.allow_network);
        assert_eq!(spec.workdir.as_deref(), Some("/workspace"));
        assert_eq!(spec.memory_limit_mb, 256);
    }

    #[test]
    fn service_spec_relaxes_hardening_but_not_network() {
        let spec = ContainerSpec::service("postgres:15-alpine");
        assert!(!spec.hardened);
        assert!(!spec.allow_network);
        assert!(spec.workdir.is_none());
    }

    #[test]
    fn exec_output_success() {
        let ok = ExecOutput {
            exit_code: 0,
            stdout: "hello".into(),
            stderr: String::new(),
            timed_out: false,
        };
        assert!(ok.success());

        let timed_out = ExecOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        };
        assert!(!timed_out.success());
    }

    #[tokio::test]
    async fn mock_sandbox_records_argv_and_stdin() {
        let mock = MockSandbox::default();
        let id = mock.create(&ContainerSpec::new("x")).await.unwrap();

        let argv = vec!["python3".to_string(), "/workspace/main.py".to_string()];
        mock.exec(&id, &argv, Some("3\n4"), Duration::from_secs(5))
            .await
            .unwrap();

        let execs = mock.execs.lock().await;
        assert_eq!(execs.len(), 1);
        assert_eq!(execs[0].argv, argv);
        assert_eq!(execs[0].stdin.as_deref(), Some("3\n4"));
    }

    #[tokio::test]
    async fn run_once_always_destroys_the_container() {
        let mock = MockSandbox::new(vec![ExecOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "boom".into(),
            timed_out: false,
        }]);

        let spec = ContainerSpec::new("x");
        let argv = vec!["false".to_string()];
        let files = [SandboxFile::new("/workspace/main.py", "print()")];

        let out = mock
            .run_once(&spec, &files, &argv, None, Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!out.success());
        assert_eq!(mock.created_count(), 1);
        assert_eq!(mock.destroyed_count(), 1);
        assert!(mock
            .files
            .lock()
            .await
            .contains_key("/workspace/main.py"));
    }
}

//! Docker container management for sandboxed execution
//!
//! Thin wrapper around the bollard client: worker creation with the full
//! resource/security envelope, exec plumbing, and file upload via the tar
//! transfer API. Pool and engine both build on this layer.

use std::collections::HashMap;

use bollard::{
    Docker, body_full,
    container::LogOutput,
    exec::{CreateExecOptions, StartExecOptions, StartExecResults},
    models::{ContainerCreateBody, HostConfig},
    query_parameters::{
        CreateContainerOptionsBuilder, InspectContainerOptions, ListContainersOptionsBuilder,
        RemoveContainerOptionsBuilder, StartContainerOptions, UploadToContainerOptionsBuilder,
    },
};
use futures::StreamExt;
use uuid::Uuid;

use crate::config::{NetworkMode, SecurityMode};
use crate::constants::{
    IMAGE_LABEL, MANAGED_LABEL, PROXY_LOG_DIR, PROXY_UID, SANDBOX_DIR, SANDBOX_UID,
};
use crate::error::{SandboxError, SandboxResult};
use crate::utils::parse_memory;

/// Embedded seccomp profile applied to strict-mode workers
pub const SECCOMP_PROFILE: &str = include_str!("../resources/seccomp-profile.json");

/// Everything needed to create one worker container
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub image: String,
    pub network: NetworkMode,
    pub security: SecurityMode,
    pub readonly_rootfs: bool,
    /// Memory limit as a size string, e.g. "512m"
    pub memory_limit: String,
    pub cpu_limit: f64,
    pub pids_limit: i64,
    pub sandbox_size: String,
    pub tmp_size: String,
}

impl WorkerSpec {
    fn network_mode_str(&self) -> &'static str {
        match self.network {
            NetworkMode::None => "none",
            NetworkMode::Host => "host",
            NetworkMode::Filtered => "bridge",
        }
    }
}

/// Output captured from a collected exec
#[derive(Debug)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Docker container manager for sandbox workers
#[derive(Clone)]
pub struct ContainerManager {
    docker: Docker,
}

impl ContainerManager {
    /// Create a new container manager
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect over the local socket and verify the daemon is reachable.
    ///
    /// An unreachable daemon is its own error kind so callers can tell a
    /// dead socket apart from a failure on an individual container call.
    pub async fn connect() -> SandboxResult<Self> {
        let docker = Docker::connect_with_socket_defaults()
            .map_err(|e| SandboxError::ContainerRuntimeUnavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| SandboxError::ContainerRuntimeUnavailable(e.to_string()))?;
        Ok(Self { docker })
    }

    pub fn docker(&self) -> &Docker {
        &self.docker
    }

    /// Create and start a worker container for a spec.
    pub async fn create_worker(&self, spec: &WorkerSpec) -> SandboxResult<String> {
        let memory_bytes = parse_memory(&spec.memory_limit)? as i64;
        let sandbox_bytes = parse_memory(&spec.sandbox_size)?;
        let tmp_bytes = parse_memory(&spec.tmp_size)?;

        let container_name = format!("isol8-{}", Uuid::new_v4());
        let options = CreateContainerOptionsBuilder::default()
            .name(&container_name)
            .build();

        let mut tmpfs = HashMap::new();
        tmpfs.insert(
            SANDBOX_DIR.to_string(),
            format!("rw,size={sandbox_bytes},uid={SANDBOX_UID},gid={SANDBOX_UID}"),
        );
        tmpfs.insert(
            "/tmp".to_string(),
            format!("rw,noexec,nosuid,size={tmp_bytes},mode=1777"),
        );
        // Writable home for the proxy's audit log even under readonly rootfs
        tmpfs.insert(
            PROXY_LOG_DIR.to_string(),
            format!("rw,size=16m,uid={PROXY_UID},gid={PROXY_UID}"),
        );

        let mut security_opt = vec!["no-new-privileges:true".to_string()];
        if spec.security == SecurityMode::Strict {
            security_opt.push(format!("seccomp={SECCOMP_PROFILE}"));
        }

        let cap_add = match spec.network {
            // The init script needs NET_ADMIN to install the egress lockdown
            NetworkMode::Filtered => Some(vec!["NET_ADMIN".to_string()]),
            _ => None,
        };

        let host_config = HostConfig {
            memory: Some(memory_bytes),
            memory_swap: Some(memory_bytes),
            cpu_period: Some(100_000),
            cpu_quota: Some((spec.cpu_limit * 100_000.0) as i64),
            pids_limit: Some(spec.pids_limit),
            network_mode: Some(spec.network_mode_str().to_string()),
            readonly_rootfs: Some(spec.readonly_rootfs),
            cap_drop: Some(vec!["ALL".to_string()]),
            cap_add,
            security_opt: Some(security_opt),
            tmpfs: Some(tmpfs),
            init: Some(true),
            ..Default::default()
        };

        let network_env = match spec.network {
            NetworkMode::None => "none",
            NetworkMode::Host => "host",
            NetworkMode::Filtered => "filtered",
        };

        let config = ContainerCreateBody {
            image: Some(spec.image.clone()),
            host_config: Some(host_config),
            working_dir: Some(SANDBOX_DIR.to_string()),
            env: Some(vec![
                "LANG=C.UTF-8".to_string(),
                format!("ISOL8_NETWORK={network_env}"),
            ]),
            labels: Some({
                let mut labels = HashMap::new();
                labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
                labels.insert(IMAGE_LABEL.to_string(), spec.image.clone());
                labels
            }),
            ..Default::default()
        };

        let container = self.docker.create_container(Some(options), config).await?;

        self.docker
            .start_container(&container.id, None::<StartContainerOptions>)
            .await?;

        tracing::debug!(
            container_id = %container.id,
            image = %spec.image,
            network = ?spec.network,
            "Created worker container"
        );

        Ok(container.id)
    }

    /// Force-remove a container.
    pub async fn remove(&self, container_id: &str) -> SandboxResult<()> {
        let options = RemoveContainerOptionsBuilder::default().force(true).build();
        self.docker
            .remove_container(container_id, Some(options))
            .await?;
        Ok(())
    }

    /// Whether a container is currently running.
    pub async fn is_running(&self, container_id: &str) -> SandboxResult<bool> {
        let inspect = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await?;
        Ok(inspect
            .state
            .and_then(|s| s.running)
            .unwrap_or(false))
    }

    /// Upload a tar archive rooted at `/` into a container.
    pub async fn upload(&self, container_id: &str, archive: Vec<u8>) -> SandboxResult<()> {
        let options = UploadToContainerOptionsBuilder::default().path("/").build();
        self.docker
            .upload_to_container(container_id, Some(options), body_full(archive.into()))
            .await?;
        Ok(())
    }

    /// Run a command in a container and collect its output.
    pub async fn exec_collect(
        &self,
        container_id: &str,
        argv: &[String],
        user: &str,
        env: &[String],
    ) -> SandboxResult<ExecOutput> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    user: Some(user.to_string()),
                    env: Some(env.to_vec()),
                    working_dir: Some(SANDBOX_DIR.to_string()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let output = self.docker.start_exec(&exec.id, None).await?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached { mut output, .. } = output {
            while let Some(msg) = output.next().await {
                match msg? {
                    LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let exit_code = self.exec_exit_code(&exec.id).await?;

        Ok(ExecOutput {
            exit_code,
            stdout,
            stderr,
        })
    }

    /// Start an attached exec and hand the raw stream to the caller.
    ///
    /// The caller drives the output stream, feeds stdin through the returned
    /// input handle, and asks for the exit code afterwards.
    pub async fn exec_attached(
        &self,
        container_id: &str,
        argv: &[String],
        user: &str,
        env: &[String],
        attach_stdin: bool,
    ) -> SandboxResult<(String, StartExecResults)> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    user: Some(user.to_string()),
                    env: Some(env.to_vec()),
                    working_dir: Some(SANDBOX_DIR.to_string()),
                    attach_stdin: Some(attach_stdin),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let results = self.docker.start_exec(&exec.id, None).await?;
        Ok((exec.id, results))
    }

    /// Start a detached exec (fire and forget).
    pub async fn exec_detached(
        &self,
        container_id: &str,
        argv: &[String],
        user: &str,
        env: &[String],
    ) -> SandboxResult<()> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    user: Some(user.to_string()),
                    env: Some(env.to_vec()),
                    ..Default::default()
                },
            )
            .await?;

        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    /// Exit code of a finished exec; -1 when the daemon reports none.
    pub async fn exec_exit_code(&self, exec_id: &str) -> SandboxResult<i32> {
        let inspect = self.docker.inspect_exec(exec_id).await?;
        Ok(inspect.exit_code.unwrap_or(-1) as i32)
    }

    /// Enumerate and force-remove every container the engine ever created,
    /// running or not. Containers are matched by the managed label.
    pub async fn remove_labeled(&self) -> SandboxResult<usize> {
        let mut filters = HashMap::new();
        filters.insert(
            "label".to_string(),
            vec![format!("{MANAGED_LABEL}=true")],
        );
        let options = ListContainersOptionsBuilder::default()
            .all(true)
            .filters(&filters)
            .build();

        let containers = self.docker.list_containers(Some(options)).await?;
        let mut removed = 0;
        for container in containers {
            let Some(id) = container.id else { continue };
            match self.remove(&id).await {
                Ok(()) => removed += 1,
                Err(e) => {
                    tracing::warn!(container_id = %id, error = %e, "Failed to remove labeled container");
                }
            }
        }
        Ok(removed)
    }

    /// SIGKILL every process belonging to `user` inside the container.
    ///
    /// Container PID 1 (the init process) is root-owned and therefore
    /// untouched. Exits zero even when the user has no processes.
    pub async fn kill_user_processes(&self, container_id: &str, user: &str) -> SandboxResult<()> {
        let script = format!(
            "pids=$(ps -o pid= -u {user} 2>/dev/null); [ -n \"$pids\" ] && kill -9 $pids 2>/dev/null; true"
        );
        let argv = vec!["sh".to_string(), "-c".to_string(), script];
        let out = self.exec_collect(container_id, &argv, "root", &[]).await?;
        if out.exit_code != 0 {
            return Err(SandboxError::CleanupFailed(format!(
                "kill processes of {user}: exit {}",
                out.exit_code
            )));
        }
        Ok(())
    }
}

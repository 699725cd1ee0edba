//! Sandbox execution engine
//!
//! Compiles an `ExecutionRequest` into a concrete worker + command +
//! filesystem + network configuration, runs it with bounded output and a
//! wall-clock timeout, and scrubs residual state between executions via the
//! pool's cleanup protocol.
//!
//! Per-call pipeline: admission, resolve, worker acquire, file injection,
//! package install, network configuration, run, finalize, release. Release
//! is best-effort and runs on every path, including caller cancellation
//! (futures dropped mid-pipeline hand their worker to a detached task that
//! kills leftover processes before returning it).

pub mod admission;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use bollard::container::LogOutput;
use bollard::exec::StartExecResults;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tokio::time::Duration;

use crate::archive;
use crate::config::{EngineMode, EngineOptions, NetworkFilter, NetworkMode};
use crate::constants::{
    EXIT_CODE_KILLED, PROXY_BINARY_PATH, PROXY_LOG_PATH, PROXY_PORT, PROXY_USER, SANDBOX_USER,
    TIMEOUT_MARKER,
};
use crate::container::{ContainerManager, WorkerSpec};
use crate::error::{SandboxError, SandboxResult};
use crate::models::{ExecutionRequest, ExecutionResult, NetworkLogEntry, StreamEvent};
use crate::pool::{ContainerPool, PoolStats, PooledWorker};
use crate::proxy::{FilterPolicy, parse_log};
use crate::runtime::RuntimeAdapter;
use crate::utils::{OutputBuffer, mask_secrets, parse_memory};

use admission::Admission;

/// The execution contract shared by the local engine and the remote client.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a request to completion and collect its result.
    async fn execute(&self, req: ExecutionRequest) -> SandboxResult<ExecutionResult>;

    /// Run a request, streaming output as it is produced.
    ///
    /// The stream always ends with an `Exit` event; the concatenated chunk
    /// data equals the collected result's stdout/stderr modulo truncation.
    async fn execute_stream(
        &self,
        req: ExecutionRequest,
    ) -> SandboxResult<mpsc::Receiver<StreamEvent>>;
}

/// A request resolved against the engine's configuration
struct ResolvedCall {
    adapter: RuntimeAdapter,
    spec: WorkerSpec,
    network: NetworkMode,
    filter: NetworkFilter,
    /// Container-level overrides force a one-off worker outside the pool
    dedicated: bool,
}

/// Sandbox execution engine
#[derive(Clone)]
pub struct Engine {
    manager: ContainerManager,
    options: EngineOptions,
    pool: Arc<ContainerPool>,
    admission: Admission,
    /// Persistent-mode worker; the mutex also serializes its executions
    persistent: Arc<Mutex<Option<PooledWorker>>>,
    stopped: Arc<AtomicBool>,
}

impl Engine {
    /// Connect to the container runtime and build an engine.
    pub async fn new(options: EngineOptions) -> SandboxResult<Self> {
        let manager = ContainerManager::connect().await?;
        Ok(Self::with_manager(manager, options))
    }

    /// Build an engine over an existing container manager.
    pub fn with_manager(manager: ContainerManager, options: EngineOptions) -> Self {
        let pool = ContainerPool::new(
            manager.clone(),
            options.pool_strategy,
            options.pool_size,
        );
        let admission = Admission::new(options.max_concurrent);
        Self {
            manager,
            options,
            pool: Arc::new(pool),
            admission,
            persistent: Arc::new(Mutex::new(None)),
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Aggregate pool counters.
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }

    /// Drain the engine: refuse new work, destroy every worker.
    ///
    /// Idempotent; safe to call from a SIGTERM handler.
    pub async fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.admission.close();
        self.pool.drain().await;
        if let Some(worker) = self.persistent.lock().await.take() {
            if let Err(e) = self.manager.remove(&worker.container_id).await {
                tracing::warn!(
                    container_id = %worker.container_id,
                    error = %e,
                    "Failed to remove persistent worker"
                );
            }
        }
        tracing::info!("Engine stopped");
    }

    /// Overlay engine defaults with per-request overrides and validate.
    fn resolve(&self, req: &ExecutionRequest) -> SandboxResult<ResolvedCall> {
        req.validate()?;
        let adapter = RuntimeAdapter::get(&req.runtime)?;

        if !req.install_packages.is_empty() && adapter.install_command(&req.install_packages).is_none()
        {
            return Err(SandboxError::BadRequest(format!(
                "runtime {} does not support package installation",
                adapter.name()
            )));
        }

        let mut network = req.network.unwrap_or(self.options.network);
        let mut filter = req
            .network_filter
            .clone()
            .unwrap_or_else(|| self.options.network_filter.clone());

        // Installs need egress: a request that left the network at the
        // default `none` is promoted to filtered with the runtime's package
        // registries whitelisted. An explicit per-request `none` is honored.
        if !req.install_packages.is_empty() && req.network.is_none() && network == NetworkMode::None
        {
            network = NetworkMode::Filtered;
            filter
                .whitelist
                .extend(adapter.registry_patterns().iter().cloned());
        }

        // Surface malformed patterns and size strings before any container
        // work happens.
        FilterPolicy::compile(&filter)?;
        let memory_limit = req
            .memory_limit
            .clone()
            .unwrap_or_else(|| self.options.memory_limit.clone());
        let sandbox_size = req
            .sandbox_size
            .clone()
            .unwrap_or_else(|| self.options.sandbox_size.clone());
        let tmp_size = req
            .tmp_size
            .clone()
            .unwrap_or_else(|| self.options.tmp_size.clone());
        parse_memory(&memory_limit)?;
        parse_memory(&sandbox_size)?;
        parse_memory(&tmp_size)?;

        let dedicated = req.memory_limit.is_some()
            || req.cpu_limit.is_some()
            || req.pids_limit.is_some()
            || req.sandbox_size.is_some()
            || req.tmp_size.is_some();

        let spec = WorkerSpec {
            image: adapter.image().to_string(),
            network,
            security: self.options.security,
            readonly_rootfs: self.options.readonly_rootfs,
            memory_limit,
            cpu_limit: req.cpu_limit.unwrap_or(self.options.cpu_limit),
            pids_limit: req.pids_limit.unwrap_or(self.options.pids_limit),
            sandbox_size,
            tmp_size,
        };

        Ok(ResolvedCall {
            adapter,
            spec,
            network,
            filter,
            dedicated,
        })
    }

    async fn execute_inner(
        &self,
        req: &ExecutionRequest,
        sink: Option<&mpsc::Sender<StreamEvent>>,
    ) -> SandboxResult<ExecutionResult> {
        let _permit = self.admission.acquire().await?;
        if self.stopped.load(Ordering::SeqCst) {
            return Err(SandboxError::EngineStopped);
        }
        let resolved = self.resolve(req)?;

        match self.options.mode {
            EngineMode::Persistent => {
                let mut slot = self.persistent.lock().await;
                if slot.is_none() {
                    let container_id = self.manager.create_worker(&resolved.spec).await?;
                    *slot = Some(PooledWorker::new(container_id, &resolved.spec));
                }
                let container_id = slot.as_ref().expect("persistent worker").container_id.clone();

                let guard = WorkerGuard::persistent(
                    self.manager.clone(),
                    Arc::clone(&self.pool),
                    container_id.clone(),
                );
                let result = self.run_on_worker(req, &resolved, &container_id, sink).await;
                guard.release().await;
                result
            }
            EngineMode::Ephemeral => {
                let (worker, dedicated) = if resolved.dedicated {
                    let container_id = self.manager.create_worker(&resolved.spec).await?;
                    (PooledWorker::new(container_id, &resolved.spec), true)
                } else {
                    (self.pool.acquire(&resolved.spec).await?, false)
                };
                let container_id = worker.container_id.clone();

                let guard = WorkerGuard::new(
                    self.manager.clone(),
                    Arc::clone(&self.pool),
                    worker,
                    dedicated,
                );
                let result = self.run_on_worker(req, &resolved, &container_id, sink).await;
                guard.release().await;
                result
            }
        }
    }

    /// Steps 4-9 of the pipeline: everything that happens on one worker.
    async fn run_on_worker(
        &self,
        req: &ExecutionRequest,
        resolved: &ResolvedCall,
        container_id: &str,
        sink: Option<&mpsc::Sender<StreamEvent>>,
    ) -> SandboxResult<ExecutionResult> {
        // Inject files plus the main program
        let main_path = resolved.adapter.main_file();
        let mut entries: Vec<(String, Vec<u8>)> = req
            .files
            .iter()
            .map(|(path, bytes)| (path.clone(), bytes.clone()))
            .collect();
        entries.push((main_path.clone(), req.code.clone().into_bytes()));
        let tar = archive::pack_many(&entries)?;
        self.manager.upload(container_id, tar).await?;

        // Network configuration
        let proxy_env = match resolved.network {
            NetworkMode::Filtered => {
                self.configure_filtered_network(container_id, &resolved.filter)
                    .await?
            }
            NetworkMode::None | NetworkMode::Host => Vec::new(),
        };

        // Package install under its own timeout
        if !req.install_packages.is_empty() {
            self.install_packages(req, resolved, container_id, &proxy_env)
                .await?;
        }

        // Run
        let mut env = proxy_env;
        env.extend(req.env.iter().map(|(k, v)| format!("{k}={v}")));
        env.extend(req.secrets.iter().map(|(k, v)| format!("{k}={v}")));

        let argv = resolved.adapter.command(&main_path);
        let started = Instant::now();
        let (exec_id, results) = self
            .manager
            .exec_attached(container_id, &argv, SANDBOX_USER, &env, req.stdin.is_some())
            .await?;

        let StartExecResults::Attached {
            mut output,
            mut input,
        } = results
        else {
            return Err(SandboxError::Docker("exec did not attach".to_string()));
        };

        if let Some(stdin) = &req.stdin {
            input
                .write_all(stdin)
                .await
                .map_err(|e| SandboxError::Docker(format!("write stdin: {e}")))?;
        }
        input.shutdown().await.ok();
        drop(input);

        let mut stdout_buf = OutputBuffer::new(self.options.max_output_bytes);
        let mut stderr_buf = OutputBuffer::new(self.options.max_output_bytes);
        let mut timed_out = false;

        let timeout = tokio::time::sleep(Duration::from_millis(req.timeout_ms));
        tokio::pin!(timeout);

        loop {
            tokio::select! {
                msg = output.next() => match msg {
                    Some(Ok(LogOutput::StdOut { message })) => {
                        stdout_buf.push(&message);
                        emit(sink, req, true, &message).await;
                    }
                    Some(Ok(LogOutput::StdErr { message })) => {
                        stderr_buf.push(&message);
                        emit(sink, req, false, &message).await;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                    None => break,
                },
                _ = &mut timeout => {
                    timed_out = true;
                    if let Err(e) = self
                        .manager
                        .kill_user_processes(container_id, SANDBOX_USER)
                        .await
                    {
                        tracing::warn!(container_id = %container_id, error = %e, "Timeout kill failed");
                    }
                    break;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let exit_code = if timed_out {
            EXIT_CODE_KILLED
        } else {
            self.manager.exec_exit_code(&exec_id).await?
        };

        // Finalize: mask secrets, surface the timeout, collect network logs
        let truncated = stdout_buf.truncated() || stderr_buf.truncated();
        let stdout = mask_secrets(&stdout_buf.into_string(), &req.secrets);
        let mut stderr = mask_secrets(&stderr_buf.into_string(), &req.secrets);

        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(TIMEOUT_MARKER);
            if let Some(tx) = sink {
                let _ = tx
                    .send(StreamEvent::Stderr(format!("{TIMEOUT_MARKER}\n")))
                    .await;
            }
        }

        let network_logs = if resolved.network == NetworkMode::Filtered && self.options.log_network
        {
            Some(self.collect_network_logs(container_id).await?)
        } else {
            None
        };

        if let Some(tx) = sink {
            let _ = tx.send(StreamEvent::Exit(exit_code)).await;
        }

        tracing::info!(
            container_id = %container_id,
            runtime = %resolved.adapter.name(),
            exit_code,
            duration_ms,
            timed_out,
            "Execution finished"
        );

        Ok(ExecutionResult {
            exit_code,
            stdout,
            stderr,
            duration_ms,
            network_logs,
            truncated,
        })
    }

    /// Install packages with the install-specific timeout; a failure aborts
    /// the pipeline before the user program runs.
    async fn install_packages(
        &self,
        req: &ExecutionRequest,
        resolved: &ResolvedCall,
        container_id: &str,
        proxy_env: &[String],
    ) -> SandboxResult<()> {
        let argv = resolved
            .adapter
            .install_command(&req.install_packages)
            .expect("checked during resolve");

        let install = self
            .manager
            .exec_collect(container_id, &argv, SANDBOX_USER, proxy_env);
        let timeout = Duration::from_millis(self.options.install_timeout_ms);

        match tokio::time::timeout(timeout, install).await {
            Ok(Ok(out)) if out.exit_code == 0 => Ok(()),
            Ok(Ok(out)) => Err(SandboxError::PackageInstallFailed {
                exit_code: out.exit_code,
                stderr: out.stderr,
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                if let Err(e) = self
                    .manager
                    .kill_user_processes(container_id, SANDBOX_USER)
                    .await
                {
                    tracing::warn!(container_id = %container_id, error = %e, "Install kill failed");
                }
                Err(SandboxError::PackageInstallFailed {
                    exit_code: EXIT_CODE_KILLED,
                    stderr: "package install timed out".to_string(),
                })
            }
        }
    }

    /// Restart the in-container proxy with this request's policy and return
    /// the proxy environment for subsequent execs.
    async fn configure_filtered_network(
        &self,
        container_id: &str,
        filter: &NetworkFilter,
    ) -> SandboxResult<Vec<String>> {
        // A previous execution's proxy may be running with a different
        // policy; its log must not leak either.
        self.manager
            .kill_user_processes(container_id, PROXY_USER)
            .await?;
        let clear = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("rm -f {PROXY_LOG_PATH}"),
        ];
        self.manager
            .exec_collect(container_id, &clear, "root", &[])
            .await?;

        let whitelist = serde_json::to_string(&filter.whitelist)
            .map_err(|e| SandboxError::Internal(e.into()))?;
        let blacklist = serde_json::to_string(&filter.blacklist)
            .map_err(|e| SandboxError::Internal(e.into()))?;
        let proxy_env = vec![
            format!("ISOL8_PROXY_PORT={PROXY_PORT}"),
            format!("ISOL8_PROXY_WHITELIST={whitelist}"),
            format!("ISOL8_PROXY_BLACKLIST={blacklist}"),
            format!("ISOL8_PROXY_LOG={PROXY_LOG_PATH}"),
        ];
        self.manager
            .exec_detached(
                container_id,
                &[PROXY_BINARY_PATH.to_string()],
                PROXY_USER,
                &proxy_env,
            )
            .await?;

        // Wait for the listener before anything tries to use it
        let probe = vec![
            "bash".to_string(),
            "-c".to_string(),
            format!("exec 3<>/dev/tcp/127.0.0.1/{PROXY_PORT}"),
        ];
        let mut ready = false;
        for _ in 0..40 {
            let out = self
                .manager
                .exec_collect(container_id, &probe, "root", &[])
                .await?;
            if out.exit_code == 0 {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !ready {
            return Err(SandboxError::Docker(
                "filtering proxy did not start".to_string(),
            ));
        }

        // Both spellings: tools disagree on which they honor
        Ok(vec![
            format!("HTTP_PROXY=http://127.0.0.1:{PROXY_PORT}"),
            format!("HTTPS_PROXY=http://127.0.0.1:{PROXY_PORT}"),
            format!("http_proxy=http://127.0.0.1:{PROXY_PORT}"),
            format!("https_proxy=http://127.0.0.1:{PROXY_PORT}"),
            "NO_PROXY=localhost,127.0.0.1".to_string(),
            "no_proxy=localhost,127.0.0.1".to_string(),
        ])
    }

    /// Read the audit log back and clear it for the next execution.
    async fn collect_network_logs(
        &self,
        container_id: &str,
    ) -> SandboxResult<Vec<NetworkLogEntry>> {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("cat {PROXY_LOG_PATH} 2>/dev/null; : > {PROXY_LOG_PATH} 2>/dev/null; true"),
        ];
        let out = self
            .manager
            .exec_collect(container_id, &argv, PROXY_USER, &[])
            .await?;
        Ok(parse_log(&out.stdout))
    }
}

/// Send one masked chunk into the stream sink, if any.
async fn emit(
    sink: Option<&mpsc::Sender<StreamEvent>>,
    req: &ExecutionRequest,
    is_stdout: bool,
    message: &[u8],
) {
    let Some(tx) = sink else { return };
    let text = mask_secrets(&String::from_utf8_lossy(message), &req.secrets);
    let event = if is_stdout {
        StreamEvent::Stdout(text)
    } else {
        StreamEvent::Stderr(text)
    };
    let _ = tx.send(event).await;
}

#[async_trait]
impl Executor for Engine {
    async fn execute(&self, req: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        self.execute_inner(&req, None).await
    }

    async fn execute_stream(
        &self,
        req: ExecutionRequest,
    ) -> SandboxResult<mpsc::Receiver<StreamEvent>> {
        // Fail fast on malformed requests; later failures surface in-band
        // as a stderr chunk followed by a non-zero exit event.
        req.validate()?;
        RuntimeAdapter::get(&req.runtime)?;

        let (tx, rx) = mpsc::channel(256);
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.execute_inner(&req, Some(&tx)).await {
                let _ = tx.send(StreamEvent::Stderr(format!("{e}\n"))).await;
                let _ = tx.send(StreamEvent::Exit(1)).await;
            }
        });
        Ok(rx)
    }
}

/// Ensures a held worker always goes back where it belongs.
///
/// The happy path calls `release`; if the execution future is dropped
/// mid-pipeline the `Drop` impl hands the worker to a detached task that
/// kills leftover sandbox processes first.
struct WorkerGuard {
    manager: ContainerManager,
    pool: Arc<ContainerPool>,
    held: Option<HeldWorker>,
}

enum HeldWorker {
    Pooled(PooledWorker),
    Dedicated(PooledWorker),
    Persistent(String),
}

impl WorkerGuard {
    fn new(
        manager: ContainerManager,
        pool: Arc<ContainerPool>,
        worker: PooledWorker,
        dedicated: bool,
    ) -> Self {
        let held = if dedicated {
            HeldWorker::Dedicated(worker)
        } else {
            HeldWorker::Pooled(worker)
        };
        Self {
            manager,
            pool,
            held: Some(held),
        }
    }

    fn persistent(manager: ContainerManager, pool: Arc<ContainerPool>, container_id: String) -> Self {
        Self {
            manager,
            pool,
            held: Some(HeldWorker::Persistent(container_id)),
        }
    }

    async fn release(mut self) {
        match self.held.take() {
            Some(HeldWorker::Pooled(worker)) => self.pool.release(worker).await,
            Some(HeldWorker::Dedicated(worker)) => {
                if let Err(e) = self.manager.remove(&worker.container_id).await {
                    tracing::warn!(
                        container_id = %worker.container_id,
                        error = %e,
                        "Failed to remove dedicated worker"
                    );
                }
            }
            // The persistent worker stays with the engine
            Some(HeldWorker::Persistent(_)) | None => {}
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let Some(held) = self.held.take() else { return };
        let manager = self.manager.clone();
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            match held {
                HeldWorker::Pooled(worker) => {
                    let _ = manager
                        .kill_user_processes(&worker.container_id, SANDBOX_USER)
                        .await;
                    pool.release(worker).await;
                }
                HeldWorker::Dedicated(worker) => {
                    let _ = manager.remove(&worker.container_id).await;
                }
                HeldWorker::Persistent(container_id) => {
                    let _ = manager
                        .kill_user_processes(&container_id, SANDBOX_USER)
                        .await;
                }
            }
        });
    }
}

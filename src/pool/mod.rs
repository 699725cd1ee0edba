//! Warm pool of reusable worker containers
//!
//! Idle workers are cached by `(image, network, security)` so repeat
//! executions skip container creation. Two strategies:
//!
//! * `fast` keeps a *clean* sub-pool (ready immediately) and a *dirty*
//!   sub-pool (released, not yet scrubbed); a background promoter lazily
//!   moves dirty workers to clean.
//! * `secure` keeps a single sub-pool and runs the cleanup protocol before
//!   every acquire returns, so the caller never races prior residues.
//!
//! All acquire/release/drain work for one key happens under that key's
//! mutex; different keys proceed in parallel.

pub mod worker;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::time::{Duration, interval};
use uuid::Uuid;

use crate::config::{PoolSizes, PoolStrategy, SecurityMode};
use crate::constants::{DRAIN_GRACE_MS, POOL_PROMOTE_INTERVAL_MS, SANDBOX_USER};
use crate::container::{ContainerManager, WorkerSpec};
use crate::error::{SandboxError, SandboxResult};

pub use worker::{PoolKey, PooledWorker, WorkerState};

/// Per-key worker queues
#[derive(Default)]
struct KeyPool {
    clean: VecDeque<PooledWorker>,
    dirty: VecDeque<PooledWorker>,
    /// Workers currently held by executions: worker id -> container id
    outstanding: HashMap<Uuid, String>,
}

/// Aggregate pool counters
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    pub clean: usize,
    pub dirty: usize,
    pub in_use: usize,
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool: {} clean, {} dirty, {} in use",
            self.clean, self.dirty, self.in_use
        )
    }
}

struct PoolInner {
    manager: ContainerManager,
    strategy: PoolStrategy,
    sizes: PoolSizes,
    stopped: AtomicBool,
    pools: Mutex<HashMap<PoolKey, Arc<Mutex<KeyPool>>>>,
}

/// Warm container pool
pub struct ContainerPool {
    inner: Arc<PoolInner>,
    promoter: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ContainerPool {
    /// Create a pool; the fast strategy spawns its background promoter.
    pub fn new(manager: ContainerManager, strategy: PoolStrategy, sizes: PoolSizes) -> Self {
        let inner = Arc::new(PoolInner {
            manager,
            strategy,
            sizes,
            stopped: AtomicBool::new(false),
            pools: Mutex::new(HashMap::new()),
        });

        let promoter = match strategy {
            PoolStrategy::Fast => Some(tokio::spawn(Self::promote_loop(Arc::clone(&inner)))),
            PoolStrategy::Secure => None,
        };

        Self {
            inner,
            promoter: std::sync::Mutex::new(promoter),
        }
    }

    /// Acquire a worker for the spec's key, creating one on a pool miss.
    ///
    /// Fast strategy prefers the clean sub-pool and scrubs a dirty worker
    /// synchronously on a clean miss; secure always scrubs before returning.
    pub async fn acquire(&self, spec: &WorkerSpec) -> SandboxResult<PooledWorker> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(SandboxError::EngineStopped);
        }

        let key = PoolKey::for_spec(spec);
        let key_pool = self.key_pool(&key).await;
        let mut pool = key_pool.lock().await;

        // Re-check under the key lock: a drain that started while we were
        // waiting must win deterministically.
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(SandboxError::EngineStopped);
        }

        let mut worker = match self.inner.strategy {
            PoolStrategy::Fast => {
                if let Some(w) = self.pop_live(&mut pool.clean).await {
                    Some(w)
                } else if let Some(w) = self.pop_live(&mut pool.dirty).await {
                    self.cleanup_or_discard(w).await
                } else {
                    None
                }
            }
            PoolStrategy::Secure => match self.pop_live(&mut pool.clean).await {
                Some(w) => self.cleanup_or_discard(w).await,
                None => None,
            },
        };

        if worker.is_none() {
            let container_id = self.inner.manager.create_worker(spec).await?;
            worker = Some(PooledWorker::new(container_id, spec));
        }

        let mut worker = worker.expect("worker resolved above");
        worker.state = WorkerState::InUse;
        pool.outstanding
            .insert(worker.id, worker.container_id.clone());

        tracing::debug!(
            container_id = %worker.container_id,
            image = %worker.image,
            in_use = pool.outstanding.len(),
            "Acquired worker"
        );

        Ok(worker)
    }

    /// Return a worker to its pool.
    ///
    /// Best-effort by contract: failures downgrade to destruction and a log
    /// line, never an error to the caller.
    pub async fn release(&self, mut worker: PooledWorker) {
        let key = worker.key();
        let key_pool = self.key_pool(&key).await;
        let mut pool = key_pool.lock().await;
        pool.outstanding.remove(&worker.id);

        if self.inner.stopped.load(Ordering::SeqCst) {
            drop(pool);
            self.destroy(&worker).await;
            return;
        }

        worker.state = WorkerState::Idle;
        match self.inner.strategy {
            PoolStrategy::Fast => {
                if pool.dirty.len() < self.inner.sizes.dirty {
                    pool.dirty.push_back(worker);
                } else {
                    drop(pool);
                    self.destroy(&worker).await;
                }
            }
            PoolStrategy::Secure => {
                if pool.clean.len() < self.inner.sizes.clean {
                    pool.clean.push_back(worker);
                } else {
                    drop(pool);
                    self.destroy(&worker).await;
                }
            }
        }
    }

    /// Destroy every worker and refuse further acquires.
    ///
    /// Waits up to the grace window for outstanding workers to be released,
    /// then force-removes whatever is left.
    pub async fn drain(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);

        if let Some(handle) = self.promoter.lock().expect("promoter lock").take() {
            handle.abort();
        }

        let key_pools: Vec<Arc<Mutex<KeyPool>>> = {
            let pools = self.inner.pools.lock().await;
            pools.values().cloned().collect()
        };

        let deadline = tokio::time::Instant::now() + Duration::from_millis(DRAIN_GRACE_MS);
        for key_pool in key_pools {
            loop {
                let outstanding = key_pool.lock().await.outstanding.len();
                if outstanding == 0 || tokio::time::Instant::now() >= deadline {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }

            let (mut idle, outstanding) = {
                let mut pool = key_pool.lock().await;
                let mut idle: Vec<PooledWorker> = pool.clean.drain(..).collect();
                idle.extend(pool.dirty.drain(..));
                let outstanding: Vec<String> =
                    pool.outstanding.drain().map(|(_, id)| id).collect();
                (idle, outstanding)
            };

            for worker in &mut idle {
                worker.state = WorkerState::Draining;
                self.destroy(worker).await;
            }
            for container_id in outstanding {
                tracing::warn!(container_id = %container_id, "Force-removing in-use worker on drain");
                if let Err(e) = self.inner.manager.remove(&container_id).await {
                    tracing::warn!(container_id = %container_id, error = %e, "Failed to remove worker");
                }
            }
        }
    }

    /// Snapshot of aggregate pool counters.
    pub async fn stats(&self) -> PoolStats {
        let key_pools: Vec<Arc<Mutex<KeyPool>>> = {
            let pools = self.inner.pools.lock().await;
            pools.values().cloned().collect()
        };

        let mut stats = PoolStats::default();
        for key_pool in key_pools {
            let pool = key_pool.lock().await;
            stats.clean += pool.clean.len();
            stats.dirty += pool.dirty.len();
            stats.in_use += pool.outstanding.len();
        }
        stats
    }

    async fn key_pool(&self, key: &PoolKey) -> Arc<Mutex<KeyPool>> {
        let mut pools = self.inner.pools.lock().await;
        pools
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(KeyPool::default())))
            .clone()
    }

    /// Pop workers until one passes the liveness inspect; discard the dead.
    async fn pop_live(&self, queue: &mut VecDeque<PooledWorker>) -> Option<PooledWorker> {
        while let Some(mut worker) = queue.pop_front() {
            match self.inner.manager.is_running(&worker.container_id).await {
                Ok(true) => return Some(worker),
                Ok(false) => {
                    worker.state = WorkerState::Dead;
                    tracing::warn!(container_id = %worker.container_id, "Discarding dead worker");
                    self.destroy(&worker).await;
                }
                Err(e) => {
                    worker.state = WorkerState::Dead;
                    tracing::warn!(
                        container_id = %worker.container_id,
                        error = %e,
                        "Inspect failed; discarding worker"
                    );
                    self.destroy(&worker).await;
                }
            }
        }
        None
    }

    /// Scrub a worker; on failure destroy it and report a miss.
    async fn cleanup_or_discard(&self, worker: PooledWorker) -> Option<PooledWorker> {
        match scrub_worker(&self.inner.manager, &worker).await {
            Ok(()) => Some(worker),
            Err(e) => {
                tracing::warn!(
                    container_id = %worker.container_id,
                    error = %e,
                    "Cleanup failed; destroying worker"
                );
                self.destroy(&worker).await;
                None
            }
        }
    }

    async fn destroy(&self, worker: &PooledWorker) {
        if let Err(e) = self.inner.manager.remove(&worker.container_id).await {
            tracing::warn!(
                container_id = %worker.container_id,
                error = %e,
                "Failed to remove worker container"
            );
        }
    }

    /// Background dirty-to-clean promotion for the fast strategy.
    async fn promote_loop(inner: Arc<PoolInner>) {
        let mut ticker = interval(Duration::from_millis(POOL_PROMOTE_INTERVAL_MS));
        loop {
            ticker.tick().await;
            if inner.stopped.load(Ordering::SeqCst) {
                return;
            }

            let key_pools: Vec<Arc<Mutex<KeyPool>>> = {
                let pools = inner.pools.lock().await;
                pools.values().cloned().collect()
            };

            for key_pool in key_pools {
                let mut pool = key_pool.lock().await;
                if pool.clean.len() >= inner.sizes.clean {
                    continue;
                }
                let Some(worker) = pool.dirty.pop_front() else {
                    continue;
                };

                match scrub_worker(&inner.manager, &worker).await {
                    Ok(()) => pool.clean.push_back(worker),
                    Err(e) => {
                        tracing::warn!(
                            container_id = %worker.container_id,
                            error = %e,
                            "Promotion cleanup failed; destroying worker"
                        );
                        if let Err(e) = inner.manager.remove(&worker.container_id).await {
                            tracing::warn!(container_id = %worker.container_id, error = %e, "Remove failed");
                        }
                    }
                }
            }
        }
    }
}

/// The cleanup protocol.
///
/// 1. SIGKILL every sandbox-user process (container PID 1 is root's init and
///    survives).
/// 2. Empty /sandbox while keeping the directory.
///
/// Exec env is per-call, so there are no session variables to reset; the
/// /tmp tmpfs persists for the container's lifetime by contract. Unconfined
/// workers skip the exec entirely.
async fn scrub_worker(manager: &ContainerManager, worker: &PooledWorker) -> SandboxResult<()> {
    if worker.security == SecurityMode::Unconfined {
        return Ok(());
    }

    manager
        .kill_user_processes(&worker.container_id, SANDBOX_USER)
        .await?;

    let argv = vec![
        "sh".to_string(),
        "-c".to_string(),
        "find /sandbox -mindepth 1 -delete".to_string(),
    ];
    let out = manager
        .exec_collect(&worker.container_id, &argv, "root", &[])
        .await?;
    if out.exit_code != 0 {
        return Err(SandboxError::CleanupFailed(format!(
            "wipe /sandbox: exit {} ({})",
            out.exit_code,
            out.stderr.trim()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkMode;
    use bollard::Docker;

    fn test_pool(strategy: PoolStrategy) -> ContainerPool {
        let docker = Docker::connect_with_socket_defaults().expect("client construction is lazy");
        ContainerPool::new(
            ContainerManager::new(docker),
            strategy,
            PoolSizes { clean: 1, dirty: 2 },
        )
    }

    fn spec() -> WorkerSpec {
        WorkerSpec {
            image: "isol8:python".to_string(),
            network: NetworkMode::None,
            security: SecurityMode::Strict,
            readonly_rootfs: true,
            memory_limit: "512m".to_string(),
            cpu_limit: 1.0,
            pids_limit: 128,
            sandbox_size: "256m".to_string(),
            tmp_size: "64m".to_string(),
        }
    }

    #[tokio::test]
    async fn test_acquire_after_drain_fails_with_engine_stopped() {
        let pool = test_pool(PoolStrategy::Fast);
        pool.drain().await;
        assert!(matches!(
            pool.acquire(&spec()).await,
            Err(SandboxError::EngineStopped)
        ));
    }

    #[tokio::test]
    async fn test_drain_is_idempotent() {
        let pool = test_pool(PoolStrategy::Secure);
        pool.drain().await;
        pool.drain().await;
        let stats = pool.stats().await;
        assert_eq!(stats.clean + stats.dirty + stats.in_use, 0);
    }
}

//! Pooled worker records

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{NetworkMode, SecurityMode};
use crate::container::WorkerSpec;

/// Cache key for warm workers: containers are interchangeable only when
/// image, network wiring, and security envelope all match.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub image: String,
    pub network: NetworkMode,
    pub security: SecurityMode,
}

impl PoolKey {
    pub fn for_spec(spec: &WorkerSpec) -> Self {
        Self {
            image: spec.image.clone(),
            network: spec.network,
            security: spec.security,
        }
    }
}

/// Lifecycle state of a pooled worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    InUse,
    Draining,
    Dead,
}

/// A worker container owned by the pool.
///
/// Callers receive the record as a handle and must return it through
/// `release`; the pool remains the owner of the underlying container.
#[derive(Debug, Clone)]
pub struct PooledWorker {
    pub id: Uuid,
    pub container_id: String,
    pub image: String,
    pub network: NetworkMode,
    pub security: SecurityMode,
    pub created_at: DateTime<Utc>,
    pub state: WorkerState,
}

impl PooledWorker {
    pub fn new(container_id: String, spec: &WorkerSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            container_id,
            image: spec.image.clone(),
            network: spec.network,
            security: spec.security,
            created_at: Utc::now(),
            state: WorkerState::Idle,
        }
    }

    pub fn key(&self) -> PoolKey {
        PoolKey {
            image: self.image.clone(),
            network: self.network,
            security: self.security,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(image: &str, network: NetworkMode) -> WorkerSpec {
        WorkerSpec {
            image: image.to_string(),
            network,
            security: SecurityMode::Strict,
            readonly_rootfs: true,
            memory_limit: "512m".to_string(),
            cpu_limit: 1.0,
            pids_limit: 128,
            sandbox_size: "256m".to_string(),
            tmp_size: "64m".to_string(),
        }
    }

    #[test]
    fn test_key_distinguishes_network_mode() {
        let a = PoolKey::for_spec(&spec("isol8:python", NetworkMode::None));
        let b = PoolKey::for_spec(&spec("isol8:python", NetworkMode::Filtered));
        let c = PoolKey::for_spec(&spec("isol8:node", NetworkMode::None));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, PoolKey::for_spec(&spec("isol8:python", NetworkMode::None)));
    }

    #[test]
    fn test_worker_key_matches_spec_key() {
        let s = spec("isol8:bash", NetworkMode::None);
        let worker = PooledWorker::new("abc123".to_string(), &s);
        assert_eq!(worker.key(), PoolKey::for_spec(&s));
        assert_eq!(worker.state, WorkerState::Idle);
    }
}

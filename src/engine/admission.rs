//! Global admission control
//!
//! A counting semaphore caps the number of executions between admission and
//! release. Tokio's semaphore queues waiters fairly, so admission is FIFO.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{SandboxError, SandboxResult};

/// Admission gate shared by all executions on one engine
#[derive(Clone)]
pub struct Admission {
    semaphore: Arc<Semaphore>,
}

impl Admission {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Block until a slot is free. Fails once the engine has stopped.
    pub async fn acquire(&self) -> SandboxResult<OwnedSemaphorePermit> {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SandboxError::EngineStopped)
    }

    /// Refuse all future (and currently blocked) acquisitions.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_caps_concurrency() {
        let admission = Admission::new(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let admission = admission.clone();
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            handles.push(tokio::spawn(async move {
                let _permit = admission.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_close_fails_blocked_waiters() {
        let admission = Admission::new(1);
        let held = admission.acquire().await.unwrap();

        let waiter = {
            let admission = admission.clone();
            tokio::spawn(async move { admission.acquire().await.map(|_| ()) })
        };

        admission.close();
        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(SandboxError::EngineStopped)));
        drop(held);

        assert!(matches!(
            admission.acquire().await,
            Err(SandboxError::EngineStopped)
        ));
    }
}

//! Bounded pool of blocking request workers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{debug, trace};

use crate::error::{EngineError, Result};

/// Runs CPU-bound requests on the blocking thread pool, at most
/// `max_concurrent` at a time.
///
/// # Thread Safety
///
/// - Permits are acquired in FIFO order, so queued requests start in
///   arrival order.
/// - The permit is held by the blocking task itself and released when the
///   work finishes, even if the awaiting caller was dropped.
#[derive(Debug)]
pub struct RequestPool {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    started: AtomicU64,
}

impl RequestPool {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            started: AtomicU64::new(0),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Requests currently executing.
    pub fn active(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    /// Requests started since creation.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Run `work` once a permit is available.
    ///
    /// A panic inside `work` is resumed on the caller.
    pub async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| EngineError::Canceled)?;
        let request = self.started.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(operation, request, "Request started");

        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            work()
        });

        match handle.await {
            Ok(result) => {
                debug!(operation, request, ok = result.is_ok(), "Request finished");
                result
            }
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(EngineError::Canceled),
        }
    }
}

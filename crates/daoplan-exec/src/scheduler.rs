//! Tokio-backed executor for `Dao::call_async` (requires the `async-scheduler`
//! feature).
//!
//! Calls are blocking, so each task runs on the runtime's blocking pool. A
//! semaphore caps how many run at once; the rest queue on the runtime.

use std::sync::Arc;

use daoplan_core::error::{Error, Result};
use daoplan_core::executor::{Executor, Task};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

pub struct TokioExecutor {
    handle: Handle,
    permits: Arc<Semaphore>,
    max_parallel: usize,
}

impl TokioExecutor {
    pub fn new(handle: Handle, max_parallel: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        Self {
            handle,
            permits: Arc::new(Semaphore::new(max_parallel)),
            max_parallel,
        }
    }

    /// Executor on the runtime the caller is running inside.
    pub fn current(max_parallel: usize) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Config(format!("no tokio runtime for the async scheduler: {e}")))?;
        Ok(Self::new(handle, max_parallel))
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }
}

impl Executor for TokioExecutor {
    fn name(&self) -> &str {
        "tokio"
    }

    fn execute(&self, task: Task) {
        let permits = self.permits.clone();
        self.handle.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::warn!("async scheduler closed; dropping call");
                return;
            };
            if let Err(e) = tokio::task::spawn_blocking(task).await {
                tracing::error!(error = %e, "async DAO call panicked");
            }
        });
    }
}

impl std::fmt::Debug for TokioExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioExecutor")
            .field("max_parallel", &self.max_parallel)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

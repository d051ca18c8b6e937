//! Background task registry.
//!
//! Long-running helpers (access-count flushers, idle sweepers, cache TTL
//! sweeps) are registered here instead of being spawned fire-and-forget, so
//! shutdown can cancel them and failures reach the log.

use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::Result;

/// Tracks named background tasks for the lifetime of the process.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a tracked task. The future's error, if any, is reported through
    /// the error sink (structured log) rather than silently dropped.
    pub fn spawn<F>(&self, name: impl Into<String>, future: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = future.await {
                error!(task = %task_name, error = %err, "Background task failed");
            } else {
                debug!(task = %task_name, "Background task finished");
            }
        });
        self.tasks.lock().push((name, handle));
    }

    /// Number of registered tasks (finished ones included until `close`).
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Abort all registered tasks. Idempotent.
    pub fn close(&self) {
        let mut tasks = self.tasks.lock();
        for (name, handle) in tasks.drain(..) {
            if !handle.is_finished() {
                debug!(task = %name, "Aborting background task");
                handle.abort();
            }
        }
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

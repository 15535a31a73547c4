//! Where background compactions run.

use std::thread;
use tracing::warn;

pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs background work submitted by the engine.
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}

/// Spawns a named thread per task.
#[derive(Debug, Clone, Default)]
pub struct ThreadExecutor {
    name: Option<String>,
}

impl ThreadExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        let name = self.name.clone().unwrap_or_else(|| "riptide-bg".to_string());
        if let Err(e) = thread::Builder::new().name(name).spawn(task) {
            warn!(error = %e, "failed to spawn background thread");
        }
    }
}

/// Runs every task on the calling thread before returning.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

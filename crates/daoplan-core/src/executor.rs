//! Executors used for asynchronous DAO calls.

pub type Task = Box<dyn FnOnce() + Send + 'static>;

pub trait Executor: Send + Sync {
    /// Stable identity; part of the dispatch-table cache key.
    fn name(&self) -> &str;

    fn execute(&self, task: Task);
}

/// Runs each task on its own OS thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn name(&self) -> &str {
        "thread"
    }

    fn execute(&self, task: Task) {
        std::thread::spawn(task);
    }
}

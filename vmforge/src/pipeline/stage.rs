//! Stage definition for table-driven pipeline execution.

/// A stage groups tasks that run one after another.
///
/// Stages are executed in order. Generic over task type T to allow
/// different pipeline implementations.
#[derive(Debug, Clone)]
pub struct Stage<T> {
    pub tasks: Vec<T>,
}

impl<T> Stage<T> {
    /// Create a stage with sequential task execution.
    pub fn sequential(tasks: Vec<T>) -> Self {
        Self { tasks }
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

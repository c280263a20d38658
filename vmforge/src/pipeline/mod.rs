//! Generic table-driven pipeline execution framework.
//!
//! Used by the provisioning executor (one task per capability step) and by
//! the host deployment workflow (one pipeline per deployment stage).
//!
//! ## Architecture
//!
//! ```text
//! Pipeline → Stages → Tasks
//!
//! - Pipeline: Orchestrates execution of all stages, in order
//! - Stage: Groups related tasks, run one after another
//! - Task: Atomic unit of work
//! ```
//!
//! Execution stops at the first failing task; later tasks are never
//! attempted and nothing already done is unwound.
//!
//! ## Example
//!
//! ```ignore
//! use pipeline::{ExecutionPlan, PipelineBuilder, PipelineExecutor, Stage};
//!
//! let plan = ExecutionPlan::new(vec![
//!     Stage::sequential(vec![Box::new(TaskA)]),
//!     Stage::sequential(vec![Box::new(TaskB), Box::new(TaskC)]),
//! ]);
//!
//! let pipeline = PipelineBuilder::from_plan(plan);
//! let metrics = PipelineExecutor::execute(pipeline, ctx).await?;
//! println!("pipeline took {}ms", metrics.total_duration_ms);
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, Pipeline, PipelineBuilder, PipelineExecutor};
pub use stage::Stage;
pub use task::{BoxedTask, PipelineTask};

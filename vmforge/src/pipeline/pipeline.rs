//! Generic pipeline execution framework.
//!
//! Provides a table-driven pipeline executor that runs stages of tasks in order.

use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::Stage;
use super::task::BoxedTask;
use std::time::Instant;
use vmforge_shared::errors::ForgeResult;

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    /// Build a plan. Empty stages are dropped so table entries can be
    /// filtered down to nothing without special-casing.
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self {
            stages: stages.into_iter().filter(|s| !s.is_empty()).collect(),
        }
    }

    pub fn stages(self) -> Vec<Stage<BoxedTask<Ctx>>> {
        self.stages
    }

    /// Task names in execution order.
    pub fn task_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|stage| stage.tasks.iter())
            .map(|task| task.name().to_string())
            .collect()
    }
}

pub struct Pipeline<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> Pipeline<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }
}

pub struct PipelineBuilder;

impl PipelineBuilder {
    pub fn from_plan<Ctx>(plan: ExecutionPlan<Ctx>) -> Pipeline<Ctx> {
        Pipeline::new(plan.stages())
    }
}

/// Pipeline executor framework.
///
/// This provides the generic infrastructure for executing a table-driven pipeline.
/// The actual task execution logic is provided by task implementations.
pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a pipeline.
    ///
    /// Iterates through stages and runs each stage's tasks in order. The first
    /// task error is returned as-is; no later task runs.
    ///
    /// Generic over:
    /// - `Ctx`: Shared pipeline context (use interior mutability for writes)
    pub async fn execute<Ctx>(pipeline: Pipeline<Ctx>, ctx: Ctx) -> ForgeResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::new();

        for (index, stage) in pipeline.stages.into_iter().enumerate() {
            let stage_start = Instant::now();

            let mut task_metrics = Vec::new();
            for task in stage.tasks {
                let name = task.name().to_string();
                let task_start = Instant::now();
                task.run(ctx.clone()).await?;
                task_metrics.push(TaskMetrics {
                    name,
                    duration_ms: task_start.elapsed().as_millis(),
                });
            }

            stage_metrics.push(StageMetrics {
                index,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        })
    }
}

//! Job executor - runs the steps of one job instance

use crate::core::{
    EnvTemplates, EvalScope, ExecutionPlan, JobRecord, JobResult, RunContext, Status, Step,
    StepRecord, StepResult,
};
use crate::execution::engine::{EventEmitter, ExecutionEvent};
use crate::execution::runner::StepRunner;
use crate::expression::StatusView;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Render one env layer on top of `base`; later layers win
pub fn render_env(
    templates: &EnvTemplates,
    base: &BTreeMap<String, String>,
    ctx: &RunContext,
    plan: &ExecutionPlan,
    instance: usize,
) -> BTreeMap<String, String> {
    let scope = EvalScope::new(ctx, plan, instance, base);
    let rendered: Vec<(String, String)> = templates
        .iter()
        .map(|(key, value)| (key.clone(), value.render(&scope)))
        .collect();
    let mut env = base.clone();
    env.extend(rendered);
    env
}

/// Workflow-level env for an instance
pub fn workflow_env(ctx: &RunContext, plan: &ExecutionPlan, instance: usize) -> BTreeMap<String, String> {
    render_env(&plan.workflow.env, &BTreeMap::new(), ctx, plan, instance)
}

/// Workflow env overlaid with the job's env
pub fn job_env(ctx: &RunContext, plan: &ExecutionPlan, instance: usize) -> BTreeMap<String, String> {
    let base = workflow_env(ctx, plan, instance);
    render_env(&plan.job(instance).env, &base, ctx, plan, instance)
}

/// Step guard: status functions replace the implicit `success()` check
fn should_run(step: &Step, scope: &EvalScope<'_>) -> bool {
    match &step.condition {
        Some(condition) if condition.overrides_status() => {
            condition.expr.evaluate(scope).is_truthy()
        }
        Some(condition) => scope.status.success() && condition.expr.evaluate(scope).is_truthy(),
        None => scope.status.success(),
    }
}

fn masked(ctx: &RunContext, outputs: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    outputs
        .iter()
        .map(|(key, value)| (key.clone(), ctx.masker().mask(value)))
        .collect()
}

/// Executes job instances, one step at a time
pub struct JobExecutor {
    runner: StepRunner,
    events: EventEmitter,
}

impl JobExecutor {
    pub fn new(runner: StepRunner, events: EventEmitter) -> Self {
        Self { runner, events }
    }

    /// Run every step of an instance and publish its record
    ///
    /// A cancelled token stops the instance between steps: the step in
    /// progress finishes, every later step is recorded `cancelled` without
    /// consulting its guard, and the instance reports `cancelled`.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        plan: &ExecutionPlan,
        instance: usize,
        cancel: &CancellationToken,
    ) -> JobResult {
        let job = plan.job(instance);
        let id = plan.instances[instance].id.as_str();
        let mut result = JobResult::new(
            id.to_string(),
            job.id.clone(),
            plan.instances[instance].matrix.clone(),
        );
        result.status = Status::Running;
        result.started_at = Some(Utc::now());
        info!("Starting {}", id);

        let env = job_env(ctx, plan, instance);
        let mut failed = false;

        for step in &job.steps {
            let status = StatusView {
                failed,
                cancelled: cancel.is_cancelled(),
                skipped: false,
            };
            let scope = EvalScope::new(ctx, plan, instance, &env).with_status(status);

            let step_result = if status.cancelled {
                debug!("{}: {} cancelled", id, step.label());
                StepResult::new(step.index, step.id.clone(), step.label()).not_run(Status::Cancelled)
            } else if should_run(step, &scope) {
                let step_env = render_env(&step.env, &env, ctx, plan, instance);
                let scope = EvalScope::new(ctx, plan, instance, &step_env).with_status(status);

                self.events.emit(ExecutionEvent::StepStarted {
                    instance: id.to_string(),
                    step: step.label(),
                });
                self.runner.run(step, job, id, &scope, &step_env).await
            } else {
                debug!("{}: {} skipped", id, step.label());
                StepResult::new(step.index, step.id.clone(), step.label()).not_run(Status::Skipped)
            };

            ctx.publish_step(
                instance,
                &step.key(),
                StepRecord {
                    outputs: step_result.outputs.clone(),
                    outcome: step_result.outcome,
                    conclusion: step_result.conclusion,
                },
            );

            if step_result.conclusion == Status::Failure {
                failed = true;
                if let Some(failure) = &step_result.failure {
                    warn!("{}: step '{}' failed: {}", id, step_result.name, failure);
                }
            } else if step_result.outcome == Status::Failure {
                info!("{}: step '{}' failed, continuing", id, step_result.name);
            }

            if step_result.started_at.is_some() {
                self.events.emit(ExecutionEvent::StepFinished {
                    instance: id.to_string(),
                    step: step_result.name.clone(),
                    outcome: step_result.outcome,
                    conclusion: step_result.conclusion,
                });
            }

            let mut step_result = step_result;
            step_result.outputs = masked(ctx, &step_result.outputs);
            result.steps.push(step_result);
        }

        let cancelled = cancel.is_cancelled();
        result.status = if cancelled {
            result.reason = Some("cancelled".to_string());
            Status::Cancelled
        } else if failed {
            Status::Failure
        } else {
            Status::Success
        };

        let status = StatusView {
            failed,
            cancelled,
            skipped: false,
        };
        let scope = EvalScope::new(ctx, plan, instance, &env).with_status(status);
        let outputs: BTreeMap<String, String> = job
            .outputs
            .iter()
            .map(|(key, value)| (key.clone(), value.render(&scope)))
            .collect();

        ctx.publish_job(
            instance,
            JobRecord {
                result: result.status,
                outputs: outputs.clone(),
            },
        );
        result.outputs = masked(ctx, &outputs);
        result.finished_at = Some(Utc::now());

        info!("Finished {}: {}", id, result.status);
        result
    }
}

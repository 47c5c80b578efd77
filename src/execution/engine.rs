//! Main execution engine - orchestrates a workflow run
//!
//! The dispatch loop owns all scheduling state. Workers are tokio tasks in a
//! [`JoinSet`]; each holds one semaphore permit for the life of its job
//! instance. Cancellation flows down a token hierarchy: run, job, instance.

use crate::action::ActionRegistry;
use crate::core::{
    ExecutionPlan, ExpansionPolicy, JobRecord, JobResult, RunContext, RunReport, RunStatus, Shell,
    Status, StepResult, TriggerEvent, Workflow,
};
use crate::error::LoadError;
use crate::execution::executor::{workflow_env, JobExecutor};
use crate::execution::runner::{StepRunner, DEFAULT_STEP_TIMEOUT};
use crate::execution::scheduler::{continuation, Admission, ExecutionScheduler, Transition};
use crate::execution::sink::{LogSink, TracingSink};
use crate::secrets::{OutputMasker, SecretProvider, StaticSecrets};
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Worker count when nothing else is configured
pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// Events that can occur during a run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    RunStarted {
        run_id: Uuid,
        workflow: String,
        instances: usize,
    },
    InstanceStatusChanged {
        instance: String,
        status: Status,
        reason: Option<String>,
    },
    StepStarted {
        instance: String,
        step: String,
    },
    StepFinished {
        instance: String,
        step: String,
        outcome: Status,
        conclusion: Status,
    },
    RunFinished {
        run_id: Uuid,
        status: RunStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Fan-out of events to every registered handler
#[derive(Clone, Default)]
pub struct EventEmitter {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventEmitter {
    pub fn new(handlers: Vec<EventHandler>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Size of the worker pool
    pub max_parallel: usize,

    /// Step timeout when neither step nor job sets one
    pub default_timeout: Duration,

    /// Directory steps run in unless they set `working-directory`
    pub working_dir: PathBuf,

    /// Shell for `run` steps that do not set `shell`
    pub shell: Shell,

    pub policy: ExpansionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: DEFAULT_MAX_PARALLEL,
            default_timeout: DEFAULT_STEP_TIMEOUT,
            working_dir: PathBuf::from("."),
            shell: Shell::default(),
            policy: ExpansionPolicy::default(),
        }
    }
}

/// Main workflow execution engine
pub struct ExecutionEngine {
    config: EngineConfig,
    actions: ActionRegistry,
    secrets: Arc<dyn SecretProvider>,
    sink: Arc<dyn LogSink>,
    handlers: Vec<EventHandler>,
    cancel: CancellationToken,
}

impl ExecutionEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            actions: ActionRegistry::with_builtins(),
            secrets: Arc::new(StaticSecrets::new()),
            sink: Arc::new(TracingSink),
            handlers: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_actions(mut self, actions: ActionRegistry) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Token that cancels every run of this engine
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Plan a workflow without running it
    pub fn plan(&self, workflow: Arc<Workflow>) -> Result<ExecutionPlan, LoadError> {
        ExecutionPlan::new(workflow, self.config.policy)
    }

    /// Execute a workflow to completion
    ///
    /// Only planning can fail; step and job failures end up in the report.
    pub async fn run(
        &self,
        workflow: Arc<Workflow>,
        event: TriggerEvent,
    ) -> Result<RunReport, LoadError> {
        let plan = Arc::new(self.plan(workflow.clone())?);

        let mut actions = self.actions.clone();
        actions.register_workflow_actions(&workflow.actions);

        let ctx = Arc::new(RunContext::new(
            workflow.name.clone(),
            event,
            self.secrets.clone(),
            Arc::new(OutputMasker::new()),
        ));
        ctx.register_known_secrets();

        let events = EventEmitter::new(self.handlers.clone());
        let runner = StepRunner::new(
            Arc::new(actions),
            self.sink.clone(),
            self.config.working_dir.clone(),
            self.config.default_timeout,
        )
        .with_default_shell(self.config.shell);
        let executor = Arc::new(JobExecutor::new(runner, events.clone()));

        let mut run = Run {
            ctx,
            plan: plan.clone(),
            events,
            scheduler: ExecutionScheduler::new(&plan),
            results: plan
                .instances
                .iter()
                .map(|i| JobResult::new(i.id.clone(), plan.job(i.index).id.clone(), i.matrix.clone()))
                .collect(),
            run_token: self.cancel.child_token(),
            job_tokens: Vec::new(),
            instance_tokens: Vec::new(),
            cancel_reasons: BTreeMap::new(),
        };
        run.job_tokens = workflow.jobs.iter().map(|_| run.run_token.child_token()).collect();
        run.instance_tokens = plan
            .instances
            .iter()
            .map(|i| run.job_tokens[i.job].child_token())
            .collect();

        Ok(run.drive(executor, self.config.max_parallel.max(1)).await)
    }
}

/// State of one run, owned by the dispatch loop
struct Run {
    ctx: Arc<RunContext>,
    plan: Arc<ExecutionPlan>,
    events: EventEmitter,
    scheduler: ExecutionScheduler,
    results: Vec<JobResult>,
    run_token: CancellationToken,
    job_tokens: Vec<CancellationToken>,
    instance_tokens: Vec<CancellationToken>,
    /// Why a job's instances were cancelled, keyed by job index
    cancel_reasons: BTreeMap<usize, String>,
}

impl Run {
    async fn drive(mut self, executor: Arc<JobExecutor>, workers: usize) -> RunReport {
        let mut report = RunReport::new(self.ctx.run_id, self.ctx.workflow.clone());
        info!(
            "Starting run {} of '{}' ({} instances, {} workers)",
            report.run_id,
            report.workflow,
            self.plan.len(),
            workers
        );
        self.events.emit(ExecutionEvent::RunStarted {
            run_id: report.run_id,
            workflow: report.workflow.clone(),
            instances: self.plan.len(),
        });

        let semaphore = Arc::new(Semaphore::new(workers));
        let mut pool: JoinSet<(usize, Result<JobResult, JoinError>)> = JoinSet::new();
        let mut run_cancelled = false;

        loop {
            let mut progressed = false;

            if self.run_token.is_cancelled() && !run_cancelled {
                run_cancelled = true;
                warn!("Run {} cancelled", report.run_id);
                for i in self.scheduler.cancel_waiting() {
                    self.settle(i, Status::Cancelled, Some("run cancelled".to_string()));
                }
                progressed = true;
            }

            let transitions = {
                let (ctx, plan, tokens, reasons) = (
                    &self.ctx,
                    &self.plan,
                    &self.instance_tokens,
                    &self.cancel_reasons,
                );
                self.scheduler.advance(plan, |i, slots| {
                    if tokens[i].is_cancelled() {
                        return Admission::Cancel {
                            reason: cancel_reason(reasons, plan.instances[i].job),
                        };
                    }
                    let env = workflow_env(ctx, plan, i);
                    continuation(ctx, plan, i, slots, &env)
                })
            };
            progressed |= !transitions.is_empty();
            self.apply(transitions);

            let tokens = &self.instance_tokens;
            let dropped = self.scheduler.cancel_ready(|i| tokens[i].is_cancelled());
            progressed |= !dropped.is_empty();
            for i in dropped {
                let reason = cancel_reason(&self.cancel_reasons, self.plan.instances[i].job);
                self.settle(i, Status::Cancelled, Some(reason));
            }

            while self.scheduler.has_ready() {
                let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                    break;
                };
                let Some(i) = self.scheduler.next(&self.plan) else {
                    break;
                };
                progressed = true;

                let result = &mut self.results[i];
                result.status = Status::Running;
                result.started_at = Some(Utc::now());
                self.events.emit(ExecutionEvent::InstanceStatusChanged {
                    instance: result.instance.clone(),
                    status: Status::Running,
                    reason: None,
                });
                debug!("Dispatching {}", result.instance);

                let executor = executor.clone();
                let ctx = self.ctx.clone();
                let plan = self.plan.clone();
                let token = self.instance_tokens[i].clone();
                pool.spawn(async move {
                    let _permit = permit;
                    let work = tokio::spawn(async move {
                        executor.execute(&ctx, &plan, i, &token).await
                    });
                    (i, work.await)
                });
            }

            if pool.is_empty() {
                if self.scheduler.is_finished() {
                    break;
                }
                if !progressed {
                    error!("No job instance can make progress; cancelling the rest");
                    for i in self.scheduler.cancel_waiting() {
                        self.settle(i, Status::Cancelled, Some("unschedulable".to_string()));
                    }
                    break;
                }
                continue;
            }

            let joined = tokio::select! {
                joined = pool.join_next() => joined,
                _ = self.run_token.cancelled(), if !run_cancelled => None,
            };
            match joined {
                Some(Ok((i, outcome))) => self.complete(i, outcome),
                Some(Err(e)) => error!("Worker task failed: {}", e),
                None => {}
            }
        }

        report.status = if self.run_token.is_cancelled() {
            RunStatus::Cancelled
        } else if self
            .results
            .iter()
            .any(|r| r.required && r.status != Status::Success)
        {
            RunStatus::Failure
        } else {
            RunStatus::Success
        };
        report.jobs = self.results;
        report.finished_at = Some(Utc::now());

        info!("Run {} finished: {}", report.run_id, report.status);
        self.events.emit(ExecutionEvent::RunFinished {
            run_id: report.run_id,
            status: report.status,
        });
        report
    }

    fn apply(&mut self, transitions: Vec<Transition>) {
        for transition in transitions {
            match transition.status {
                Status::Blocked | Status::Ready => {
                    let result = &mut self.results[transition.instance];
                    result.status = transition.status;
                    self.events.emit(ExecutionEvent::InstanceStatusChanged {
                        instance: result.instance.clone(),
                        status: transition.status,
                        reason: None,
                    });
                }
                status => self.settle(transition.instance, status, transition.reason),
            }
        }
    }

    /// Record an instance that reached a terminal status without running
    fn settle(&mut self, instance: usize, status: Status, reason: Option<String>) {
        let job = self.plan.job(instance);
        let result = &mut self.results[instance];
        result.status = status;
        result.reason = reason.clone();
        result.required = self.scheduler.slots()[instance].required;
        result.steps = job
            .steps
            .iter()
            .map(|step| StepResult::new(step.index, step.id.clone(), step.label()).not_run(status))
            .collect();
        result.finished_at = Some(Utc::now());

        self.ctx.publish_job(
            instance,
            JobRecord {
                result: status,
                outputs: BTreeMap::new(),
            },
        );
        info!(
            "{}: {}{}",
            result.instance,
            status,
            reason.as_deref().map(|r| format!(" ({})", r)).unwrap_or_default()
        );
        self.events.emit(ExecutionEvent::InstanceStatusChanged {
            instance: result.instance.clone(),
            status,
            reason,
        });
    }

    /// Record a finished worker and apply fail-fast
    fn complete(&mut self, instance: usize, outcome: Result<JobResult, JoinError>) {
        let mut result = match outcome {
            Ok(result) => result,
            Err(e) => {
                error!("Worker for {} panicked: {}", self.results[instance].instance, e);
                let mut failed = self.results[instance].clone();
                failed.status = Status::Failure;
                failed.reason = Some(format!("worker failed: {}", e));
                failed.finished_at = Some(Utc::now());
                self.ctx.publish_job(
                    instance,
                    JobRecord {
                        result: Status::Failure,
                        outputs: BTreeMap::new(),
                    },
                );
                failed
            }
        };

        let job_index = self.plan.instances[instance].job;
        if result.status == Status::Cancelled {
            if let Some(reason) = self.cancel_reasons.get(&job_index) {
                result.reason = Some(reason.clone());
            } else if self.run_token.is_cancelled() {
                result.reason = Some("run cancelled".to_string());
            }
        }

        self.scheduler.finish(&self.plan, instance, result.status, true);
        result.required = self.scheduler.slots()[instance].required;

        let job = self.plan.job(instance);
        if result.status == Status::Failure && job.fail_fast && !self.job_tokens[job_index].is_cancelled() {
            info!("fail-fast: cancelling other instances of '{}'", job.id);
            self.cancel_reasons
                .insert(job_index, format!("fail-fast: {} failed", result.instance));
            self.job_tokens[job_index].cancel();
        }

        self.events.emit(ExecutionEvent::InstanceStatusChanged {
            instance: result.instance.clone(),
            status: result.status,
            reason: result.reason.clone(),
        });
        self.results[instance] = result;
    }
}

fn cancel_reason(reasons: &BTreeMap<usize, String>, job: usize) -> String {
    reasons
        .get(&job)
        .cloned()
        .unwrap_or_else(|| "run cancelled".to_string())
}

//! Run context - shared state visible to expressions
//!
//! The [`RunContext`] holds what every worker of a run shares: the trigger
//! event, secrets, the output masker and the outputs published so far.
//! [`EvalScope`] is the per-instance view used to evaluate expressions.

use crate::core::plan::ExecutionPlan;
use crate::core::state::Status;
use crate::expression::{Scope, StatusView, Value};
use crate::secrets::{OutputMasker, SecretProvider};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use uuid::Uuid;

/// The event that started the run, exposed as `github.*`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// `push`, `pull_request`, `workflow_dispatch`
    pub event_name: String,

    /// Full git ref, e.g. `refs/heads/main`
    #[serde(rename = "ref")]
    pub git_ref: String,

    pub sha: String,
    pub actor: String,
    pub repository: String,

    /// `workflow_dispatch` inputs, exposed as `inputs.*`
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

impl TriggerEvent {
    pub fn new(event_name: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            git_ref: git_ref.into(),
            ..Default::default()
        }
    }

    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    pub fn tag(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/tags/")
    }

    /// Short ref name: branch or tag without its prefix
    pub fn ref_name(&self) -> &str {
        self.branch()
            .or_else(|| self.tag())
            .or_else(|| self.git_ref.strip_prefix("refs/"))
            .unwrap_or(&self.git_ref)
    }
}

/// Published record of a finished step
#[derive(Debug, Clone, PartialEq)]
pub struct StepRecord {
    pub outputs: BTreeMap<String, String>,
    pub outcome: Status,
    pub conclusion: Status,
}

/// Published record of a finished job instance
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub result: Status,
    pub outputs: BTreeMap<String, String>,
}

/// Shared state of a single run
pub struct RunContext {
    pub run_id: Uuid,
    pub workflow: String,
    pub event: TriggerEvent,
    secrets: Arc<dyn SecretProvider>,
    masker: Arc<OutputMasker>,
    /// instance -> step key -> record; each entry is written once by its own worker
    steps: RwLock<HashMap<usize, BTreeMap<String, StepRecord>>>,
    jobs: RwLock<HashMap<usize, JobRecord>>,
}

impl RunContext {
    pub fn new(
        workflow: impl Into<String>,
        event: TriggerEvent,
        secrets: Arc<dyn SecretProvider>,
        masker: Arc<OutputMasker>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            workflow: workflow.into(),
            event,
            secrets,
            masker,
            steps: RwLock::new(HashMap::new()),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub fn masker(&self) -> &Arc<OutputMasker> {
        &self.masker
    }

    /// Register every secret the provider can enumerate with the masker
    pub fn register_known_secrets(&self) {
        for name in self.secrets.names() {
            if let Some(value) = self.secrets.get(&name) {
                self.masker.add_secret(value);
            }
        }
    }

    /// Look up a secret; the value is registered for masking before it is returned
    pub fn secret(&self, name: &str) -> Option<String> {
        let value = self.secrets.get(name)?;
        self.masker.add_secret(value.clone());
        Some(value)
    }

    pub fn publish_step(&self, instance: usize, key: &str, record: StepRecord) {
        self.steps
            .write()
            .entry(instance)
            .or_default()
            .insert(key.to_string(), record);
    }

    pub fn step_record(&self, instance: usize, key: &str) -> Option<StepRecord> {
        self.steps.read().get(&instance)?.get(key).cloned()
    }

    pub fn publish_job(&self, instance: usize, record: JobRecord) {
        self.jobs.write().insert(instance, record);
    }

    pub fn job_record(&self, instance: usize) -> Option<JobRecord> {
        self.jobs.read().get(&instance).cloned()
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("workflow", &self.workflow)
            .field("event", &self.event)
            .finish_non_exhaustive()
    }
}

/// Aggregate result of all instances of a job
fn job_result(records: &[JobRecord]) -> Status {
    if records.iter().any(|r| r.result == Status::Failure) {
        Status::Failure
    } else if records.iter().any(|r| r.result == Status::Cancelled) {
        Status::Cancelled
    } else if !records.is_empty() && records.iter().all(|r| r.result == Status::Skipped) {
        Status::Skipped
    } else {
        Status::Success
    }
}

fn runner_os() -> &'static str {
    match std::env::consts::OS {
        "linux" => "Linux",
        "macos" => "macOS",
        "windows" => "Windows",
        other => other,
    }
}

fn lookup(map: &BTreeMap<String, String>, key: Option<&String>) -> Value {
    key.and_then(|k| map.get(k))
        .map(|v| Value::String(v.clone()))
        .unwrap_or(Value::Undefined)
}

/// Expression scope for one job instance
///
/// `steps.<id>` resolves local steps first, then steps of ancestor
/// instances. `needs.<job>` resolves only jobs this job transitively needs.
pub struct EvalScope<'a> {
    pub ctx: &'a RunContext,
    pub plan: &'a ExecutionPlan,
    pub instance: usize,
    pub env: &'a BTreeMap<String, String>,
    pub status: StatusView,
}

impl<'a> EvalScope<'a> {
    pub fn new(
        ctx: &'a RunContext,
        plan: &'a ExecutionPlan,
        instance: usize,
        env: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            ctx,
            plan,
            instance,
            env,
            status: StatusView::default(),
        }
    }

    pub fn with_status(mut self, status: StatusView) -> Self {
        self.status = status;
        self
    }

    fn resolve_github(&self, field: Option<&String>) -> Value {
        let event = &self.ctx.event;
        let value = match field.map(String::as_str) {
            Some("event_name") => event.event_name.clone(),
            Some("ref") => event.git_ref.clone(),
            Some("ref_name") => event.ref_name().to_string(),
            Some("sha") => event.sha.clone(),
            Some("actor") => event.actor.clone(),
            Some("repository") => event.repository.clone(),
            Some("run_id") => self.ctx.run_id.to_string(),
            Some("workflow") => self.ctx.workflow.clone(),
            Some("job") => self.plan.job(self.instance).id.clone(),
            _ => return Value::Undefined,
        };
        Value::String(value)
    }

    fn resolve_step(&self, path: &[String]) -> Value {
        let Some(step_id) = path.first() else {
            return Value::Undefined;
        };
        let local = self.ctx.step_record(self.instance, step_id);
        let record = local.or_else(|| {
            self.plan.instances[self.instance]
                .ancestors
                .iter()
                .find_map(|&a| self.ctx.step_record(a, step_id))
        });
        let Some(record) = record else {
            return Value::Undefined;
        };

        match path.get(1).map(String::as_str) {
            Some("outputs") => lookup(&record.outputs, path.get(2)),
            Some("outcome") => Value::String(record.outcome.to_string()),
            Some("conclusion") => Value::String(record.conclusion.to_string()),
            _ => Value::Undefined,
        }
    }

    fn resolve_needs(&self, path: &[String]) -> Value {
        let Some(job_id) = path.first() else {
            return Value::Undefined;
        };
        if !self.plan.is_ancestor_job(self.instance, job_id) {
            return Value::Undefined;
        }

        // Instances of the same job merge their outputs in matrix order
        let records: Vec<JobRecord> = self
            .plan
            .instances_of(job_id)
            .iter()
            .filter_map(|&i| self.ctx.job_record(i))
            .collect();

        match path.get(1).map(String::as_str) {
            Some("result") => Value::String(job_result(&records).to_string()),
            Some("outputs") => {
                let mut merged = BTreeMap::new();
                for record in &records {
                    merged.extend(record.outputs.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                lookup(&merged, path.get(2))
            }
            _ => Value::Undefined,
        }
    }

    fn job_status(&self) -> &'static str {
        if self.status.cancelled {
            "cancelled"
        } else if self.status.failed {
            "failure"
        } else {
            "success"
        }
    }
}

impl Scope for EvalScope<'_> {
    fn resolve(&self, root: &str, path: &[String]) -> Value {
        match root {
            "github" => self.resolve_github(path.first()),
            "env" => lookup(self.env, path.first()),
            "matrix" => path
                .first()
                .and_then(|key| self.plan.instances[self.instance].matrix.get(key))
                .cloned()
                .unwrap_or(Value::Undefined),
            "steps" => self.resolve_step(path),
            "needs" => self.resolve_needs(path),
            "secrets" => path
                .first()
                .and_then(|name| self.ctx.secret(name))
                .map(Value::String)
                .unwrap_or(Value::Undefined),
            "inputs" => lookup(&self.ctx.event.inputs, path.first()),
            "job" if path.first().map(String::as_str) == Some("status") => {
                Value::String(self.job_status().to_string())
            }
            "runner" => match path.first().map(String::as_str) {
                Some("os") => Value::String(runner_os().to_string()),
                Some("arch") => Value::String(std::env::consts::ARCH.to_string()),
                _ => Value::Undefined,
            },
            _ => Value::Undefined,
        }
    }

    fn status(&self) -> StatusView {
        self.status
    }
}

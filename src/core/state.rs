//! Execution state models

use crate::core::matrix::MatrixBinding;
use crate::error::StepFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a job instance or step
///
/// `Blocked` and `Ready` only apply to job instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Not yet considered
    Pending,
    /// Waiting on predecessors
    Blocked,
    /// Eligible, waiting for a worker
    Ready,
    Running,
    Success,
    Failure,
    Skipped,
    Cancelled,
}

impl Status {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Success | Status::Failure | Status::Skipped | Status::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Blocked => "blocked",
            Status::Ready => "ready",
            Status::Running => "running",
            Status::Success => "success",
            Status::Failure => "failure",
            Status::Skipped => "skipped",
            Status::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failure,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failure => "failure",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failure" => Some(RunStatus::Failure),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record of one executed (or skipped) step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Position within the job
    pub index: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub name: String,

    /// Result before `continue-on-error` is applied
    pub outcome: Status,

    /// Result after `continue-on-error` is applied
    pub conclusion: Status,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Redacted standard output
    pub stdout: String,

    /// Redacted standard error
    pub stderr: String,

    pub outputs: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StepFailure>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn new(index: usize, id: Option<String>, name: String) -> Self {
        Self {
            index,
            id,
            name,
            outcome: Status::Pending,
            conclusion: Status::Pending,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            outputs: BTreeMap::new(),
            failure: None,
            started_at: None,
            finished_at: None,
        }
    }

    /// A step that never ran
    pub fn not_run(mut self, status: Status) -> Self {
        self.outcome = status;
        self.conclusion = status;
        self
    }
}

/// Record of one job instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    /// Instance id, e.g. `build (os=linux)`
    pub instance: String,
    pub job: String,

    #[serde(skip_deserializing)]
    pub matrix: MatrixBinding,

    pub status: Status,

    /// Why the instance was skipped or cancelled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub steps: Vec<StepResult>,
    pub outputs: BTreeMap<String, String>,

    /// Whether a non-success status fails the run
    pub required: bool,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobResult {
    pub fn new(instance: String, job: String, matrix: MatrixBinding) -> Self {
        Self {
            instance,
            job,
            matrix,
            status: Status::Pending,
            reason: None,
            steps: Vec::new(),
            outputs: BTreeMap::new(),
            required: true,
            started_at: None,
            finished_at: None,
        }
    }

    /// The first failed step, if any
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.outcome == Status::Failure)
    }
}

/// Final record of a run, handed to sinks and persisted in history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub jobs: Vec<JobResult>,
}

impl RunReport {
    pub fn new(run_id: Uuid, workflow: String) -> Self {
        Self {
            run_id,
            workflow,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            jobs: Vec::new(),
        }
    }

    pub fn job(&self, instance: &str) -> Option<&JobResult> {
        self.jobs.iter().find(|j| j.instance == instance)
    }

    /// Number of instances in each terminal status
    pub fn counts(&self) -> BTreeMap<Status, usize> {
        let mut counts = BTreeMap::new();
        for job in &self.jobs {
            *counts.entry(job.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at.map(|end| end - self.started_at)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_is_terminal() {
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Blocked.is_terminal());
        assert!(!Status::Ready.is_terminal());
        assert!(!Status::Running.is_terminal());
        assert!(Status::Success.is_terminal());
        assert!(Status::Failure.is_terminal());
        assert!(Status::Skipped.is_terminal());
        assert!(Status::Cancelled.is_terminal());
    }

    #[test]
    fn test_report_counts_and_json() {
        let mut report = RunReport::new(Uuid::new_v4(), "CI".to_string());
        for (name, status) in [("a", Status::Success), ("b", Status::Success), ("c", Status::Skipped)] {
            let mut job = JobResult::new(name.to_string(), name.to_string(), MatrixBinding::new());
            job.status = status;
            report.jobs.push(job);
        }
        report.status = RunStatus::Success;

        let counts = report.counts();
        assert_eq!(counts.get(&Status::Success), Some(&2));
        assert_eq!(counts.get(&Status::Skipped), Some(&1));

        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "success");
        assert_eq!(value["jobs"][2]["status"], "skipped");
    }

    #[test]
    fn test_run_status_parse() {
        assert_eq!(RunStatus::parse("failure"), Some(RunStatus::Failure));
        assert_eq!(RunStatus::parse("bogus"), None);
    }
}

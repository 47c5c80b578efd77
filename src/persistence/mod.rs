//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

use crate::core::{RunReport, RunStatus, Status};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Summary of a finished run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,

    pub workflow: String,

    pub status: RunStatus,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,

    /// Number of job instances in the run
    pub instances: usize,

    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn from_report(report: &RunReport) -> Self {
        let counts = report.counts();
        let count = |status: Status| counts.get(&status).copied().unwrap_or(0);
        Self {
            run_id: report.run_id,
            workflow: report.workflow.clone(),
            status: report.status,
            started_at: report.started_at,
            finished_at: report.finished_at,
            instances: report.jobs.len(),
            succeeded: count(Status::Success),
            failed: count(Status::Failure),
            skipped: count(Status::Skipped),
            cancelled: count(Status::Cancelled),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a finished run; saving the same run again replaces it
    async fn save_run(&self, report: &RunReport) -> Result<()>;

    /// Load a full report by run id
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunReport>>;

    /// Most recent runs first, optionally for one workflow
    async fn list_runs(&self, workflow: Option<&str>, limit: usize) -> Result<Vec<RunSummary>>;

    /// Names of every workflow with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;

    async fn delete_run(&self, run_id: Uuid) -> Result<bool>;
}

/// In-memory persistence (for testing or ephemeral use)
#[derive(Default)]
pub struct InMemoryPersistence {
    runs: RwLock<HashMap<Uuid, RunReport>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, report: &RunReport) -> Result<()> {
        self.runs.write().await.insert(report.run_id, report.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunReport>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let mut summaries: Vec<RunSummary> = runs
            .values()
            .filter(|report| workflow.map_or(true, |name| report.workflow == name))
            .map(RunSummary::from_report)
            .collect();
        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let runs = self.runs.read().await;
        let mut names: Vec<String> = runs.values().map(|r| r.workflow.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool> {
        Ok(self.runs.write().await.remove(&run_id).is_some())
    }
}

//! SQLite-based run history store

use crate::core::RunReport;
use crate::persistence::{PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (or create) a store at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .with_context(|| format!("Failed to open history database {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Store that lives as long as the process
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory database")?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// `<data dir>/flowrun/history.db`
    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flowrun")
            .join("history.db")
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let path = Self::default_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Self::new(&path).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                workflow TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                report TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_runs_workflow ON runs(workflow);
            CREATE INDEX IF NOT EXISTS idx_runs_started_at ON runs(started_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize history schema")?;

        Ok(())
    }

    /// Convert DateTime<Utc> to NaiveDateTime for SQLite
    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn report_from_row(row: &SqliteRow) -> Result<RunReport> {
        let json: String = row.get("report");
        serde_json::from_str(&json).context("Corrupt run report in history")
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, report: &RunReport) -> Result<()> {
        let json = serde_json::to_string(report).context("Failed to serialize run report")?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, workflow, status, started_at, finished_at, report)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(report.run_id.to_string())
        .bind(&report.workflow)
        .bind(report.status.as_str())
        .bind(Self::to_naive(report.started_at))
        .bind(report.finished_at.map(Self::to_naive))
        .bind(json)
        .execute(&self.pool)
        .await
        .context("Failed to save run")?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunReport>> {
        let row = sqlx::query("SELECT report FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::report_from_row).transpose()
    }

    async fn list_runs(&self, workflow: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT report
            FROM runs
            WHERE ?1 IS NULL OR workflow = ?1
            ORDER BY started_at DESC
            LIMIT ?2
            "#,
        )
        .bind(workflow)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list runs")?;

        rows.iter()
            .map(|row| Self::report_from_row(row).map(|report| RunSummary::from_report(&report)))
            .collect()
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT workflow
            FROM runs
            ORDER BY workflow ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list workflows")?;

        Ok(rows.iter().map(|row| row.get("workflow")).collect())
    }

    async fn delete_run(&self, run_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM runs WHERE id = ?1")
            .bind(run_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete run")?;

        Ok(result.rows_affected() > 0)
    }
}

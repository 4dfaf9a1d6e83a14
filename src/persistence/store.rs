//! SQLite-based run history store

use crate::core::ExecutionStatus;
use crate::persistence::{InstanceSummary, PersistenceBackend, RunSummary};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use uuid::Uuid;

/// SQLite run store
pub struct SqliteRunStore {
    pool: SqlitePool,
}

impl SqliteRunStore {
    /// Open (creating if needed) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self> {
        let data_dir = dirs::data_local_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let db_dir = data_dir.join("gantry");
        std::fs::create_dir_all(&db_dir)
            .with_context(|| format!("Failed to create {}", db_dir.display()))?;

        Self::new(&db_dir.join("runs.db")).await
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                pipelines TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                total_instances INTEGER NOT NULL DEFAULT 0,
                succeeded INTEGER NOT NULL DEFAULT 0,
                failed INTEGER NOT NULL DEFAULT 0,
                cancelled INTEGER NOT NULL DEFAULT 0,
                skipped INTEGER NOT NULL DEFAULT 0,
                instances TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS run_pipelines (
                run_id TEXT NOT NULL,
                pipeline_name TEXT NOT NULL,
                PRIMARY KEY (run_id, pipeline_name)
            );

            CREATE INDEX IF NOT EXISTS idx_started_at ON runs(started_at);
            CREATE INDEX IF NOT EXISTS idx_pipeline_name ON run_pipelines(pipeline_name);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn to_naive(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.naive_utc()
    }

    fn from_naive(dt: NaiveDateTime) -> DateTime<Utc> {
        DateTime::from_naive_utc_and_offset(dt, Utc)
    }

    fn parse_status(status: &str) -> ExecutionStatus {
        match status {
            "Running" => ExecutionStatus::Running,
            "Succeeded" => ExecutionStatus::Succeeded,
            "Failed" => ExecutionStatus::Failed,
            _ => ExecutionStatus::Pending,
        }
    }

    fn from_row(row: &SqliteRow) -> Result<RunSummary> {
        let pipelines: Vec<String> = serde_json::from_str(&row.get::<String, _>("pipelines"))?;
        let instances: Vec<InstanceSummary> = serde_json::from_str(&row.get::<String, _>("instances"))?;
        Ok(RunSummary {
            run_id: Uuid::parse_str(&row.get::<String, _>("id"))?,
            pipelines,
            status: Self::parse_status(&row.get::<String, _>("status")),
            started_at: Self::from_naive(row.get("started_at")),
            completed_at: row.get::<Option<NaiveDateTime>, _>("completed_at").map(Self::from_naive),
            total_instances: row.get::<i64, _>("total_instances") as usize,
            succeeded: row.get::<i64, _>("succeeded") as usize,
            failed: row.get::<i64, _>("failed") as usize,
            cancelled: row.get::<i64, _>("cancelled") as usize,
            skipped: row.get::<i64, _>("skipped") as usize,
            instances,
        })
    }
}

const SELECT_RUNS: &str = r#"
    SELECT id, pipelines, status, started_at, completed_at, total_instances,
           succeeded, failed, cancelled, skipped, instances
    FROM runs
"#;

#[async_trait::async_trait]
impl PersistenceBackend for SqliteRunStore {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO runs
            (id, pipelines, status, started_at, completed_at, total_instances,
             succeeded, failed, cancelled, skipped, instances)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(run.run_id.to_string())
        .bind(serde_json::to_string(&run.pipelines)?)
        .bind(format!("{:?}", run.status))
        .bind(Self::to_naive(run.started_at))
        .bind(run.completed_at.map(Self::to_naive))
        .bind(run.total_instances as i64)
        .bind(run.succeeded as i64)
        .bind(run.failed as i64)
        .bind(run.cancelled as i64)
        .bind(run.skipped as i64)
        .bind(serde_json::to_string(&run.instances)?)
        .execute(&mut *tx)
        .await
        .context("Failed to save run")?;

        for pipeline in &run.pipelines {
            sqlx::query("INSERT OR IGNORE INTO run_pipelines (run_id, pipeline_name) VALUES (?1, ?2)")
                .bind(run.run_id.to_string())
                .bind(pipeline)
                .execute(&mut *tx)
                .await
                .context("Failed to index run pipelines")?;
        }
        tx.commit().await?;

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let row = sqlx::query(&format!("{} WHERE id = ?1", SELECT_RUNS))
            .bind(run_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load run")?;

        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_runs(&self, pipeline: Option<&str>, limit: usize) -> Result<Vec<RunSummary>> {
        let rows = match pipeline {
            Some(name) => {
                sqlx::query(&format!(
                    "{} WHERE id IN (SELECT run_id FROM run_pipelines WHERE pipeline_name = ?1) \
                     ORDER BY started_at DESC LIMIT ?2",
                    SELECT_RUNS
                ))
                .bind(name)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(&format!("{} ORDER BY started_at DESC LIMIT ?1", SELECT_RUNS))
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .context("Failed to list runs")?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn list_pipelines(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT pipeline_name
            FROM run_pipelines
            ORDER BY pipeline_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list pipelines")?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}

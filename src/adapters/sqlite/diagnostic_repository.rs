//! SQLite implementation of the DiagnosticRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{DiagnosticRun, DiagnosticStatus};
use crate::domain::ports::DiagnosticRepository;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteDiagnosticRepository {
    pool: SqlitePool,
}

impl SqliteDiagnosticRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DiagnosticRow {
    id: String,
    workflow_id: String,
    trigger_reason: String,
    context_snapshot: String,
    spawned_task_ids: String,
    status: String,
    cooldown_until: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DiagnosticRow> for DiagnosticRun {
    type Error = KernelError;

    fn try_from(row: DiagnosticRow) -> Result<Self, Self::Error> {
        let spawned: Vec<String> = serde_json::from_str(&row.spawned_task_ids)?;
        let spawned_task_ids = spawned.iter().map(|s| parse_uuid(s)).collect::<KernelResult<Vec<_>>>()?;
        Ok(DiagnosticRun {
            id: parse_uuid(&row.id)?,
            workflow_id: parse_uuid(&row.workflow_id)?,
            trigger_reason: row.trigger_reason,
            context_snapshot: serde_json::from_str(&row.context_snapshot)?,
            spawned_task_ids,
            status: DiagnosticStatus::from_str(&row.status)
                .ok_or_else(|| KernelError::Serialization(format!("unknown diagnostic status {}", row.status)))?,
            cooldown_until: parse_datetime(&row.cooldown_until)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl DiagnosticRepository for SqliteDiagnosticRepository {
    async fn insert(&self, run: &DiagnosticRun) -> KernelResult<()> {
        let spawned: Vec<String> = run.spawned_task_ids.iter().map(ToString::to_string).collect();
        sqlx::query(
            r#"INSERT INTO diagnostic_runs (id, workflow_id, trigger_reason, context_snapshot,
               spawned_task_ids, status, cooldown_until, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(run.id.to_string())
        .bind(run.workflow_id.to_string())
        .bind(&run.trigger_reason)
        .bind(serde_json::to_string(&run.context_snapshot)?)
        .bind(serde_json::to_string(&spawned)?)
        .bind(run.status.as_str())
        .bind(run.cooldown_until.to_rfc3339())
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<DiagnosticRun>> {
        let row: Option<DiagnosticRow> = sqlx::query_as("SELECT * FROM diagnostic_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, run: &DiagnosticRun) -> KernelResult<()> {
        let spawned: Vec<String> = run.spawned_task_ids.iter().map(ToString::to_string).collect();
        let result = sqlx::query(
            r#"UPDATE diagnostic_runs SET spawned_task_ids = ?, status = ?, cooldown_until = ?,
               updated_at = ? WHERE id = ?"#,
        )
        .bind(serde_json::to_string(&spawned)?)
        .bind(run.status.as_str())
        .bind(run.cooldown_until.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "diagnostic_run", id: run.id.to_string() });
        }
        Ok(())
    }

    async fn latest_for_workflow(&self, workflow_id: Uuid) -> KernelResult<Option<DiagnosticRun>> {
        let row: Option<DiagnosticRow> = sqlx::query_as(
            "SELECT * FROM diagnostic_runs WHERE workflow_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(workflow_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_for_workflow(&self, workflow_id: Uuid) -> KernelResult<Vec<DiagnosticRun>> {
        let rows: Vec<DiagnosticRow> = sqlx::query_as(
            "SELECT * FROM diagnostic_runs WHERE workflow_id = ? ORDER BY created_at ASC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

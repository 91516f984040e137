//! SQLite implementation of the ArtifactRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{AgentResult, ResultKind, VerificationStatus, WorkflowResult};
use crate::domain::ports::ArtifactRepository;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteArtifactRepository {
    pool: SqlitePool,
}

impl SqliteArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AgentResultRow {
    id: String,
    task_id: String,
    agent_id: String,
    markdown_path: String,
    kind: String,
    summary: String,
    verification_status: String,
    created_at: String,
}

impl TryFrom<AgentResultRow> for AgentResult {
    type Error = KernelError;

    fn try_from(row: AgentResultRow) -> Result<Self, Self::Error> {
        Ok(AgentResult {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            agent_id: parse_uuid(&row.agent_id)?,
            markdown_path: row.markdown_path,
            kind: ResultKind::from_str(&row.kind)
                .ok_or_else(|| KernelError::Serialization(format!("unknown result kind {}", row.kind)))?,
            summary: row.summary,
            verification_status: VerificationStatus::from_str(&row.verification_status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown verification status {}", row.verification_status))
            })?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WorkflowResultRow {
    id: String,
    workflow_id: String,
    markdown_path: String,
    evidence: String,
    validation_status: String,
    created_at: String,
}

impl TryFrom<WorkflowResultRow> for WorkflowResult {
    type Error = KernelError;

    fn try_from(row: WorkflowResultRow) -> Result<Self, Self::Error> {
        Ok(WorkflowResult {
            id: parse_uuid(&row.id)?,
            workflow_id: parse_uuid(&row.workflow_id)?,
            markdown_path: row.markdown_path,
            evidence: serde_json::from_str(&row.evidence)?,
            validation_status: VerificationStatus::from_str(&row.validation_status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown validation status {}", row.validation_status))
            })?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[async_trait]
impl ArtifactRepository for SqliteArtifactRepository {
    async fn insert_agent_result(&self, result: &AgentResult) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO agent_results (id, task_id, agent_id, markdown_path, kind, summary,
               verification_status, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(result.task_id.to_string())
        .bind(result.agent_id.to_string())
        .bind(&result.markdown_path)
        .bind(result.kind.as_str())
        .bind(&result.summary)
        .bind(result.verification_status.as_str())
        .bind(result.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_agent_results_by_task(&self, task_id: Uuid) -> KernelResult<Vec<AgentResult>> {
        let rows: Vec<AgentResultRow> =
            sqlx::query_as("SELECT * FROM agent_results WHERE task_id = ? ORDER BY created_at ASC")
                .bind(task_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_paths_for_ticket_phase(&self, ticket_id: Uuid, phase_id: Uuid) -> KernelResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT r.markdown_path FROM agent_results r
             JOIN tasks t ON t.id = r.task_id
             WHERE t.ticket_id = ? AND t.phase_id = ?
             ORDER BY r.created_at ASC",
        )
        .bind(ticket_id.to_string())
        .bind(phase_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(p,)| p).collect())
    }

    async fn insert_workflow_result(&self, result: &WorkflowResult) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO workflow_results (id, workflow_id, markdown_path, evidence,
               validation_status, created_at) VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(result.workflow_id.to_string())
        .bind(&result.markdown_path)
        .bind(serde_json::to_string(&result.evidence)?)
        .bind(result.validation_status.as_str())
        .bind(result.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_workflow_results(&self, workflow_id: Uuid) -> KernelResult<Vec<WorkflowResult>> {
        let rows: Vec<WorkflowResultRow> = sqlx::query_as(
            "SELECT * FROM workflow_results WHERE workflow_id = ? ORDER BY created_at ASC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn set_workflow_result_status(
        &self,
        result_id: Uuid,
        status: VerificationStatus,
    ) -> KernelResult<()> {
        let result = sqlx::query("UPDATE workflow_results SET validation_status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(result_id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "workflow_result", id: result_id.to_string() });
        }
        Ok(())
    }

    async fn has_validated_workflow_result(&self, workflow_id: Uuid) -> KernelResult<bool> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM workflow_results WHERE workflow_id = ? AND validation_status = 'validated'",
        )
        .bind(workflow_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 > 0)
    }
}

//! SQLite implementation of the SupervisorRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{AuditEntry, AuthorityLevel, SupervisorAction, SupervisorActionType};
use crate::domain::ports::SupervisorRepository;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteSupervisorRepository {
    pool: SqlitePool,
}

impl SqliteSupervisorRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ActionRow {
    id: String,
    actor_agent_id: String,
    authority_level: i64,
    action_type: String,
    target_id: String,
    correlation_id: String,
    snapshot_before: String,
    snapshot_after: String,
    reversed: i64,
    audit_log: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ActionRow> for SupervisorAction {
    type Error = KernelError;

    fn try_from(row: ActionRow) -> Result<Self, Self::Error> {
        let audit_log: Vec<AuditEntry> = serde_json::from_str(&row.audit_log)?;
        Ok(SupervisorAction {
            id: parse_uuid(&row.id)?,
            actor_agent_id: parse_uuid(&row.actor_agent_id)?,
            authority_level: AuthorityLevel::from_rank(row.authority_level as u8).ok_or_else(|| {
                KernelError::Serialization(format!("unknown authority rank {}", row.authority_level))
            })?,
            action_type: SupervisorActionType::from_str(&row.action_type).ok_or_else(|| {
                KernelError::Serialization(format!("unknown action type {}", row.action_type))
            })?,
            target_id: parse_uuid(&row.target_id)?,
            correlation_id: parse_uuid(&row.correlation_id)?,
            snapshot_before: serde_json::from_str(&row.snapshot_before)?,
            snapshot_after: serde_json::from_str(&row.snapshot_after)?,
            reversed: row.reversed != 0,
            audit_log,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl SupervisorRepository for SqliteSupervisorRepository {
    async fn insert(&self, action: &SupervisorAction) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO supervisor_actions (id, actor_agent_id, authority_level, action_type,
               target_id, correlation_id, snapshot_before, snapshot_after, reversed, audit_log,
               created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(action.id.to_string())
        .bind(action.actor_agent_id.to_string())
        .bind(i64::from(action.authority_level.rank()))
        .bind(action.action_type.as_str())
        .bind(action.target_id.to_string())
        .bind(action.correlation_id.to_string())
        .bind(serde_json::to_string(&action.snapshot_before)?)
        .bind(serde_json::to_string(&action.snapshot_after)?)
        .bind(i64::from(action.reversed))
        .bind(serde_json::to_string(&action.audit_log)?)
        .bind(action.created_at.to_rfc3339())
        .bind(action.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<SupervisorAction>> {
        let row: Option<ActionRow> = sqlx::query_as("SELECT * FROM supervisor_actions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, action: &SupervisorAction) -> KernelResult<()> {
        let result = sqlx::query(
            r#"UPDATE supervisor_actions SET snapshot_before = ?, snapshot_after = ?, reversed = ?,
               audit_log = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(serde_json::to_string(&action.snapshot_before)?)
        .bind(serde_json::to_string(&action.snapshot_after)?)
        .bind(i64::from(action.reversed))
        .bind(serde_json::to_string(&action.audit_log)?)
        .bind(action.updated_at.to_rfc3339())
        .bind(action.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound {
                entity: "supervisor_action",
                id: action.id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_for_target(&self, target_id: Uuid) -> KernelResult<Vec<SupervisorAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT * FROM supervisor_actions WHERE target_id = ? ORDER BY created_at DESC",
        )
        .bind(target_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_for_target_since(
        &self,
        target_id: Uuid,
        since: DateTime<Utc>,
    ) -> KernelResult<Vec<SupervisorAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(
            "SELECT * FROM supervisor_actions WHERE target_id = ? AND created_at > ?
             ORDER BY created_at ASC",
        )
        .bind(target_id.to_string())
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

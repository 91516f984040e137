//! SQLite implementation of the AgentRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{Agent, AgentStatus, AgentType, HealthStatus};
use crate::domain::ports::{AgentFilter, AgentRepository};

use super::{parse_datetime, parse_optional_uuid, parse_uuid};

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    agent_type: String,
    name: String,
    phase_id: Option<String>,
    capabilities: String,
    status: String,
    health_status: String,
    current_task_id: Option<String>,
    last_heartbeat_at: String,
    restart_count: i64,
    public_key: String,
    max_concurrent_tasks: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AgentRow> for Agent {
    type Error = KernelError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let capabilities: BTreeSet<String> = serde_json::from_str(&row.capabilities)?;
        Ok(Agent {
            id: parse_uuid(&row.id)?,
            agent_type: AgentType::from_str(&row.agent_type)
                .ok_or_else(|| KernelError::Serialization(format!("unknown agent type {}", row.agent_type)))?,
            name: row.name,
            phase_id: parse_optional_uuid(row.phase_id)?,
            capabilities,
            status: AgentStatus::from_str(&row.status)
                .ok_or_else(|| KernelError::Serialization(format!("unknown agent status {}", row.status)))?,
            health_status: HealthStatus::from_str(&row.health_status)
                .ok_or_else(|| KernelError::Serialization(format!("unknown health status {}", row.health_status)))?,
            current_task_id: parse_optional_uuid(row.current_task_id)?,
            last_heartbeat_at: parse_datetime(&row.last_heartbeat_at)?,
            restart_count: row.restart_count as u32,
            public_key: row.public_key,
            max_concurrent_tasks: row.max_concurrent_tasks as u32,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn insert(&self, agent: &Agent) -> KernelResult<()> {
        let capabilities = serde_json::to_string(&agent.capabilities)?;
        sqlx::query(
            r#"INSERT INTO agents (id, agent_type, name, phase_id, capabilities, status,
               health_status, current_task_id, last_heartbeat_at, restart_count, public_key,
               max_concurrent_tasks, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(agent.id.to_string())
        .bind(agent.agent_type.as_str())
        .bind(&agent.name)
        .bind(agent.phase_id.map(|id| id.to_string()))
        .bind(&capabilities)
        .bind(agent.status.as_str())
        .bind(agent.health_status.as_str())
        .bind(agent.current_task_id.map(|id| id.to_string()))
        .bind(agent.last_heartbeat_at.to_rfc3339())
        .bind(agent.restart_count as i64)
        .bind(&agent.public_key)
        .bind(agent.max_concurrent_tasks as i64)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("idx_agents_identity") => {
                KernelError::Conflict { entity: "agent", id: agent.name.clone() }
            }
            _ => e.into(),
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_by_identity(&self, agent_type: AgentType, name: &str) -> KernelResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as(
            "SELECT * FROM agents WHERE agent_type = ? AND name = ? AND status != 'quarantined'",
        )
        .bind(agent_type.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, agent: &Agent) -> KernelResult<()> {
        let capabilities = serde_json::to_string(&agent.capabilities)?;
        let result = sqlx::query(
            r#"UPDATE agents SET agent_type = ?, name = ?, phase_id = ?, capabilities = ?,
               status = ?, health_status = ?, current_task_id = ?, last_heartbeat_at = ?,
               restart_count = ?, public_key = ?, max_concurrent_tasks = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(agent.agent_type.as_str())
        .bind(&agent.name)
        .bind(agent.phase_id.map(|id| id.to_string()))
        .bind(&capabilities)
        .bind(agent.status.as_str())
        .bind(agent.health_status.as_str())
        .bind(agent.current_task_id.map(|id| id.to_string()))
        .bind(agent.last_heartbeat_at.to_rfc3339())
        .bind(agent.restart_count as i64)
        .bind(&agent.public_key)
        .bind(agent.max_concurrent_tasks as i64)
        .bind(agent.updated_at.to_rfc3339())
        .bind(agent.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "agent", id: agent.id.to_string() });
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> KernelResult<()> {
        let result = sqlx::query("DELETE FROM agents WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "agent", id: id.to_string() });
        }
        Ok(())
    }

    async fn list(&self, filter: AgentFilter) -> KernelResult<Vec<Agent>> {
        let mut query = String::from("SELECT * FROM agents WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(agent_type) = filter.agent_type {
            query.push_str(" AND agent_type = ?");
            bindings.push(agent_type.as_str().to_string());
        }
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(phase_id) = filter.phase_id {
            query.push_str(" AND phase_id = ?");
            bindings.push(phase_id.to_string());
        }
        query.push_str(" ORDER BY created_at ASC");

        let mut q = sqlx::query_as::<_, AgentRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows: Vec<AgentRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_schedulable(&self, phase_id: Uuid) -> KernelResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agents WHERE phase_id = ? AND status = 'idle' ORDER BY created_at ASC",
        )
        .bind(phase_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_idle_validators(&self, phase_id: Option<Uuid>) -> KernelResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = match phase_id {
            Some(phase) => {
                sqlx::query_as(
                    "SELECT * FROM agents WHERE agent_type = 'validator' AND status = 'idle'
                     AND (phase_id = ? OR phase_id IS NULL) ORDER BY created_at ASC",
                )
                .bind(phase.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM agents WHERE agent_type = 'validator' AND status = 'idle'
                     ORDER BY created_at ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_by_type_and_phase(&self, agent_type: AgentType, phase_id: Option<Uuid>) -> KernelResult<u64> {
        let count: (i64,) = match phase_id {
            Some(phase) => {
                sqlx::query_as("SELECT COUNT(*) FROM agents WHERE agent_type = ? AND phase_id = ?")
                    .bind(agent_type.as_str())
                    .bind(phase.to_string())
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM agents WHERE agent_type = ? AND phase_id IS NULL")
                    .bind(agent_type.as_str())
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count.0 as u64)
    }
}

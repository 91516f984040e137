//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{BlockedReason, Task, TaskPriority, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository};

use super::{parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_dependencies(&self, task: &mut Task) -> KernelResult<()> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT depends_on_task_id FROM task_dependencies WHERE task_id = ?")
                .bind(task.id.to_string())
                .fetch_all(&self.pool)
                .await?;
        task.depends_on = rows.into_iter().map(|(s,)| parse_uuid(&s)).collect::<KernelResult<_>>()?;
        Ok(())
    }

    async fn store_dependencies(&self, task: &Task) -> KernelResult<()> {
        sqlx::query("DELETE FROM task_dependencies WHERE task_id = ?")
            .bind(task.id.to_string())
            .execute(&self.pool)
            .await?;
        for dep in &task.depends_on {
            sqlx::query("INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_task_id) VALUES (?, ?)")
                .bind(task.id.to_string())
                .bind(dep.to_string())
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    ticket_id: String,
    phase_id: String,
    title: String,
    description: String,
    status: String,
    priority: String,
    required_capabilities: String,
    parent_task_id: Option<String>,
    validation_enabled: i64,
    validation_iteration: i64,
    last_validation_feedback: Option<String>,
    assigned_agent_id: Option<String>,
    blocked_reason: Option<String>,
    failure_reason: Option<String>,
    retry_count: i64,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    version: i64,
}

impl TryFrom<TaskRow> for Task {
    type Error = KernelError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let required_capabilities: BTreeSet<String> = serde_json::from_str(&row.required_capabilities)?;
        Ok(Task {
            id: parse_uuid(&row.id)?,
            ticket_id: parse_uuid(&row.ticket_id)?,
            phase_id: parse_uuid(&row.phase_id)?,
            title: row.title,
            description: row.description,
            status: TaskStatus::from_str(&row.status)
                .ok_or_else(|| KernelError::Serialization(format!("unknown task status {}", row.status)))?,
            priority: TaskPriority::from_str(&row.priority)
                .ok_or_else(|| KernelError::Serialization(format!("unknown priority {}", row.priority)))?,
            required_capabilities,
            depends_on: BTreeSet::new(),
            parent_task_id: parse_optional_uuid(row.parent_task_id)?,
            validation_enabled: row.validation_enabled != 0,
            validation_iteration: row.validation_iteration as u32,
            last_validation_feedback: row.last_validation_feedback,
            assigned_agent_id: parse_optional_uuid(row.assigned_agent_id)?,
            blocked_reason: row.blocked_reason.as_deref().and_then(BlockedReason::from_str),
            failure_reason: row.failure_reason,
            retry_count: row.retry_count as u32,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            version: row.version as u64,
        })
    }
}

async fn hydrate(repo: &SqliteTaskRepository, rows: Vec<TaskRow>) -> KernelResult<Vec<Task>> {
    let mut tasks = Vec::with_capacity(rows.len());
    for row in rows {
        let mut task: Task = row.try_into()?;
        repo.load_dependencies(&mut task).await?;
        tasks.push(task);
    }
    Ok(tasks)
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn insert(&self, task: &Task) -> KernelResult<()> {
        let capabilities = serde_json::to_string(&task.required_capabilities)?;
        sqlx::query(
            r#"INSERT INTO tasks (id, ticket_id, phase_id, title, description, status, priority,
               priority_rank, required_capabilities, parent_task_id, validation_enabled,
               validation_iteration, last_validation_feedback, assigned_agent_id, blocked_reason,
               failure_reason, retry_count, created_at, updated_at, started_at, completed_at, version)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.ticket_id.to_string())
        .bind(task.phase_id.to_string())
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.priority as i64)
        .bind(&capabilities)
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(i64::from(task.validation_enabled))
        .bind(task.validation_iteration as i64)
        .bind(&task.last_validation_feedback)
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(task.blocked_reason.as_ref().map(|r| r.as_str()))
        .bind(&task.failure_reason)
        .bind(task.retry_count as i64)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.version as i64)
        .execute(&self.pool)
        .await?;

        self.store_dependencies(task).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let mut task: Task = r.try_into()?;
                self.load_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, task: &Task) -> KernelResult<()> {
        let capabilities = serde_json::to_string(&task.required_capabilities)?;
        // Optimistic lock: the stored row must still be at version - 1.
        let result = sqlx::query(
            r#"UPDATE tasks SET status = ?, priority = ?, priority_rank = ?, required_capabilities = ?,
               parent_task_id = ?, validation_enabled = ?, validation_iteration = ?,
               last_validation_feedback = ?, assigned_agent_id = ?, blocked_reason = ?,
               failure_reason = ?, retry_count = ?, updated_at = ?, started_at = ?,
               completed_at = ?, version = ?
               WHERE id = ? AND version = ?"#,
        )
        .bind(task.status.as_str())
        .bind(task.priority.as_str())
        .bind(task.priority as i64)
        .bind(&capabilities)
        .bind(task.parent_task_id.map(|id| id.to_string()))
        .bind(i64::from(task.validation_enabled))
        .bind(task.validation_iteration as i64)
        .bind(&task.last_validation_feedback)
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(task.blocked_reason.as_ref().map(|r| r.as_str()))
        .bind(&task.failure_reason)
        .bind(task.retry_count as i64)
        .bind(task.updated_at.to_rfc3339())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.version as i64)
        .bind(task.id.to_string())
        .bind((task.version - 1) as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Distinguish a missing row from a version conflict.
            let exists: Option<(i64,)> = sqlx::query_as("SELECT version FROM tasks WHERE id = ?")
                .bind(task.id.to_string())
                .fetch_optional(&self.pool)
                .await?;
            return match exists {
                Some(_) => Err(KernelError::Conflict { entity: "task", id: task.id.to_string() }),
                None => Err(KernelError::NotFound { entity: "task", id: task.id.to_string() }),
            };
        }

        self.store_dependencies(task).await?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> KernelResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "task", id: id.to_string() });
        }
        Ok(())
    }

    async fn list(&self, filter: TaskFilter) -> KernelResult<Vec<Task>> {
        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(ticket_id) = filter.ticket_id {
            query.push_str(" AND ticket_id = ?");
            bindings.push(ticket_id.to_string());
        }
        if let Some(phase_id) = filter.phase_id {
            query.push_str(" AND phase_id = ?");
            bindings.push(phase_id.to_string());
        }
        if let Some(status) = filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(priority) = filter.priority {
            query.push_str(" AND priority = ?");
            bindings.push(priority.as_str().to_string());
        }
        if let Some(agent_id) = filter.assigned_agent_id {
            query.push_str(" AND assigned_agent_id = ?");
            bindings.push(agent_id.to_string());
        }
        query.push_str(" ORDER BY created_at ASC");

        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        hydrate(self, rows).await
    }

    async fn list_by_ticket(&self, ticket_id: Uuid) -> KernelResult<Vec<Task>> {
        self.list(TaskFilter { ticket_id: Some(ticket_id), ..Default::default() }).await
    }

    async fn list_by_status(&self, status: TaskStatus) -> KernelResult<Vec<Task>> {
        self.list(TaskFilter { status: Some(status), ..Default::default() }).await
    }

    async fn done_task_ids(&self) -> KernelResult<BTreeSet<Uuid>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT id FROM tasks WHERE status = 'done'")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(|(s,)| parse_uuid(&s)).collect()
    }

    async fn list_pending_in_dispatch_order(&self) -> KernelResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status = 'pending'
             ORDER BY priority_rank DESC, created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        hydrate(self, rows).await
    }

    async fn list_dependents(&self, task_id: Uuid) -> KernelResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT t.* FROM tasks t
             JOIN task_dependencies d ON d.task_id = t.id
             WHERE d.depends_on_task_id = ?
             ORDER BY t.created_at ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        hydrate(self, rows).await
    }

    async fn list_in_progress_started_before(&self, cutoff: DateTime<Utc>) -> KernelResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status = 'in_progress' AND started_at IS NOT NULL AND started_at < ?",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        hydrate(self, rows).await
    }

    async fn count_dispatched_for_ticket(&self, ticket_id: Uuid) -> KernelResult<u64> {
        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks WHERE ticket_id = ?
             AND status NOT IN ('pending', 'done', 'failed')",
        )
        .bind(ticket_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.0 as u64)
    }

    async fn last_activity_for_ticket(&self, ticket_id: Uuid) -> KernelResult<Option<DateTime<Utc>>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT MAX(updated_at) FROM tasks WHERE ticket_id = ?")
                .bind(ticket_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match row.and_then(|(s,)| s) {
            Some(s) => Ok(Some(parse_datetime(&s)?)),
            None => Ok(None),
        }
    }
}

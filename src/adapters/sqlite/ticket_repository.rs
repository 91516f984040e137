//! SQLite implementation of the TicketRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{ApprovalStatus, TaskPriority, Ticket};
use crate::domain::ports::{TicketFilter, TicketRepository};

use super::{parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};

#[derive(Clone)]
pub struct SqliteTicketRepository {
    pool: SqlitePool,
}

impl SqliteTicketRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: String,
    title: String,
    goal: String,
    column_id: String,
    phase_id: String,
    approval_status: String,
    approval_deadline_at: Option<String>,
    requested_by_agent_id: Option<String>,
    priority: String,
    context: String,
    context_summary: String,
    archived: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TicketRow> for Ticket {
    type Error = KernelError;

    fn try_from(row: TicketRow) -> Result<Self, Self::Error> {
        Ok(Ticket {
            id: parse_uuid(&row.id)?,
            title: row.title,
            goal: row.goal,
            column_id: parse_uuid(&row.column_id)?,
            phase_id: parse_uuid(&row.phase_id)?,
            approval_status: ApprovalStatus::from_str(&row.approval_status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown approval status {}", row.approval_status))
            })?,
            approval_deadline_at: parse_optional_datetime(row.approval_deadline_at)?,
            requested_by_agent_id: parse_optional_uuid(row.requested_by_agent_id)?,
            priority: TaskPriority::from_str(&row.priority)
                .ok_or_else(|| KernelError::Serialization(format!("unknown priority {}", row.priority)))?,
            context: row.context,
            context_summary: row.context_summary,
            archived: row.archived != 0,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[async_trait]
impl TicketRepository for SqliteTicketRepository {
    async fn insert(&self, ticket: &Ticket) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO tickets (id, title, goal, column_id, phase_id, approval_status,
               approval_deadline_at, requested_by_agent_id, priority, context, context_summary,
               archived, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(ticket.id.to_string())
        .bind(&ticket.title)
        .bind(&ticket.goal)
        .bind(ticket.column_id.to_string())
        .bind(ticket.phase_id.to_string())
        .bind(ticket.approval_status.as_str())
        .bind(ticket.approval_deadline_at.map(|t| t.to_rfc3339()))
        .bind(ticket.requested_by_agent_id.map(|id| id.to_string()))
        .bind(ticket.priority.as_str())
        .bind(&ticket.context)
        .bind(&ticket.context_summary)
        .bind(i64::from(ticket.archived))
        .bind(ticket.created_at.to_rfc3339())
        .bind(ticket.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<Ticket>> {
        let row: Option<TicketRow> = sqlx::query_as("SELECT * FROM tickets WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, ticket: &Ticket) -> KernelResult<()> {
        let result = sqlx::query(
            r#"UPDATE tickets SET title = ?, goal = ?, column_id = ?, phase_id = ?,
               approval_status = ?, approval_deadline_at = ?, requested_by_agent_id = ?,
               priority = ?, context = ?, context_summary = ?, archived = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&ticket.title)
        .bind(&ticket.goal)
        .bind(ticket.column_id.to_string())
        .bind(ticket.phase_id.to_string())
        .bind(ticket.approval_status.as_str())
        .bind(ticket.approval_deadline_at.map(|t| t.to_rfc3339()))
        .bind(ticket.requested_by_agent_id.map(|id| id.to_string()))
        .bind(ticket.priority.as_str())
        .bind(&ticket.context)
        .bind(&ticket.context_summary)
        .bind(i64::from(ticket.archived))
        .bind(ticket.updated_at.to_rfc3339())
        .bind(ticket.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "ticket", id: ticket.id.to_string() });
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> KernelResult<()> {
        let result = sqlx::query("DELETE FROM tickets WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "ticket", id: id.to_string() });
        }
        Ok(())
    }

    async fn list(&self, filter: TicketFilter) -> KernelResult<Vec<Ticket>> {
        let mut query = String::from("SELECT * FROM tickets WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(column_id) = filter.column_id {
            query.push_str(" AND column_id = ?");
            bindings.push(column_id.to_string());
        }
        if let Some(phase_id) = filter.phase_id {
            query.push_str(" AND phase_id = ?");
            bindings.push(phase_id.to_string());
        }
        if let Some(approval) = filter.approval_status {
            query.push_str(" AND approval_status = ?");
            bindings.push(approval.as_str().to_string());
        }
        if !filter.include_archived {
            query.push_str(" AND archived = 0");
        }
        query.push_str(" ORDER BY created_at ASC");

        let mut q = sqlx::query_as::<_, TicketRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows: Vec<TicketRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_in_column(&self, column_id: Uuid) -> KernelResult<u64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tickets WHERE column_id = ? AND archived = 0")
                .bind(column_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0 as u64)
    }

    async fn list_approval_overdue(&self, now: DateTime<Utc>) -> KernelResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            "SELECT * FROM tickets WHERE approval_status = 'pending_review'
             AND approval_deadline_at IS NOT NULL AND approval_deadline_at <= ?",
        )
        .bind(now.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_active(&self) -> KernelResult<Vec<Ticket>> {
        let rows: Vec<TicketRow> = sqlx::query_as(
            "SELECT * FROM tickets WHERE archived = 0
             AND approval_status IN ('not_required', 'approved')
             ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

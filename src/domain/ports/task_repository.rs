//! Task repository port.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{Task, TaskPriority, TaskStatus};

/// Filter criteria for listing tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub ticket_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assigned_agent_id: Option<Uuid>,
}

/// Repository interface for Task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn insert(&self, task: &Task) -> KernelResult<()>;

    async fn get(&self, id: Uuid) -> KernelResult<Option<Task>>;

    /// Update guarded by the optimistic version: the write succeeds only
    /// if the stored version is `task.version - 1`, otherwise `conflict`.
    async fn update(&self, task: &Task) -> KernelResult<()>;

    async fn delete(&self, id: Uuid) -> KernelResult<()>;

    async fn list(&self, filter: TaskFilter) -> KernelResult<Vec<Task>>;

    async fn list_by_ticket(&self, ticket_id: Uuid) -> KernelResult<Vec<Task>>;

    async fn list_by_status(&self, status: TaskStatus) -> KernelResult<Vec<Task>>;

    /// IDs of all done tasks, for dependency-readiness checks.
    async fn done_task_ids(&self) -> KernelResult<BTreeSet<Uuid>>;

    /// Pending tasks in dispatch order: priority desc, created_at asc,
    /// id asc as the stable tiebreak.
    async fn list_pending_in_dispatch_order(&self) -> KernelResult<Vec<Task>>;

    /// Tasks that depend on the given task.
    async fn list_dependents(&self, task_id: Uuid) -> KernelResult<Vec<Task>>;

    /// In-progress tasks started before the cutoff (timeout sweep).
    async fn list_in_progress_started_before(&self, cutoff: DateTime<Utc>) -> KernelResult<Vec<Task>>;

    /// Count of a ticket's tasks in non-terminal, non-pending states.
    async fn count_dispatched_for_ticket(&self, ticket_id: Uuid) -> KernelResult<u64>;

    /// Most recent update across a ticket's tasks, for stuck detection.
    async fn last_activity_for_ticket(&self, ticket_id: Uuid) -> KernelResult<Option<DateTime<Utc>>>;
}

//! Ticket repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{ApprovalStatus, Ticket};

/// Filter criteria for listing tickets.
#[derive(Debug, Clone, Default)]
pub struct TicketFilter {
    pub column_id: Option<Uuid>,
    pub phase_id: Option<Uuid>,
    pub approval_status: Option<ApprovalStatus>,
    pub include_archived: bool,
}

/// Repository interface for Ticket persistence.
#[async_trait]
pub trait TicketRepository: Send + Sync {
    async fn insert(&self, ticket: &Ticket) -> KernelResult<()>;

    async fn get(&self, id: Uuid) -> KernelResult<Option<Ticket>>;

    async fn update(&self, ticket: &Ticket) -> KernelResult<()>;

    async fn delete(&self, id: Uuid) -> KernelResult<()>;

    async fn list(&self, filter: TicketFilter) -> KernelResult<Vec<Ticket>>;

    /// Occupancy of a board column (non-archived tickets).
    async fn count_in_column(&self, column_id: Uuid) -> KernelResult<u64>;

    /// Pending-review tickets whose approval deadline has passed.
    async fn list_approval_overdue(&self, now: DateTime<Utc>) -> KernelResult<Vec<Ticket>>;

    /// Dispatchable, non-archived tickets (the active workflows).
    async fn list_active(&self) -> KernelResult<Vec<Ticket>>;
}

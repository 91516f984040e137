//! Human-approval gate.
//!
//! A ticket created behind the gate sits in `pending_review` with a
//! decision deadline. While pending, the scheduler refuses to dispatch
//! its tasks and no workspaces or external resources are provisioned.
//! Approve opens the gate; reject and timeout both apply the configured
//! disposition (delete or archive).

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    topics, Actor, ApprovalConfig, ApprovalStatus, RejectDisposition, Ticket,
};
use crate::domain::ports::{Clock, TaskRepository, TicketRepository};
use crate::services::deadline_queue::{Deadline, DeadlineKind, DeadlineQueue};
use crate::services::event_bus::EventBus;

/// Human-approval lifecycle for tickets.
pub struct ApprovalService {
    tickets: Arc<dyn TicketRepository>,
    tasks: Arc<dyn TaskRepository>,
    bus: Arc<EventBus>,
    deadlines: Arc<DeadlineQueue>,
    clock: Arc<dyn Clock>,
    config: ApprovalConfig,
}

impl ApprovalService {
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        tasks: Arc<dyn TaskRepository>,
        bus: Arc<EventBus>,
        deadlines: Arc<DeadlineQueue>,
        clock: Arc<dyn Clock>,
        config: ApprovalConfig,
    ) -> Self {
        Self { tickets, tasks, bus, deadlines, clock, config }
    }

    /// Deadline for a gate opened now.
    pub fn deadline_from_now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.utc_now() + Duration::seconds(self.config.approval_timeout_seconds as i64)
    }

    /// Arm the decision deadline for a pending ticket. Called at
    /// creation and again during startup reconciliation.
    pub fn arm_deadline(&self, ticket: &Ticket) {
        if let Some(deadline) = ticket.approval_deadline_at {
            self.deadlines.schedule(Deadline {
                due_at: deadline,
                kind: DeadlineKind::ApprovalDeadline { ticket_id: ticket.id },
            });
        }
    }

    /// Approve a pending ticket. Approving an approved ticket is a
    /// no-op returning the same state.
    #[instrument(skip(self), err)]
    pub async fn approve(&self, ticket_id: Uuid, decided_by: &str) -> KernelResult<Ticket> {
        let now = self.clock.utc_now();
        let mut ticket = self.require(ticket_id).await?;
        let changed = ticket.resolve_approval(ApprovalStatus::Approved, now)?;
        if !changed {
            return Ok(ticket);
        }
        self.tickets.update(&ticket).await?;
        self.bus
            .publish(topics::TICKET_APPROVED, ticket_id, Actor::Human(decided_by.to_string()), serde_json::json!({}))
            .await?;
        info!(ticket = %ticket_id, "Ticket approved, tasks may dispatch");
        Ok(ticket)
    }

    /// Reject a pending ticket and apply the configured disposition.
    #[instrument(skip(self), err)]
    pub async fn reject(&self, ticket_id: Uuid, decided_by: &str, reason: &str) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let mut ticket = self.require(ticket_id).await?;
        ticket.resolve_approval(ApprovalStatus::Rejected, now)?;
        self.tickets.update(&ticket).await?;
        self.bus
            .publish(topics::TICKET_REJECTED, ticket_id, Actor::Human(decided_by.to_string()), serde_json::json!({
                "reason": reason,
            }))
            .await?;
        self.apply_disposition(ticket).await
    }

    /// Fired approval deadline: a still-pending ticket times out,
    /// treated as a rejection.
    pub async fn handle_deadline(&self, ticket_id: Uuid) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let Some(mut ticket) = self.tickets.get(ticket_id).await? else {
            return Ok(()); // already disposed
        };
        if ticket.approval_status != ApprovalStatus::PendingReview {
            return Ok(()); // decided before the deadline fired
        }
        if ticket.approval_deadline_at.is_some_and(|d| d > now) {
            return Ok(()); // deadline was extended
        }

        // The gate held: nothing may have been dispatched while pending.
        let dispatched = self.tasks.count_dispatched_for_ticket(ticket_id).await?;
        if dispatched > 0 {
            warn!(ticket = %ticket_id, dispatched, "Pending ticket had dispatched tasks at timeout");
        }

        ticket.resolve_approval(ApprovalStatus::TimedOut, now)?;
        self.tickets.update(&ticket).await?;
        self.bus
            .publish(topics::TICKET_TIMED_OUT, ticket_id, Actor::System, serde_json::json!({}))
            .await?;
        warn!(ticket = %ticket_id, "Approval deadline elapsed");
        self.apply_disposition(ticket).await
    }

    /// Deadline sweep backstop; also catches deadlines missed while the
    /// kernel was down.
    pub async fn sweep(&self) -> KernelResult<()> {
        let now = self.clock.utc_now();
        for ticket in self.tickets.list_approval_overdue(now).await? {
            self.handle_deadline(ticket.id).await?;
        }
        Ok(())
    }

    async fn apply_disposition(&self, ticket: Ticket) -> KernelResult<()> {
        match self.config.on_reject {
            RejectDisposition::Delete => self.tickets.delete(ticket.id).await,
            RejectDisposition::Archive => {
                let mut ticket = ticket;
                ticket.archived = true;
                ticket.updated_at = self.clock.utc_now();
                self.tickets.update(&ticket).await
            }
        }
    }

    async fn require(&self, ticket_id: Uuid) -> KernelResult<Ticket> {
        self.tickets
            .get(ticket_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "ticket", id: ticket_id.to_string() })
    }
}

//! Ticket domain model.
//!
//! A ticket is the container for a unit of end-to-end work. It moves
//! across board columns and phases, optionally gated by human approval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskPriority;
use crate::domain::errors::KernelError;

/// Human-approval state of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// No gate configured
    NotRequired,
    /// Awaiting a human decision; no tasks may dispatch
    PendingReview,
    Approved,
    Rejected,
    /// Deadline elapsed without a decision; treated as a rejection
    TimedOut,
}

impl Default for ApprovalStatus {
    fn default() -> Self {
        Self::NotRequired
    }
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotRequired => "not_required",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::TimedOut => "timed_out",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "not_required" => Some(Self::NotRequired),
            "pending_review" => Some(Self::PendingReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "timed_out" => Some(Self::TimedOut),
            _ => None,
        }
    }

    /// Whether tasks under this ticket may be dispatched.
    pub fn allows_dispatch(&self) -> bool {
        matches!(self, Self::NotRequired | Self::Approved)
    }
}

/// What happens to a ticket whose approval is rejected or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectDisposition {
    Delete,
    Archive,
}

impl Default for RejectDisposition {
    fn default() -> Self {
        Self::Archive
    }
}

/// A container for a unit of end-to-end work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    /// Unique identifier
    pub id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Goal statement driving the workflow
    pub goal: String,
    /// Board column currently occupied
    pub column_id: Uuid,
    /// Current phase
    pub phase_id: Uuid,
    /// Human-approval state
    pub approval_status: ApprovalStatus,
    /// Deadline for a pending approval decision
    pub approval_deadline_at: Option<DateTime<Utc>>,
    /// Agent that requested creation, when agent-initiated
    pub requested_by_agent_id: Option<Uuid>,
    /// Priority inherited by generated tasks unless overridden
    pub priority: TaskPriority,
    /// Aggregated phase summaries carried across phase boundaries
    pub context: String,
    /// Bounded summary of `context` produced at each phase exit
    pub context_summary: String,
    /// Whether the ticket has been archived after rejection
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    /// Create a ticket with no approval gate.
    pub fn new(
        title: impl Into<String>,
        goal: impl Into<String>,
        column_id: Uuid,
        phase_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            goal: goal.into(),
            column_id,
            phase_id,
            approval_status: ApprovalStatus::NotRequired,
            approval_deadline_at: None,
            requested_by_agent_id: None,
            priority: TaskPriority::default(),
            context: String::new(),
            context_summary: String::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Put the ticket behind the human-approval gate.
    pub fn with_pending_approval(mut self, deadline: DateTime<Utc>) -> Self {
        self.approval_status = ApprovalStatus::PendingReview;
        self.approval_deadline_at = Some(deadline);
        self
    }

    /// Record the requesting agent.
    pub fn requested_by(mut self, agent_id: Uuid) -> Self {
        self.requested_by_agent_id = Some(agent_id);
        self
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Resolve a pending approval.
    ///
    /// Approving an already-approved ticket is a no-op; any other
    /// decision against a settled gate is an invalid transition.
    pub fn resolve_approval(
        &mut self,
        decision: ApprovalStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, KernelError> {
        if self.approval_status == decision {
            return Ok(false);
        }
        if self.approval_status != ApprovalStatus::PendingReview {
            return Err(KernelError::InvalidTransition {
                entity: "ticket_approval",
                from: self.approval_status.as_str().to_string(),
                to: decision.as_str().to_string(),
            });
        }
        match decision {
            ApprovalStatus::Approved | ApprovalStatus::Rejected | ApprovalStatus::TimedOut => {
                self.approval_status = decision;
                self.approval_deadline_at = None;
                self.updated_at = now;
                Ok(true)
            }
            _ => Err(KernelError::InvalidTransition {
                entity: "ticket_approval",
                from: self.approval_status.as_str().to_string(),
                to: decision.as_str().to_string(),
            }),
        }
    }

    /// Move to a new board column.
    pub fn move_to_column(&mut self, column_id: Uuid, now: DateTime<Utc>) {
        self.column_id = column_id;
        self.updated_at = now;
    }

    /// Enter a new phase, storing the carried context.
    pub fn enter_phase(
        &mut self,
        phase_id: Uuid,
        context: String,
        context_summary: String,
        now: DateTime<Utc>,
    ) {
        self.phase_id = phase_id;
        self.context = context;
        self.context_summary = context_summary;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ticket() -> Ticket {
        Ticket::new("Ship feature", "build the thing", Uuid::new_v4(), Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn test_default_allows_dispatch() {
        let t = ticket();
        assert!(t.approval_status.allows_dispatch());
    }

    #[test]
    fn test_pending_blocks_dispatch() {
        let t = ticket().with_pending_approval(Utc::now() + chrono::Duration::seconds(1800));
        assert!(!t.approval_status.allows_dispatch());
        assert!(t.approval_deadline_at.is_some());
    }

    #[test]
    fn test_approve_pending() {
        let mut t = ticket().with_pending_approval(Utc::now());
        let changed = t.resolve_approval(ApprovalStatus::Approved, Utc::now()).unwrap();
        assert!(changed);
        assert_eq!(t.approval_status, ApprovalStatus::Approved);
        assert!(t.approval_deadline_at.is_none());
    }

    #[test]
    fn test_approve_twice_is_noop() {
        let mut t = ticket().with_pending_approval(Utc::now());
        t.resolve_approval(ApprovalStatus::Approved, Utc::now()).unwrap();
        let changed = t.resolve_approval(ApprovalStatus::Approved, Utc::now()).unwrap();
        assert!(!changed);
        assert_eq!(t.approval_status, ApprovalStatus::Approved);
    }

    #[test]
    fn test_reject_after_approve_is_invalid() {
        let mut t = ticket().with_pending_approval(Utc::now());
        t.resolve_approval(ApprovalStatus::Approved, Utc::now()).unwrap();
        assert!(t.resolve_approval(ApprovalStatus::Rejected, Utc::now()).is_err());
    }

    #[test]
    fn test_timeout_treated_as_settled() {
        let mut t = ticket().with_pending_approval(Utc::now());
        t.resolve_approval(ApprovalStatus::TimedOut, Utc::now()).unwrap();
        assert!(!t.approval_status.allows_dispatch());
        assert!(t.resolve_approval(ApprovalStatus::Approved, Utc::now()).is_err());
    }

    #[test]
    fn test_enter_phase_stores_context() {
        let mut t = ticket();
        let next_phase = Uuid::new_v4();
        t.enter_phase(next_phase, "full context".into(), "summary".into(), Utc::now());
        assert_eq!(t.phase_id, next_phase);
        assert_eq!(t.context, "full context");
        assert_eq!(t.context_summary, "summary");
    }
}

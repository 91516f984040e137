//! Supervisor authority model.
//!
//! Supervisor actions are rank-checked emergency interventions with an
//! append-only audit log and a bounded reversal window.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::KernelError;

/// Authority rank. Higher ranks may issue and revert more operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorityLevel {
    Worker = 1,
    Watchdog = 2,
    Monitor = 3,
    Guardian = 4,
    System = 5,
}

impl AuthorityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Watchdog => "watchdog",
            Self::Monitor => "monitor",
            Self::Guardian => "guardian",
            Self::System => "system",
        }
    }

    pub fn rank(&self) -> u8 {
        *self as u8
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            1 => Some(Self::Worker),
            2 => Some(Self::Watchdog),
            3 => Some(Self::Monitor),
            4 => Some(Self::Guardian),
            5 => Some(Self::System),
            _ => None,
        }
    }
}

/// Operations a supervisor may issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorActionType {
    CancelTask,
    ReallocateCapacity,
    OverridePriority,
    QuarantineAgent,
}

impl SupervisorActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CancelTask => "cancel_task",
            Self::ReallocateCapacity => "reallocate_capacity",
            Self::OverridePriority => "override_priority",
            Self::QuarantineAgent => "quarantine_agent",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "cancel_task" => Some(Self::CancelTask),
            "reallocate_capacity" => Some(Self::ReallocateCapacity),
            "override_priority" => Some(Self::OverridePriority),
            "quarantine_agent" => Some(Self::QuarantineAgent),
            _ => None,
        }
    }

    /// Minimum authority required to issue this operation.
    pub fn required_authority(&self) -> AuthorityLevel {
        match self {
            Self::CancelTask | Self::OverridePriority => AuthorityLevel::Watchdog,
            Self::ReallocateCapacity => AuthorityLevel::Monitor,
            Self::QuarantineAgent => AuthorityLevel::Guardian,
        }
    }
}

/// One entry in an action's append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// A journaled supervisor intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorAction {
    pub id: Uuid,
    /// Issuing agent
    pub actor_agent_id: Uuid,
    /// Authority carried by the issuer when the action was accepted
    pub authority_level: AuthorityLevel,
    pub action_type: SupervisorActionType,
    /// Target entity (task or agent) the action applied to
    pub target_id: Uuid,
    /// Correlation ID linking the action to its bus events
    pub correlation_id: Uuid,
    /// Entity state before the action, for reversal
    pub snapshot_before: serde_json::Value,
    /// Entity state after the action
    pub snapshot_after: serde_json::Value,
    /// Whether the action has been reverted
    pub reversed: bool,
    /// Append-only audit trail
    pub audit_log: Vec<AuditEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SupervisorAction {
    pub fn new(
        actor_agent_id: Uuid,
        authority_level: AuthorityLevel,
        action_type: SupervisorActionType,
        target_id: Uuid,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            actor_agent_id,
            authority_level,
            action_type,
            target_id,
            correlation_id: Uuid::new_v4(),
            snapshot_before: serde_json::Value::Null,
            snapshot_after: serde_json::Value::Null,
            reversed: false,
            audit_log: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an audit entry. Entries are never removed or rewritten.
    pub fn audit(&mut self, actor: impl Into<String>, note: impl Into<String>, now: DateTime<Utc>) {
        self.audit_log.push(AuditEntry {
            at: now,
            actor: actor.into(),
            note: note.into(),
            detail: None,
        });
        self.updated_at = now;
    }

    /// Whether `reverter` may revert this action at `now`.
    ///
    /// Reversal requires authority at least the issuer's and must fall
    /// inside the revert window; afterwards the action is terminal.
    pub fn check_revertible(
        &self,
        reverter: AuthorityLevel,
        now: DateTime<Utc>,
        revert_window: chrono::Duration,
    ) -> Result<(), KernelError> {
        if self.reversed {
            return Err(KernelError::InvalidTransition {
                entity: "supervisor_action",
                from: "reversed".to_string(),
                to: "reversed".to_string(),
            });
        }
        if reverter < self.authority_level {
            return Err(KernelError::NotAuthorized {
                actor: reverter.as_str().to_string(),
                actual: reverter.rank(),
                required: self.authority_level.rank(),
            });
        }
        if now - self.created_at > revert_window {
            return Err(KernelError::Timeout(format!(
                "revert window elapsed for action {}",
                self.id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_ordering() {
        assert!(AuthorityLevel::System > AuthorityLevel::Guardian);
        assert!(AuthorityLevel::Guardian > AuthorityLevel::Monitor);
        assert!(AuthorityLevel::Monitor > AuthorityLevel::Watchdog);
        assert!(AuthorityLevel::Watchdog > AuthorityLevel::Worker);
        assert_eq!(AuthorityLevel::Guardian.rank(), 4);
        assert_eq!(AuthorityLevel::from_rank(4), Some(AuthorityLevel::Guardian));
    }

    #[test]
    fn test_required_authority_per_operation() {
        assert_eq!(
            SupervisorActionType::QuarantineAgent.required_authority(),
            AuthorityLevel::Guardian
        );
        assert_eq!(
            SupervisorActionType::CancelTask.required_authority(),
            AuthorityLevel::Watchdog
        );
    }

    #[test]
    fn test_revert_requires_issuer_authority() {
        let now = Utc::now();
        let action = SupervisorAction::new(
            Uuid::new_v4(),
            AuthorityLevel::Guardian,
            SupervisorActionType::QuarantineAgent,
            Uuid::new_v4(),
            now,
        );
        let window = chrono::Duration::hours(1);

        assert!(action.check_revertible(AuthorityLevel::Monitor, now, window).is_err());
        assert!(action.check_revertible(AuthorityLevel::Guardian, now, window).is_ok());
        assert!(action.check_revertible(AuthorityLevel::System, now, window).is_ok());
    }

    #[test]
    fn test_revert_window_is_terminal() {
        let now = Utc::now();
        let action = SupervisorAction::new(
            Uuid::new_v4(),
            AuthorityLevel::Watchdog,
            SupervisorActionType::CancelTask,
            Uuid::new_v4(),
            now,
        );
        let window = chrono::Duration::hours(1);
        let late = now + chrono::Duration::hours(2);
        assert!(action.check_revertible(AuthorityLevel::System, late, window).is_err());
    }

    #[test]
    fn test_audit_log_appends() {
        let now = Utc::now();
        let mut action = SupervisorAction::new(
            Uuid::new_v4(),
            AuthorityLevel::Monitor,
            SupervisorActionType::OverridePriority,
            Uuid::new_v4(),
            now,
        );
        action.audit("monitor-1", "priority raised to critical", now);
        action.audit("guardian-1", "reviewed", now);
        assert_eq!(action.audit_log.len(), 2);
        assert_eq!(action.audit_log[0].note, "priority raised to critical");
    }
}

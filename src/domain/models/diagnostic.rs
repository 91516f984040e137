//! Diagnostic runs.
//!
//! One row per firing of the stuck-workflow monitor, with the context
//! snapshot handed to the recovery task and the cooldown gate for the
//! next firing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a diagnostic run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticStatus {
    Running,
    Completed,
    Failed,
}

impl DiagnosticStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A recovery attempt injected into a stuck workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticRun {
    pub id: Uuid,
    /// The stuck ticket
    pub workflow_id: Uuid,
    /// Why the monitor fired, e.g. "no_active_tasks_no_result"
    pub trigger_reason: String,
    /// Workflow goal, recent task summaries, failure signatures
    pub context_snapshot: serde_json::Value,
    /// Recovery tasks spawned by this run
    pub spawned_task_ids: Vec<Uuid>,
    pub status: DiagnosticStatus,
    /// No further run for this workflow before this instant
    pub cooldown_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiagnosticRun {
    pub fn new(
        workflow_id: Uuid,
        trigger_reason: impl Into<String>,
        context_snapshot: serde_json::Value,
        cooldown_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            trigger_reason: trigger_reason.into(),
            context_snapshot,
            spawned_task_ids: Vec::new(),
            status: DiagnosticStatus::Running,
            cooldown_until,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the cooldown gate is still closed at `now`.
    pub fn in_cooldown(&self, now: DateTime<Utc>) -> bool {
        now < self.cooldown_until
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_gate() {
        let now = Utc::now();
        let run = DiagnosticRun::new(
            Uuid::new_v4(),
            "no_active_tasks_no_result",
            serde_json::json!({}),
            now + chrono::Duration::seconds(60),
            now,
        );
        assert!(run.in_cooldown(now + chrono::Duration::seconds(59)));
        assert!(!run.in_cooldown(now + chrono::Duration::seconds(60)));
    }
}

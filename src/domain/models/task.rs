//! Task domain model.
//!
//! Tasks are discrete units of work dispatched to agents. They form a
//! DAG through `depends_on` and progress through a fixed state machine
//! that includes the validation loop states.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::KernelError;

/// Status of a task in the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created; not yet handed to an agent
    Pending,
    /// Matched to an agent, not yet started
    Assigned,
    /// Agent is executing
    InProgress,
    /// Agent claims done, awaiting validator spawn
    UnderReview,
    /// Validator bound and reviewing
    ValidationInProgress,
    /// Validator rejected; awaiting rework
    NeedsWork,
    /// Completed successfully
    Done,
    /// Terminal failure
    Failed,
    /// Held by a missing dependency, timeout, or human gate
    Blocked,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Assigned => "assigned",
            Self::InProgress => "in_progress",
            Self::UnderReview => "under_review",
            Self::ValidationInProgress => "validation_in_progress",
            Self::NeedsWork => "needs_work",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "assigned" => Some(Self::Assigned),
            "in_progress" => Some(Self::InProgress),
            "under_review" => Some(Self::UnderReview),
            "validation_in_progress" => Some(Self::ValidationInProgress),
            "needs_work" => Some(Self::NeedsWork),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            "blocked" => Some(Self::Blocked),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// States counted as active work for the stuck-workflow predicate.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Pending
                | Self::Assigned
                | Self::InProgress
                | Self::UnderReview
                | Self::ValidationInProgress
        )
    }

    /// States that require exactly one assigned agent.
    pub fn requires_assignee(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress | Self::UnderReview)
    }

    /// Valid transitions from this status.
    ///
    /// `Blocked` is reachable from any non-terminal state; resumption
    /// returns to the state recorded in `blocked_reason` handling, which
    /// the kernel models as `Blocked -> Pending | InProgress`.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Assigned, Self::Blocked, Self::Failed],
            Self::Assigned => &[Self::InProgress, Self::Pending, Self::Blocked, Self::Failed],
            Self::InProgress => &[
                Self::UnderReview,
                Self::Done,
                Self::Failed,
                Self::Blocked,
            ],
            Self::UnderReview => &[Self::ValidationInProgress, Self::Done, Self::NeedsWork, Self::Failed, Self::Blocked],
            Self::ValidationInProgress => &[Self::Done, Self::NeedsWork, Self::Failed, Self::Blocked],
            Self::NeedsWork => &[Self::InProgress, Self::Pending, Self::Failed, Self::Blocked],
            Self::Done => &[],
            Self::Failed => &[],
            Self::Blocked => &[Self::Pending, Self::InProgress, Self::Failed],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

/// Priority level for tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Medium
    }
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// One rank above this priority, clamped to critical.
    pub fn boosted(&self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        }
    }
}

/// Why a task is blocked, recorded alongside the `Blocked` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    /// A dependency is not done
    MissingDependency,
    /// Waiting on a human decision
    HumanGate,
    /// `task_in_progress_timeout` elapsed; assignment preserved
    Timeout,
}

impl BlockedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDependency => "missing_dependency",
            Self::HumanGate => "human_gate",
            Self::Timeout => "timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "missing_dependency" => Some(Self::MissingDependency),
            "human_gate" => Some(Self::HumanGate),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// A discrete unit of work dispatched to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: Uuid,
    /// Owning ticket (the workflow container)
    pub ticket_id: Uuid,
    /// Phase this task belongs to
    pub phase_id: Uuid,
    /// Human-readable title
    pub title: String,
    /// Detailed description/prompt
    pub description: String,
    /// Current status
    pub status: TaskStatus,
    /// Priority
    pub priority: TaskPriority,
    /// Capability tags the assignee must advertise
    pub required_capabilities: BTreeSet<String>,
    /// Task IDs this depends on
    pub depends_on: BTreeSet<Uuid>,
    /// Parent task (for spawned children)
    pub parent_task_id: Option<Uuid>,
    /// Whether completion routes through the validation loop
    pub validation_enabled: bool,
    /// Strictly increasing; bumped on each entry to under_review
    pub validation_iteration: u32,
    /// Feedback from the most recent failed review
    pub last_validation_feedback: Option<String>,
    /// Agent currently bound (assigned/in_progress/under_review)
    pub assigned_agent_id: Option<Uuid>,
    /// Why the task is blocked, when it is
    pub blocked_reason: Option<BlockedReason>,
    /// Terminal failure reason
    pub failure_reason: Option<String>,
    /// Retry count
    pub retry_count: u32,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
    /// When execution started
    pub started_at: Option<DateTime<Utc>>,
    /// When execution completed
    pub completed_at: Option<DateTime<Utc>>,
    /// Version for optimistic locking
    pub version: u64,
}

impl Task {
    /// Create a new pending task.
    pub fn new(
        ticket_id: Uuid,
        phase_id: Uuid,
        title: impl Into<String>,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            ticket_id,
            phase_id,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            required_capabilities: BTreeSet::new(),
            depends_on: BTreeSet::new(),
            parent_task_id: None,
            validation_enabled: false,
            validation_iteration: 0,
            last_validation_feedback: None,
            assigned_agent_id: None,
            blocked_reason: None,
            failure_reason: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            version: 1,
        }
    }

    /// Set priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Require a capability tag.
    pub fn with_capability(mut self, cap: impl Into<String>) -> Self {
        self.required_capabilities.insert(cap.into());
        self
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, task_id: Uuid) -> Self {
        if task_id != self.id {
            self.depends_on.insert(task_id);
        }
        self
    }

    /// Set parent task.
    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_task_id = Some(parent_id);
        self
    }

    /// Enable the validation loop for this task.
    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validation_enabled = enabled;
        self
    }

    /// Transition to a new status, enforcing the state machine.
    ///
    /// Side effects: entering `under_review` increments
    /// `validation_iteration`; `in_progress` stamps `started_at`;
    /// terminal states stamp `completed_at`; leaving `blocked` clears
    /// the blocked reason.
    pub fn transition_to(&mut self, new_status: TaskStatus, now: DateTime<Utc>) -> Result<(), KernelError> {
        if !self.status.can_transition_to(new_status) {
            return Err(KernelError::InvalidTransition {
                entity: "task",
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        if self.status == TaskStatus::Blocked && new_status != TaskStatus::Failed {
            self.blocked_reason = None;
        }

        self.status = new_status;
        self.updated_at = now;
        self.version += 1;

        match new_status {
            TaskStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            TaskStatus::UnderReview => {
                self.validation_iteration += 1;
            }
            TaskStatus::Done | TaskStatus::Failed => {
                self.completed_at = Some(now);
            }
            _ => {}
        }

        Ok(())
    }

    /// Bind an agent and move to assigned.
    pub fn assign_to(&mut self, agent_id: Uuid, now: DateTime<Utc>) -> Result<(), KernelError> {
        self.transition_to(TaskStatus::Assigned, now)?;
        self.assigned_agent_id = Some(agent_id);
        Ok(())
    }

    /// Block with a reason, preserving the assignment for resumption.
    pub fn block(&mut self, reason: BlockedReason, now: DateTime<Utc>) -> Result<(), KernelError> {
        self.transition_to(TaskStatus::Blocked, now)?;
        self.blocked_reason = Some(reason);
        Ok(())
    }

    /// Terminate with a recorded failure reason.
    pub fn fail(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> Result<(), KernelError> {
        self.transition_to(TaskStatus::Failed, now)?;
        self.failure_reason = Some(reason.into());
        self.assigned_agent_id = None;
        Ok(())
    }

    /// Check if task is terminal.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Whether every dependency id in `done` covers this task's dependencies.
    pub fn dependencies_met(&self, done: &BTreeSet<Uuid>) -> bool {
        self.depends_on.is_subset(done)
    }

    /// Validate structural integrity before persistence.
    pub fn validate(&self) -> Result<(), KernelError> {
        if self.title.trim().is_empty() {
            return Err(KernelError::ValidationFailed("task title cannot be empty".into()));
        }
        if self.depends_on.contains(&self.id) {
            return Err(KernelError::ValidationFailed("task cannot depend on itself".into()));
        }
        if self.status.requires_assignee() && self.assigned_agent_id.is_none() {
            return Err(KernelError::ValidationFailed(format!(
                "task in {} must have an assigned agent",
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(Uuid::new_v4(), Uuid::new_v4(), "Implement parser", "desc", Utc::now())
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut t = task();
        t.assign_to(Uuid::new_v4(), Utc::now()).unwrap();
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        assert!(t.started_at.is_some());
        t.transition_to(TaskStatus::Done, Utc::now()).unwrap();
        assert!(t.completed_at.is_some());
        assert!(t.is_terminal());
    }

    #[test]
    fn test_validation_iteration_increments_on_under_review() {
        let mut t = task();
        t.assign_to(Uuid::new_v4(), Utc::now()).unwrap();
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        assert_eq!(t.validation_iteration, 0);
        t.transition_to(TaskStatus::UnderReview, Utc::now()).unwrap();
        assert_eq!(t.validation_iteration, 1);
        t.transition_to(TaskStatus::NeedsWork, Utc::now()).unwrap();
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        t.transition_to(TaskStatus::UnderReview, Utc::now()).unwrap();
        assert_eq!(t.validation_iteration, 2);
    }

    #[test]
    fn test_needs_work_keeps_assignee() {
        let mut t = task();
        let agent = Uuid::new_v4();
        t.assign_to(agent, Utc::now()).unwrap();
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        t.transition_to(TaskStatus::UnderReview, Utc::now()).unwrap();
        t.transition_to(TaskStatus::NeedsWork, Utc::now()).unwrap();
        assert_eq!(t.assigned_agent_id, Some(agent));
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut t = task();
        // Pending -> InProgress must go through Assigned
        assert!(t.transition_to(TaskStatus::InProgress, Utc::now()).is_err());
        // Pending -> Done
        assert!(t.transition_to(TaskStatus::Done, Utc::now()).is_err());
        // Terminal states are sealed
        t.assign_to(Uuid::new_v4(), Utc::now()).unwrap();
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        t.transition_to(TaskStatus::Done, Utc::now()).unwrap();
        assert!(t.transition_to(TaskStatus::InProgress, Utc::now()).is_err());
    }

    #[test]
    fn test_block_preserves_assignment() {
        let mut t = task();
        let agent = Uuid::new_v4();
        t.assign_to(agent, Utc::now()).unwrap();
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        t.block(BlockedReason::Timeout, Utc::now()).unwrap();
        assert_eq!(t.assigned_agent_id, Some(agent));
        assert_eq!(t.blocked_reason, Some(BlockedReason::Timeout));
        // Resume
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        assert!(t.blocked_reason.is_none());
    }

    #[test]
    fn test_fail_releases_agent() {
        let mut t = task();
        t.assign_to(Uuid::new_v4(), Utc::now()).unwrap();
        t.transition_to(TaskStatus::InProgress, Utc::now()).unwrap();
        t.fail("agent gave up", Utc::now()).unwrap();
        assert!(t.assigned_agent_id.is_none());
        assert_eq!(t.failure_reason.as_deref(), Some("agent gave up"));
    }

    #[test]
    fn test_priority_boost_clamps_at_critical() {
        assert_eq!(TaskPriority::Low.boosted(), TaskPriority::Medium);
        assert_eq!(TaskPriority::High.boosted(), TaskPriority::Critical);
        assert_eq!(TaskPriority::Critical.boosted(), TaskPriority::Critical);
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Critical > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Medium);
        assert!(TaskPriority::Medium > TaskPriority::Low);
    }

    #[test]
    fn test_dependencies_met() {
        let dep = Uuid::new_v4();
        let t = task().with_dependency(dep);
        let mut done = BTreeSet::new();
        assert!(!t.dependencies_met(&done));
        done.insert(dep);
        assert!(t.dependencies_met(&done));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut t = task();
        let id = t.id;
        t = t.with_dependency(id);
        assert!(t.depends_on.is_empty());
        t.depends_on.insert(id);
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_version_bumps_on_transition() {
        let mut t = task();
        let v = t.version;
        t.assign_to(Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(t.version, v + 1);
    }
}

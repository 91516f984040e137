//! Agent domain model.
//!
//! Agents are external worker processes registered with the kernel.
//! The kernel tracks lifecycle, heartbeats, and capabilities; the
//! behavior of an agent lives in the connecting process, not here.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::supervisor::AuthorityLevel;

/// Role of a registered agent.
///
/// Validator, monitor, watchdog, and guardian are ordinary agents
/// distinguished only by this tag and the authority it implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Executes tasks in its bound phase
    Worker,
    /// Observes workflows, may issue corrective actions
    Monitor,
    /// Low-privilege observer with limited intervention rights
    Watchdog,
    /// Highest non-system authority; emergency interventions
    Guardian,
    /// Reviews completed tasks in the validation loop
    Validator,
}

impl AgentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Worker => "worker",
            Self::Monitor => "monitor",
            Self::Watchdog => "watchdog",
            Self::Guardian => "guardian",
            Self::Validator => "validator",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "worker" => Some(Self::Worker),
            "monitor" => Some(Self::Monitor),
            "watchdog" => Some(Self::Watchdog),
            "guardian" => Some(Self::Guardian),
            "validator" => Some(Self::Validator),
            _ => None,
        }
    }

    /// Authority rank carried by agents of this type.
    pub fn authority(&self) -> AuthorityLevel {
        match self {
            Self::Worker | Self::Validator => AuthorityLevel::Worker,
            Self::Watchdog => AuthorityLevel::Watchdog,
            Self::Monitor => AuthorityLevel::Monitor,
            Self::Guardian => AuthorityLevel::Guardian,
        }
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Registered, no task in flight
    Idle,
    /// Executing an assigned task
    Running,
    /// Reported a fatal error
    Failed,
    /// Removed from scheduling by supervisor action; in-flight state preserved
    Quarantined,
    /// Heartbeat TTL elapsed
    Unresponsive,
}

impl Default for AgentStatus {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Failed => "failed",
            Self::Quarantined => "quarantined",
            Self::Unresponsive => "unresponsive",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "idle" => Some(Self::Idle),
            "running" => Some(Self::Running),
            "failed" => Some(Self::Failed),
            "quarantined" => Some(Self::Quarantined),
            "unresponsive" => Some(Self::Unresponsive),
            _ => None,
        }
    }

    /// Valid transitions from this status.
    ///
    /// Quarantine is reachable from any state; leaving quarantine
    /// requires an explicit supervisor release back to idle.
    pub fn valid_transitions(&self) -> &'static [AgentStatus] {
        match self {
            Self::Idle => &[Self::Running, Self::Failed, Self::Unresponsive, Self::Quarantined],
            Self::Running => &[Self::Idle, Self::Failed, Self::Unresponsive, Self::Quarantined],
            Self::Failed => &[Self::Idle, Self::Quarantined],
            Self::Unresponsive => &[Self::Idle, Self::Failed, Self::Quarantined],
            Self::Quarantined => &[Self::Idle],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// Whether the scheduler may hand new work to an agent in this state.
    pub fn is_schedulable(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Coarse health classification maintained alongside status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unknown,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unknown => "unknown",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "healthy" => Some(Self::Healthy),
            "degraded" => Some(Self::Degraded),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// A registered agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Unique identifier
    pub id: Uuid,
    /// Role tag
    pub agent_type: AgentType,
    /// Human-readable name derived at registration (`{type}-{phase}-{n}`)
    pub name: String,
    /// Bound phase (workers and validators)
    pub phase_id: Option<Uuid>,
    /// Advertised capability tags
    pub capabilities: BTreeSet<String>,
    /// Lifecycle status
    pub status: AgentStatus,
    /// Health classification
    pub health_status: HealthStatus,
    /// Task currently held (non-null iff running)
    pub current_task_id: Option<Uuid>,
    /// Last heartbeat observed by the kernel
    pub last_heartbeat_at: DateTime<Utc>,
    /// Automatic restarts within the current escalation window
    pub restart_count: u32,
    /// Hex-encoded ed25519 verifying key issued at registration
    pub public_key: String,
    /// Maximum concurrent tasks this agent accepts
    pub max_concurrent_tasks: u32,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    /// Create a new agent record in the idle state.
    pub fn new(
        agent_type: AgentType,
        name: impl Into<String>,
        phase_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            agent_type,
            name: name.into(),
            phase_id,
            capabilities: BTreeSet::new(),
            status: AgentStatus::Idle,
            health_status: HealthStatus::Unknown,
            current_task_id: None,
            last_heartbeat_at: now,
            restart_count: 0,
            public_key: String::new(),
            max_concurrent_tasks: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a capability tag.
    pub fn with_capability(mut self, cap: impl Into<String>) -> Self {
        self.capabilities.insert(cap.into());
        self
    }

    /// Set the capability set wholesale.
    pub fn with_capabilities<I, S>(mut self, caps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = caps.into_iter().map(Into::into).collect();
        self
    }

    /// Set the stored verifying key.
    pub fn with_public_key(mut self, key: impl Into<String>) -> Self {
        self.public_key = key.into();
        self
    }

    /// Set capacity metadata.
    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    /// Transition to a new status, enforcing the state machine.
    ///
    /// Keeps `current_task_id` consistent: leaving `Running` clears the
    /// held task unless the destination is quarantine, which preserves
    /// in-flight state for forensics.
    pub fn transition_to(
        &mut self,
        new_status: AgentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), crate::domain::errors::KernelError> {
        if !self.status.can_transition_to(new_status) {
            return Err(crate::domain::errors::KernelError::InvalidTransition {
                entity: "agent",
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }
        if self.status == AgentStatus::Running && new_status != AgentStatus::Quarantined {
            self.current_task_id = None;
        }
        self.status = new_status;
        self.updated_at = now;
        Ok(())
    }

    /// Bind a task and move to running.
    pub fn assign_task(
        &mut self,
        task_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), crate::domain::errors::KernelError> {
        self.transition_to(AgentStatus::Running, now)?;
        self.current_task_id = Some(task_id);
        Ok(())
    }

    /// Record a heartbeat.
    pub fn record_heartbeat(&mut self, now: DateTime<Utc>) {
        self.last_heartbeat_at = now;
        self.health_status = HealthStatus::Healthy;
        self.updated_at = now;
    }

    /// Whether the heartbeat TTL has elapsed.
    pub fn heartbeat_expired(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        now - self.last_heartbeat_at > ttl
    }

    /// Whether this agent advertises every capability in `required`.
    pub fn satisfies(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capabilities)
    }

    /// Check the registry invariant: a task is held iff running.
    pub fn check_task_binding(&self) -> bool {
        (self.status == AgentStatus::Running) == self.current_task_id.is_some()
            || self.status == AgentStatus::Quarantined
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_status_machine_idle_running_roundtrip() {
        let mut agent = Agent::new(AgentType::Worker, "worker-req-1", None, now());
        agent.assign_task(Uuid::new_v4(), now()).unwrap();
        assert_eq!(agent.status, AgentStatus::Running);
        assert!(agent.current_task_id.is_some());

        agent.transition_to(AgentStatus::Idle, now()).unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert!(agent.current_task_id.is_none());
    }

    #[test]
    fn test_quarantine_reachable_from_any_state() {
        for start in [
            AgentStatus::Idle,
            AgentStatus::Running,
            AgentStatus::Failed,
            AgentStatus::Unresponsive,
        ] {
            assert!(start.can_transition_to(AgentStatus::Quarantined), "{start:?}");
        }
        // And only idle is reachable from quarantine.
        assert_eq!(AgentStatus::Quarantined.valid_transitions(), &[AgentStatus::Idle]);
    }

    #[test]
    fn test_quarantine_preserves_in_flight_task() {
        let mut agent = Agent::new(AgentType::Worker, "worker-req-1", None, now());
        let task_id = Uuid::new_v4();
        agent.assign_task(task_id, now()).unwrap();
        agent.transition_to(AgentStatus::Quarantined, now()).unwrap();
        assert_eq!(agent.current_task_id, Some(task_id));
    }

    #[test]
    fn test_invalid_transition_names_both_states() {
        let mut agent = Agent::new(AgentType::Worker, "worker-req-1", None, now());
        agent.transition_to(AgentStatus::Quarantined, now()).unwrap();
        let err = agent.transition_to(AgentStatus::Running, now()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("quarantined"));
        assert!(msg.contains("running"));
    }

    #[test]
    fn test_capability_subset_match() {
        let agent = Agent::new(AgentType::Worker, "worker-req-1", None, now())
            .with_capability("python")
            .with_capability("postgres");

        let mut required = BTreeSet::new();
        required.insert("python".to_string());
        assert!(agent.satisfies(&required));

        required.insert("rust".to_string());
        assert!(!agent.satisfies(&required));
    }

    #[test]
    fn test_heartbeat_expiry() {
        let t0 = now();
        let mut agent = Agent::new(AgentType::Worker, "worker-req-1", None, t0);
        agent.record_heartbeat(t0);
        let ttl = chrono::Duration::seconds(30);
        assert!(!agent.heartbeat_expired(t0 + chrono::Duration::seconds(29), ttl));
        assert!(agent.heartbeat_expired(t0 + chrono::Duration::seconds(31), ttl));
    }

    #[test]
    fn test_authority_by_type() {
        assert_eq!(AgentType::Worker.authority(), AuthorityLevel::Worker);
        assert_eq!(AgentType::Guardian.authority(), AuthorityLevel::Guardian);
        assert!(AgentType::Monitor.authority() > AgentType::Watchdog.authority());
    }
}

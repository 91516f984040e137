//! Agent repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{Agent, AgentStatus, AgentType};

/// Filter criteria for listing agents.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub agent_type: Option<AgentType>,
    pub status: Option<AgentStatus>,
    pub phase_id: Option<Uuid>,
}

/// Repository interface for Agent persistence.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn insert(&self, agent: &Agent) -> KernelResult<()>;

    async fn get(&self, id: Uuid) -> KernelResult<Option<Agent>>;

    /// Look up the active (non-quarantined) agent for an identity pair.
    async fn get_by_identity(&self, agent_type: AgentType, name: &str) -> KernelResult<Option<Agent>>;

    async fn update(&self, agent: &Agent) -> KernelResult<()>;

    async fn delete(&self, id: Uuid) -> KernelResult<()>;

    async fn list(&self, filter: AgentFilter) -> KernelResult<Vec<Agent>>;

    /// Agents eligible for new assignments in a phase (idle, not quarantined).
    async fn list_schedulable(&self, phase_id: Uuid) -> KernelResult<Vec<Agent>>;

    /// Idle validators, optionally scoped to a phase.
    async fn list_idle_validators(&self, phase_id: Option<Uuid>) -> KernelResult<Vec<Agent>>;

    /// Count of agents ever registered for a type/phase pair, used to
    /// derive the next registration name counter.
    async fn count_by_type_and_phase(&self, agent_type: AgentType, phase_id: Option<Uuid>) -> KernelResult<u64>;
}

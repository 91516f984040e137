//! Supervisor authority.
//!
//! Rank-ordered emergency operations with pre/post snapshots, an
//! append-only audit log, and bounded reversal. Actions against the
//! same target are serialized by a target-scoped lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    topics, Actor, AgentStatus, AuthorityLevel, SupervisorAction, SupervisorActionType,
    SupervisorConfig, TaskPriority, TaskStatus,
};
use crate::domain::ports::{AgentRepository, Clock, SupervisorRepository, TaskRepository};
use crate::services::event_bus::EventBus;
use crate::services::registry::RegistryService;

/// Who is issuing a supervisor operation.
#[derive(Debug, Clone, Copy)]
pub struct Issuer {
    pub agent_id: Uuid,
    pub authority: AuthorityLevel,
}

impl Issuer {
    /// The kernel itself, at system authority.
    pub fn system() -> Self {
        Self { agent_id: Uuid::nil(), authority: AuthorityLevel::System }
    }
}

/// Supervisor intervention service.
pub struct SupervisorService {
    actions: Arc<dyn SupervisorRepository>,
    tasks: Arc<dyn TaskRepository>,
    agents: Arc<dyn AgentRepository>,
    registry: Arc<RegistryService>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: SupervisorConfig,
    /// Serializes actions per target
    target_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl SupervisorService {
    pub fn new(
        actions: Arc<dyn SupervisorRepository>,
        tasks: Arc<dyn TaskRepository>,
        agents: Arc<dyn AgentRepository>,
        registry: Arc<RegistryService>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            actions,
            tasks,
            agents,
            registry,
            bus,
            clock,
            config,
            target_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve an agent into an issuer, deriving authority from its type.
    pub async fn issuer_for_agent(&self, agent_id: Uuid) -> KernelResult<Issuer> {
        let agent = self
            .agents
            .get(agent_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "agent", id: agent_id.to_string() })?;
        Ok(Issuer { agent_id, authority: agent.agent_type.authority() })
    }

    async fn lock_for(&self, target: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.target_locks.lock().await;
        locks.entry(target).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    fn check_authority(issuer: Issuer, action_type: SupervisorActionType) -> KernelResult<()> {
        let required = action_type.required_authority();
        if issuer.authority < required {
            return Err(KernelError::NotAuthorized {
                actor: format!("agent:{}", issuer.agent_id),
                actual: issuer.authority.rank(),
                required: required.rank(),
            });
        }
        Ok(())
    }

    async fn journal(&self, action: &SupervisorAction) -> KernelResult<()> {
        self.actions.insert(action).await?;
        self.bus
            .publish_correlated(
                topics::SUPERVISOR_ACTION,
                action.target_id,
                Actor::Agent(action.actor_agent_id),
                serde_json::json!({
                    "action_id": action.id,
                    "action_type": action.action_type.as_str(),
                    "authority_level": action.authority_level.rank(),
                }),
                action.correlation_id,
            )
            .await?;
        Ok(())
    }

    /// Cancel a task: forces it to `failed`, releases the assigned agent,
    /// and records pre/post snapshots.
    #[instrument(skip(self), err)]
    pub async fn cancel_task(&self, issuer: Issuer, task_id: Uuid, reason: &str) -> KernelResult<SupervisorAction> {
        Self::check_authority(issuer, SupervisorActionType::CancelTask)?;
        let lock = self.lock_for(task_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.utc_now();
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "task", id: task_id.to_string() })?;

        let mut action = SupervisorAction::new(
            issuer.agent_id,
            issuer.authority,
            SupervisorActionType::CancelTask,
            task_id,
            now,
        );
        action.snapshot_before = serde_json::to_value(&task)?;

        let assignee = task.assigned_agent_id;
        task.fail(format!("cancelled: {reason}"), now)?;
        self.tasks.update(&task).await?;
        if let Some(agent_id) = assignee {
            self.registry.release(agent_id).await?;
        }

        action.snapshot_after = serde_json::to_value(&task)?;
        action.audit(format!("agent:{}", issuer.agent_id), format!("cancel_task: {reason}"), now);
        self.journal(&action).await?;

        self.bus
            .publish_correlated(
                topics::TASK_FAILED,
                task_id,
                Actor::Agent(issuer.agent_id),
                serde_json::json!({ "reason": format!("cancelled: {reason}") }),
                action.correlation_id,
            )
            .await?;
        info!(task = %task_id, "Task cancelled by supervisor");
        Ok(action)
    }

    /// Move capacity from a donor agent to a recipient. Refused when it
    /// would strand the donor's in-flight work.
    #[instrument(skip(self), err)]
    pub async fn reallocate_capacity(
        &self,
        issuer: Issuer,
        donor_agent_id: Uuid,
        recipient_agent_id: Uuid,
        amount: u32,
    ) -> KernelResult<SupervisorAction> {
        Self::check_authority(issuer, SupervisorActionType::ReallocateCapacity)?;
        let lock = self.lock_for(donor_agent_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.utc_now();
        let mut donor = self
            .agents
            .get(donor_agent_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "agent", id: donor_agent_id.to_string() })?;
        let mut recipient = self
            .agents
            .get(recipient_agent_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "agent", id: recipient_agent_id.to_string() })?;

        if amount == 0 || amount > donor.max_concurrent_tasks {
            return Err(KernelError::ValidationFailed(format!(
                "donor {} only has {} slots",
                donor.name, donor.max_concurrent_tasks,
            )));
        }
        let remaining = donor.max_concurrent_tasks - amount;
        if donor.current_task_id.is_some() && remaining == 0 {
            return Err(KernelError::ValidationFailed(format!(
                "donor {} has in-flight work that reallocating {amount} slots would invalidate",
                donor.name,
            )));
        }

        let mut action = SupervisorAction::new(
            issuer.agent_id,
            issuer.authority,
            SupervisorActionType::ReallocateCapacity,
            donor_agent_id,
            now,
        );
        action.snapshot_before = serde_json::json!({
            "donor": &donor,
            "recipient": &recipient,
        });

        donor.max_concurrent_tasks -= amount;
        donor.updated_at = now;
        recipient.max_concurrent_tasks += amount;
        recipient.updated_at = now;
        self.agents.update(&donor).await?;
        self.agents.update(&recipient).await?;

        action.snapshot_after = serde_json::json!({
            "donor": &donor,
            "recipient": &recipient,
        });
        action.audit(
            format!("agent:{}", issuer.agent_id),
            format!("reallocate {amount} slots to {}", recipient.name),
            now,
        );
        self.journal(&action).await?;
        Ok(action)
    }

    /// Promote (or demote) a task's priority; the scheduler re-evaluates
    /// on its next dispatch tick.
    #[instrument(skip(self), err)]
    pub async fn override_priority(
        &self,
        issuer: Issuer,
        task_id: Uuid,
        new_priority: TaskPriority,
    ) -> KernelResult<SupervisorAction> {
        Self::check_authority(issuer, SupervisorActionType::OverridePriority)?;
        let lock = self.lock_for(task_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.utc_now();
        let mut task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "task", id: task_id.to_string() })?;

        let mut action = SupervisorAction::new(
            issuer.agent_id,
            issuer.authority,
            SupervisorActionType::OverridePriority,
            task_id,
            now,
        );
        action.snapshot_before = serde_json::to_value(&task)?;

        task.priority = new_priority;
        task.updated_at = now;
        task.version += 1;
        self.tasks.update(&task).await?;

        action.snapshot_after = serde_json::to_value(&task)?;
        action.audit(
            format!("agent:{}", issuer.agent_id),
            format!("priority overridden to {}", new_priority.as_str()),
            now,
        );
        self.journal(&action).await?;
        Ok(action)
    }

    /// Quarantine an agent: halts new assignments while preserving
    /// in-flight state for forensics.
    #[instrument(skip(self), err)]
    pub async fn quarantine_agent(&self, issuer: Issuer, agent_id: Uuid) -> KernelResult<SupervisorAction> {
        Self::check_authority(issuer, SupervisorActionType::QuarantineAgent)?;
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.utc_now();
        let before = self
            .agents
            .get(agent_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "agent", id: agent_id.to_string() })?;

        let mut action = SupervisorAction::new(
            issuer.agent_id,
            issuer.authority,
            SupervisorActionType::QuarantineAgent,
            agent_id,
            now,
        );
        action.snapshot_before = serde_json::to_value(&before)?;

        let after = self.registry.transition(agent_id, AgentStatus::Quarantined).await?;

        action.snapshot_after = serde_json::to_value(&after)?;
        action.audit(format!("agent:{}", issuer.agent_id), "agent quarantined", now);
        self.journal(&action).await?;
        Ok(action)
    }

    /// Revert a prior action by restoring its before-snapshot.
    ///
    /// Requires authority at least the issuer's, inside the revert
    /// window, and no downstream actions against the same target since
    /// (otherwise rejected with cascaded state).
    #[instrument(skip(self), err)]
    pub async fn revert(&self, reverter: Issuer, action_id: Uuid) -> KernelResult<SupervisorAction> {
        let now = self.clock.utc_now();
        let mut action = self
            .actions
            .get(action_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "supervisor_action", id: action_id.to_string() })?;

        let lock = self.lock_for(action.target_id).await;
        let _guard = lock.lock().await;

        let window = Duration::seconds(self.config.revert_window_seconds as i64);
        action.check_revertible(reverter.authority, now, window)?;

        let downstream = self.actions.list_for_target_since(action.target_id, action.created_at).await?;
        if downstream.iter().any(|a| a.id != action.id && !a.reversed) {
            warn!(action = %action_id, "Revert rejected: cascaded state on target");
            return Err(KernelError::Conflict {
                entity: "cascaded_state",
                id: action.target_id.to_string(),
            });
        }

        match action.action_type {
            SupervisorActionType::CancelTask | SupervisorActionType::OverridePriority => {
                let mut task: crate::domain::models::Task =
                    serde_json::from_value(action.snapshot_before.clone())?;
                let current = self
                    .tasks
                    .get(task.id)
                    .await?
                    .ok_or(KernelError::NotFound { entity: "task", id: task.id.to_string() })?;

                // Restoring a bound snapshot must re-seat the agent
                // binding, not just rewrite the task row. If normal
                // dispatch has moved the snapshotted agent onto other
                // work in the meantime, the revert is rejected as
                // cascaded state instead of creating a ghost assignment.
                let needs_binding = task.status.requires_assignee()
                    || task.status == TaskStatus::ValidationInProgress;
                if needs_binding {
                    if let Some(agent_id) = task.assigned_agent_id {
                        match self.registry.get(agent_id).await? {
                            Some(agent) if agent.current_task_id == Some(task.id) => {}
                            Some(agent) if agent.status.is_schedulable() => {
                                self.registry.bind_task(agent_id, task.id).await?;
                            }
                            _ => {
                                warn!(
                                    action = %action_id,
                                    agent = %agent_id,
                                    "Revert rejected: snapshotted assignee is no longer available"
                                );
                                return Err(KernelError::Conflict {
                                    entity: "cascaded_state",
                                    id: agent_id.to_string(),
                                });
                            }
                        }
                    }
                }

                task.version = current.version + 1;
                task.updated_at = now;
                self.tasks.update(&task).await?;
            }
            SupervisorActionType::QuarantineAgent => {
                self.registry.transition(action.target_id, AgentStatus::Idle).await?;
                self.registry.rebuild_index().await?;
            }
            SupervisorActionType::ReallocateCapacity => {
                let donor: crate::domain::models::Agent =
                    serde_json::from_value(action.snapshot_before["donor"].clone())?;
                let recipient: crate::domain::models::Agent =
                    serde_json::from_value(action.snapshot_before["recipient"].clone())?;
                self.agents.update(&donor).await?;
                self.agents.update(&recipient).await?;
            }
        }

        action.reversed = true;
        action.audit(format!("agent:{}", reverter.agent_id), "action reverted", now);
        action.updated_at = now;
        self.actions.update(&action).await?;

        self.bus
            .publish_correlated(
                topics::SUPERVISOR_REVERTED,
                action.target_id,
                Actor::Agent(reverter.agent_id),
                serde_json::json!({ "action_id": action.id }),
                action.correlation_id,
            )
            .await?;
        info!(action = %action_id, "Supervisor action reverted");
        Ok(action)
    }

    pub async fn get_action(&self, action_id: Uuid) -> KernelResult<Option<SupervisorAction>> {
        self.actions.get(action_id).await
    }

    pub async fn actions_for_target(&self, target_id: Uuid) -> KernelResult<Vec<SupervisorAction>> {
        self.actions.list_for_target(target_id).await
    }
}

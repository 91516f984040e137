//! Task queue and scheduler.
//!
//! Dispatch matches pending tasks to idle agents on four conditions:
//! dependency readiness, phase match, capability subset, and the parent
//! ticket's approval gate. Among eligible tasks the order is priority
//! desc, then oldest created_at, then lowest id as the stable tiebreak.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    topics, Actor, Agent, AgentStatus, BlockedReason, SchedulingConfig, Task, TaskStatus,
};
use crate::domain::ports::{Clock, PhaseRepository, TaskRepository, TicketRepository};
use crate::services::deadline_queue::{Deadline, DeadlineKind, DeadlineQueue};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::event_bus::EventBus;
use crate::services::registry::RegistryService;

/// One dispatch decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub task_id: Uuid,
    pub agent_id: Uuid,
}

/// Priority/phase/capability-aware dispatcher over the task DAG.
pub struct SchedulerService {
    tasks: Arc<dyn TaskRepository>,
    tickets: Arc<dyn TicketRepository>,
    phases: Arc<dyn PhaseRepository>,
    registry: Arc<RegistryService>,
    resolver: DependencyResolver,
    bus: Arc<EventBus>,
    deadlines: Arc<DeadlineQueue>,
    clock: Arc<dyn Clock>,
    config: SchedulingConfig,
}

impl SchedulerService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        tickets: Arc<dyn TicketRepository>,
        phases: Arc<dyn PhaseRepository>,
        registry: Arc<RegistryService>,
        bus: Arc<EventBus>,
        deadlines: Arc<DeadlineQueue>,
        clock: Arc<dyn Clock>,
        config: SchedulingConfig,
    ) -> Self {
        Self {
            tasks,
            tickets,
            phases,
            registry,
            resolver: DependencyResolver::new(),
            bus,
            deadlines,
            clock,
            config,
        }
    }

    /// Submit a task to the queue.
    ///
    /// Validates structure, dependency existence, and acyclicity;
    /// a submission that would close a cycle is refused permanently.
    #[instrument(skip(self, task), fields(task_id = %task.id), err)]
    pub async fn submit(&self, task: Task) -> KernelResult<Uuid> {
        task.validate()?;

        if !task.depends_on.is_empty() {
            let existing = self.tasks.list(Default::default()).await?;
            self.resolver.validate_dependencies(&task, &existing)?;
            self.resolver.check_acyclic_with(&task, &existing)?;
        }

        self.tasks.insert(&task).await?;
        self.bus
            .publish(topics::TASK_CREATED, task.id, Actor::System, serde_json::json!({
                "task_id": task.id,
                "ticket_id": task.ticket_id,
                "phase_id": task.phase_id,
                "priority": task.priority.as_str(),
            }))
            .await?;

        let done = self.tasks.done_task_ids().await?;
        if task.dependencies_met(&done) {
            self.bus
                .publish(topics::TASK_READY, task.id, Actor::System, serde_json::json!({}))
                .await?;
        }

        Ok(task.id)
    }

    /// Whether a pending task may be handed to an agent right now.
    async fn is_eligible(&self, task: &Task, done: &BTreeSet<Uuid>) -> KernelResult<bool> {
        if !task.dependencies_met(done) {
            return Ok(false);
        }
        let ticket = self
            .tickets
            .get(task.ticket_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "ticket", id: task.ticket_id.to_string() })?;
        Ok(ticket.approval_status.allows_dispatch() && !ticket.archived)
    }

    /// One dispatch pass: match eligible pending tasks to idle agents.
    ///
    /// Each returned assignment has already transitioned the task to
    /// `assigned`, bound the agent, and published `task.assigned` on the
    /// agent's partition.
    #[instrument(skip(self))]
    pub async fn dispatch_tick(&self) -> KernelResult<Vec<Assignment>> {
        let done = self.tasks.done_task_ids().await?;
        let pending = self.tasks.list_pending_in_dispatch_order().await?;
        let mut assignments = Vec::new();
        let mut used_agents: BTreeSet<Uuid> = BTreeSet::new();

        for task in pending {
            if !self.is_eligible(&task, &done).await? {
                continue;
            }

            let candidates = self
                .registry
                .candidates_for(task.phase_id, &task.required_capabilities)
                .await?;
            let candidate = candidates.into_iter().find(|a| !used_agents.contains(&a.id));

            let Some(agent) = candidate else {
                self.log_capability_mismatch(&task).await?;
                continue;
            };

            match self.assign(&task, &agent).await {
                Ok(assignment) => {
                    used_agents.insert(assignment.agent_id);
                    assignments.push(assignment);
                }
                // Lost a race with a concurrent tick; the next pass retries.
                Err(KernelError::Conflict { .. }) => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(assignments)
    }

    async fn assign(&self, task: &Task, agent: &Agent) -> KernelResult<Assignment> {
        let now = self.clock.utc_now();
        let mut task = task.clone();
        task.assign_to(agent.id, now)?;
        self.tasks.update(&task).await?;

        if let Err(e) = self.registry.bind_task(agent.id, task.id).await {
            // Roll the task back so it is picked up again.
            let mut rollback = task.clone();
            if rollback.transition_to(TaskStatus::Pending, self.clock.utc_now()).is_ok() {
                rollback.assigned_agent_id = None;
                let _ = self.tasks.update(&rollback).await;
            }
            return Err(e);
        }

        // On the agent's partition so the assignment precedes anything
        // else the agent observes about this task.
        self.bus
            .publish(topics::TASK_ASSIGNED, agent.id, Actor::System, serde_json::json!({
                "task_id": task.id,
                "agent_id": agent.id,
                "ticket_id": task.ticket_id,
                "phase_id": task.phase_id,
                "description": task.description,
                "feedback": task.last_validation_feedback,
            }))
            .await?;

        info!(task = %task.id, agent = %agent.name, "Task assigned");
        Ok(Assignment { task_id: task.id, agent_id: agent.id })
    }

    async fn log_capability_mismatch(&self, task: &Task) -> KernelResult<()> {
        // Which required tags no schedulable agent in the phase covers.
        let phase_agents = self.registry.candidates_for(task.phase_id, &BTreeSet::new()).await?;
        let available: BTreeSet<String> =
            phase_agents.iter().flat_map(|a| a.capabilities.iter().cloned()).collect();
        let missing: Vec<&String> =
            task.required_capabilities.iter().filter(|c| !available.contains(*c)).collect();
        if missing.is_empty() {
            // Agents exist but are busy; not a mismatch.
            return Ok(());
        }
        warn!(task = %task.id, ?missing, "capability_mismatch: no agent advertises required capabilities");
        Ok(())
    }

    /// Up to `limit` mutually independent ready tasks, for parallel
    /// dispatch in a single transaction.
    pub async fn get_ready_tasks(&self, limit: usize) -> KernelResult<Vec<Task>> {
        let done = self.tasks.done_task_ids().await?;
        let pending = self.tasks.list_pending_in_dispatch_order().await?;
        let mut ready = Vec::new();
        for task in pending {
            if self.is_eligible(&task, &done).await? {
                ready.push(task);
            }
        }
        let all = self.tasks.list(Default::default()).await?;
        Ok(self.resolver.independent_subset(&ready, &all, limit))
    }

    /// Agent reports it began executing its assignment.
    pub async fn start_task(&self, task_id: Uuid, agent_id: Uuid) -> KernelResult<Task> {
        let now = self.clock.utc_now();
        let mut task = self.require(task_id).await?;
        self.check_assignee(&task, agent_id)?;
        task.transition_to(TaskStatus::InProgress, now)?;
        self.tasks.update(&task).await?;

        let timeout = self.phase_timeout(task.phase_id).await?;
        self.deadlines.schedule(Deadline {
            due_at: now + timeout,
            kind: DeadlineKind::TaskTimeout { task_id },
        });

        self.bus
            .publish(topics::TASK_STARTED, task_id, Actor::Agent(agent_id), serde_json::json!({}))
            .await?;
        Ok(task)
    }

    /// Agent claims the task is done.
    ///
    /// Validation-enabled tasks move to `under_review` (incrementing the
    /// iteration); others complete immediately. Returns the task so the
    /// caller can hand review-bound work to the validation loop.
    pub async fn claim_done(&self, task_id: Uuid, agent_id: Uuid) -> KernelResult<Task> {
        let now = self.clock.utc_now();
        let mut task = self.require(task_id).await?;
        self.check_assignee(&task, agent_id)?;

        if task.validation_enabled {
            task.transition_to(TaskStatus::UnderReview, now)?;
            self.tasks.update(&task).await?;
        } else {
            task.transition_to(TaskStatus::Done, now)?;
            self.tasks.update(&task).await?;
            self.registry.release(agent_id).await?;
            self.publish_completed(&task).await?;
        }
        Ok(task)
    }

    /// Terminal completion bookkeeping shared with the validation loop:
    /// emit the event and surface newly ready dependents.
    pub async fn publish_completed(&self, task: &Task) -> KernelResult<()> {
        self.bus
            .publish(topics::TASK_COMPLETED, task.id, Actor::System, serde_json::json!({
                "ticket_id": task.ticket_id,
            }))
            .await?;

        let done = self.tasks.done_task_ids().await?;
        for dependent in self.tasks.list_dependents(task.id).await? {
            if dependent.status == TaskStatus::Pending && dependent.dependencies_met(&done) {
                self.bus
                    .publish(topics::TASK_READY, dependent.id, Actor::System, serde_json::json!({}))
                    .await?;
            }
        }
        Ok(())
    }

    /// Agent gives up on its assignment.
    pub async fn report_failed(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        reason: &str,
    ) -> KernelResult<Task> {
        let now = self.clock.utc_now();
        let mut task = self.require(task_id).await?;
        self.check_assignee(&task, agent_id)?;
        task.fail(reason, now)?;
        self.tasks.update(&task).await?;
        self.registry.release(agent_id).await?;
        self.bus
            .publish(topics::TASK_FAILED, task_id, Actor::Agent(agent_id), serde_json::json!({
                "reason": reason,
            }))
            .await?;
        Ok(task)
    }

    /// Re-enter dispatch after a failed review. The previous assignee is
    /// preferred: if it is idle the task goes straight back to it.
    pub async fn resume_needs_work(&self, task_id: Uuid) -> KernelResult<Task> {
        let now = self.clock.utc_now();
        let mut task = self.require(task_id).await?;
        if task.status != TaskStatus::NeedsWork {
            return Err(KernelError::InvalidTransition {
                entity: "task",
                from: task.status.as_str().to_string(),
                to: TaskStatus::InProgress.as_str().to_string(),
            });
        }

        let mut same_session = None;
        if let Some(agent_id) = task.assigned_agent_id {
            // The worker stays bound through the review, so the common
            // case is an agent still running this very task.
            match self.registry.get(agent_id).await? {
                Some(agent)
                    if agent.current_task_id == Some(task_id)
                        && agent.status == AgentStatus::Running =>
                {
                    same_session = Some(agent_id);
                }
                Some(agent) if agent.status.is_schedulable() => {
                    self.registry.bind_task(agent_id, task_id).await?;
                    same_session = Some(agent_id);
                }
                _ => {}
            }
        }

        if let Some(agent_id) = same_session {
            task.transition_to(TaskStatus::InProgress, now)?;
            self.tasks.update(&task).await?;
            self.bus
                .publish(topics::TASK_ASSIGNED, agent_id, Actor::System, serde_json::json!({
                    "task_id": task.id,
                    "agent_id": agent_id,
                    "resumed": true,
                    "feedback": task.last_validation_feedback,
                }))
                .await?;
        } else {
            // The assignee is gone; requeue for a fresh dispatch.
            task.transition_to(TaskStatus::Pending, now)?;
            task.assigned_agent_id = None;
            self.tasks.update(&task).await?;
            self.bus
                .publish(topics::TASK_READY, task_id, Actor::System, serde_json::json!({}))
                .await?;
        }
        Ok(task)
    }

    /// Fired task-timeout deadline: an overdue in-progress task becomes
    /// blocked with reason timeout, keeping its assignment for resumption.
    pub async fn handle_task_timeout(&self, task_id: Uuid) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let Some(mut task) = self.tasks.get(task_id).await? else {
            return Ok(());
        };
        if task.status != TaskStatus::InProgress {
            return Ok(()); // resolved before the deadline fired
        }
        let timeout = self.phase_timeout(task.phase_id).await?;
        let overdue = task.started_at.is_some_and(|started| now - started >= timeout);
        if !overdue {
            return Ok(());
        }

        task.block(BlockedReason::Timeout, now)?;
        self.tasks.update(&task).await?;
        self.bus
            .publish(topics::TASK_BLOCKED, task_id, Actor::System, serde_json::json!({
                "reason": "timeout",
            }))
            .await?;
        warn!(task = %task_id, "Task blocked on in-progress timeout");
        Ok(())
    }

    /// Sweep for overdue in-progress tasks; a safety net behind the
    /// per-task deadlines, also used after restarts.
    pub async fn sweep_timeouts(&self) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let default_cutoff =
            now - Duration::seconds(self.config.task_in_progress_timeout_seconds as i64);
        for task in self.tasks.list_in_progress_started_before(default_cutoff).await? {
            self.handle_task_timeout(task.id).await?;
        }
        Ok(())
    }

    async fn phase_timeout(&self, phase_id: Uuid) -> KernelResult<Duration> {
        let seconds = self
            .phases
            .get_phase(phase_id)
            .await?
            .and_then(|p| p.task_timeout_seconds)
            .unwrap_or(self.config.task_in_progress_timeout_seconds);
        Ok(Duration::seconds(seconds as i64))
    }

    fn check_assignee(&self, task: &Task, agent_id: Uuid) -> KernelResult<()> {
        if task.assigned_agent_id != Some(agent_id) {
            return Err(KernelError::NotAuthorized {
                actor: format!("agent:{agent_id}"),
                actual: 1,
                required: 1,
            });
        }
        Ok(())
    }

    pub async fn get(&self, task_id: Uuid) -> KernelResult<Option<Task>> {
        self.tasks.get(task_id).await
    }

    async fn require(&self, task_id: Uuid) -> KernelResult<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "task", id: task_id.to_string() })
    }
}

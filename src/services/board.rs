//! Ticket and phase engine.
//!
//! Owns the Kanban board (column moves, WIP limits, auto-transitions),
//! the phase gate, artifact submissions, and the context handoff at
//! phase boundaries. The aggregator is pure; the summarizer is the
//! pluggable `ContextSummarizer` port.

use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    topics, validate_artifact_file, Actor, AgentResult, ApprovalStatus, AuthorityLevel,
    BoardColumn, BoardConfig, Discovery, ResultKind, Task, Ticket, ValidationReview,
    WorkflowResult,
};
use crate::domain::ports::{
    ArtifactRepository, Clock, ContextSummarizer, DiscoveryRepository, PhaseRepository,
    ReviewRepository, TaskRepository, TicketRepository,
};
use crate::services::event_bus::EventBus;

/// Ticket/board/phase-gate engine.
pub struct BoardService {
    tickets: Arc<dyn TicketRepository>,
    tasks: Arc<dyn TaskRepository>,
    phases: Arc<dyn PhaseRepository>,
    discoveries: Arc<dyn DiscoveryRepository>,
    reviews: Arc<dyn ReviewRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    summarizer: Arc<dyn ContextSummarizer>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: BoardConfig,
}

impl BoardService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        tasks: Arc<dyn TaskRepository>,
        phases: Arc<dyn PhaseRepository>,
        discoveries: Arc<dyn DiscoveryRepository>,
        reviews: Arc<dyn ReviewRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        summarizer: Arc<dyn ContextSummarizer>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: BoardConfig,
    ) -> Self {
        Self {
            tickets,
            tasks,
            phases,
            discoveries,
            reviews,
            artifacts,
            summarizer,
            bus,
            clock,
            config,
        }
    }

    /// Create a ticket and announce it. Tickets pending approval are
    /// announced on the approval topic as well.
    #[instrument(skip(self, ticket), fields(ticket_id = %ticket.id))]
    pub async fn create_ticket(&self, ticket: Ticket) -> KernelResult<Ticket> {
        self.tickets.insert(&ticket).await?;
        self.bus
            .publish(topics::TICKET_CREATED, ticket.id, Actor::System, serde_json::json!({
                "ticket_id": ticket.id,
                "phase_id": ticket.phase_id,
                "approval_status": ticket.approval_status.as_str(),
            }))
            .await?;
        if ticket.approval_status == ApprovalStatus::PendingReview {
            self.bus
                .publish(topics::TICKET_APPROVAL_PENDING, ticket.id, Actor::System, serde_json::json!({
                    "deadline": ticket.approval_deadline_at,
                }))
                .await?;
        }
        Ok(ticket)
    }

    /// First board column (by sequence) whose mapping accepts a phase.
    pub async fn column_for_phase(&self, phase_id: Uuid) -> KernelResult<Option<BoardColumn>> {
        Ok(self
            .phases
            .list_columns()
            .await?
            .into_iter()
            .find(|c| c.accepts_phase(phase_id)))
    }

    /// Move a ticket to a column.
    ///
    /// Without `force`, the move requires the column's phase mapping to
    /// contain the ticket's phase and the WIP limit to hold. With
    /// `force`, the caller's authority must be at least guardian; the
    /// move then bypasses both checks.
    #[instrument(skip(self), err)]
    pub async fn move_ticket(
        &self,
        ticket_id: Uuid,
        column_id: Uuid,
        force: bool,
        authority: AuthorityLevel,
    ) -> KernelResult<Ticket> {
        if force && authority < AuthorityLevel::Guardian {
            return Err(KernelError::NotAuthorized {
                actor: authority.as_str().to_string(),
                actual: authority.rank(),
                required: AuthorityLevel::Guardian.rank(),
            });
        }

        let mut ticket = self.require_ticket(ticket_id).await?;
        let column = self.require_column(column_id).await?;

        if !force {
            if !column.accepts_phase(ticket.phase_id) {
                return Err(KernelError::InvalidTransition {
                    entity: "ticket",
                    from: ticket.column_id.to_string(),
                    to: column.name.clone(),
                });
            }
            let occupancy = self.tickets.count_in_column(column_id).await? as u32;
            if column.over_wip(occupancy) {
                return Err(KernelError::WipExceeded {
                    column_id,
                    limit: column.wip_limit.unwrap_or(0),
                });
            }
        }

        let from = ticket.column_id;
        ticket.move_to_column(column_id, self.clock.utc_now());
        self.tickets.update(&ticket).await?;
        self.bus
            .publish(topics::TICKET_TRANSITIONED, ticket_id, Actor::System, serde_json::json!({
                "from_column": from,
                "to_column": column_id,
                "forced": force,
            }))
            .await?;

        self.cascade_auto_transitions(ticket).await
    }

    /// Follow `auto_transition_to` links while their preconditions hold.
    async fn cascade_auto_transitions(&self, mut ticket: Ticket) -> KernelResult<Ticket> {
        loop {
            let column = self.require_column(ticket.column_id).await?;
            if column.is_terminal {
                break;
            }
            let Some(next_id) = column.auto_transition_to else {
                break;
            };
            let next = self.require_column(next_id).await?;
            if !next.accepts_phase(ticket.phase_id) {
                break;
            }
            let occupancy = self.tickets.count_in_column(next_id).await? as u32;
            if next.over_wip(occupancy) {
                break;
            }

            let from = ticket.column_id;
            ticket.move_to_column(next_id, self.clock.utc_now());
            self.tickets.update(&ticket).await?;
            self.bus
                .publish(topics::TICKET_TRANSITIONED, ticket.id, Actor::System, serde_json::json!({
                    "from_column": from,
                    "to_column": next_id,
                    "auto": true,
                }))
                .await?;
            info!(ticket = %ticket.id, column = %next.name, "Auto-transitioned ticket");
        }
        Ok(ticket)
    }

    /// Mark a phase completion criterion satisfied (task completions and
    /// artifact submissions drive this).
    pub async fn satisfy_criterion(&self, phase_id: Uuid, criterion: &str) -> KernelResult<()> {
        let mut phase = self
            .phases
            .get_phase(phase_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "phase", id: phase_id.to_string() })?;
        let mut found = false;
        for def in &mut phase.done_definitions {
            if def.criterion == criterion {
                def.satisfied = true;
                found = true;
            }
        }
        if !found {
            return Err(KernelError::NotFound { entity: "done_definition", id: criterion.to_string() });
        }
        phase.updated_at = self.clock.utc_now();
        self.phases.update_phase(&phase).await
    }

    /// The compound phase-gate check. `via_discovery` marks transitions
    /// issued by a discovery branch, which skip the allowed-transitions
    /// constraint.
    pub async fn check_phase_gate(
        &self,
        ticket: &Ticket,
        next_phase_id: Uuid,
        via_discovery: bool,
    ) -> KernelResult<()> {
        let current = self
            .phases
            .get_phase(ticket.phase_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "phase", id: ticket.phase_id.to_string() })?;

        let missing = current.unsatisfied_criteria();
        let paths = self.artifacts.list_paths_for_ticket_phase(ticket.id, ticket.phase_id).await?;
        let expected_outputs_missing = current.unresolved_outputs(&paths);

        let transition_allowed = current.allows_transition_to(next_phase_id) || via_discovery;

        if !missing.is_empty() || !expected_outputs_missing.is_empty() || !transition_allowed {
            let mut missing = missing;
            if !transition_allowed {
                missing.push(format!("transition to {next_phase_id} not in allowed_transitions"));
            }
            self.bus
                .publish(topics::PHASE_GATE_REJECTED, ticket.id, Actor::System, serde_json::json!({
                    "phase_id": ticket.phase_id,
                    "next_phase_id": next_phase_id,
                    "missing": missing,
                    "expected_outputs_missing": expected_outputs_missing,
                }))
                .await?;
            return Err(KernelError::PhaseGateRejected { missing, expected_outputs_missing });
        }
        Ok(())
    }

    /// Advance a ticket to its next phase.
    ///
    /// Runs the phase gate, aggregates the exiting phase's context,
    /// summarizes it, stores both on the ticket, and relocates the
    /// ticket to a column accepting the new phase.
    #[instrument(skip(self), err)]
    pub async fn advance_phase(
        &self,
        ticket_id: Uuid,
        next_phase_id: Uuid,
        via_discovery: bool,
    ) -> KernelResult<Ticket> {
        let mut ticket = self.require_ticket(ticket_id).await?;
        self.check_phase_gate(&ticket, next_phase_id, via_discovery).await?;

        let tasks = self.tasks.list_by_ticket(ticket_id).await?;
        let phase_tasks: Vec<&Task> =
            tasks.iter().filter(|t| t.phase_id == ticket.phase_id).collect();
        let discoveries = self.discoveries.list_for_ticket_phase(ticket_id, ticket.phase_id).await?;
        let mut reviews = Vec::new();
        for task in &phase_tasks {
            reviews.extend(self.reviews.list_by_task(task.id).await?);
        }

        let aggregated = aggregate_context(&ticket, &phase_tasks, &discoveries, &reviews);
        let summary = self.summarizer.summarize(&aggregated, self.config.context_summary_max_bytes);

        let from_phase = ticket.phase_id;
        ticket.enter_phase(next_phase_id, aggregated, summary, self.clock.utc_now());
        self.tickets.update(&ticket).await?;

        self.bus
            .publish(topics::TICKET_TRANSITIONED, ticket_id, Actor::System, serde_json::json!({
                "from_phase": from_phase,
                "to_phase": next_phase_id,
                "via_discovery": via_discovery,
            }))
            .await?;

        // Relocate to the first column mapped to the new phase that has
        // WIP headroom; stay put if none qualifies.
        let columns = self.phases.list_columns().await?;
        for column in columns.into_iter().filter(|c| c.accepts_phase(next_phase_id)) {
            let occupancy = self.tickets.count_in_column(column.id).await? as u32;
            if !column.over_wip(occupancy) {
                let ticket = self.move_ticket(ticket_id, column.id, false, AuthorityLevel::System).await?;
                return Ok(ticket);
            }
        }
        warn!(ticket = %ticket_id, "No column with WIP headroom accepts the new phase; ticket not moved");
        Ok(ticket)
    }

    /// Submit a task-level markdown result. The submitter must be the
    /// task's assigned agent; the file is validated at submission time.
    pub async fn submit_agent_result(
        &self,
        task_id: Uuid,
        agent_id: Uuid,
        markdown_path: &str,
        kind: ResultKind,
        summary: &str,
    ) -> KernelResult<AgentResult> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "task", id: task_id.to_string() })?;
        if task.assigned_agent_id != Some(agent_id) {
            return Err(KernelError::NotAuthorized {
                actor: format!("agent:{agent_id}"),
                actual: 1,
                required: 1,
            });
        }
        validate_artifact_file(markdown_path)?;

        let result = AgentResult::new(task_id, agent_id, markdown_path, kind, self.clock.utc_now())
            .with_summary(summary);
        self.artifacts.insert_agent_result(&result).await?;
        Ok(result)
    }

    /// Submit a workflow-level (ticket) final result.
    pub async fn submit_workflow_result(
        &self,
        workflow_id: Uuid,
        markdown_path: &str,
        evidence: Vec<String>,
    ) -> KernelResult<WorkflowResult> {
        // The workflow container must exist.
        self.require_ticket(workflow_id).await?;
        validate_artifact_file(markdown_path)?;

        let mut result = WorkflowResult::new(workflow_id, markdown_path, self.clock.utc_now());
        result.evidence = evidence;
        self.artifacts.insert_workflow_result(&result).await?;
        Ok(result)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> KernelResult<Option<Ticket>> {
        self.tickets.get(ticket_id).await
    }

    async fn require_ticket(&self, ticket_id: Uuid) -> KernelResult<Ticket> {
        self.tickets
            .get(ticket_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "ticket", id: ticket_id.to_string() })
    }

    async fn require_column(&self, column_id: Uuid) -> KernelResult<BoardColumn> {
        self.phases
            .get_column(column_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "board_column", id: column_id.to_string() })
    }
}

/// Pure aggregation of a phase's outcome for the handoff context:
/// ticket goal, task results, discoveries, and review feedback in
/// chronological order.
pub fn aggregate_context(
    ticket: &Ticket,
    phase_tasks: &[&Task],
    discoveries: &[Discovery],
    reviews: &[ValidationReview],
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Goal\n{}\n", ticket.goal));

    if !ticket.context_summary.is_empty() {
        out.push_str(&format!("\n# Carried context\n{}\n", ticket.context_summary));
    }

    out.push_str("\n# Task outcomes\n");
    for task in phase_tasks {
        out.push_str(&format!(
            "- {} [{}] {}\n",
            task.title,
            task.status.as_str(),
            task.failure_reason.as_deref().unwrap_or(""),
        ));
    }

    if !discoveries.is_empty() {
        out.push_str("\n# Discoveries\n");
        for d in discoveries {
            out.push_str(&format!("- [{}] {}\n", d.discovery_type.as_str(), d.description));
        }
    }

    if !reviews.is_empty() {
        out.push_str("\n# Reviews\n");
        for r in reviews {
            out.push_str(&format!(
                "- iteration {} {}: {}\n",
                r.iteration_number,
                if r.validation_passed { "passed" } else { "failed" },
                r.feedback,
            ));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_aggregate_context_is_deterministic() {
        let now = Utc::now();
        let ticket = Ticket::new("T", "ship it", Uuid::new_v4(), Uuid::new_v4(), now);
        let task = Task::new(ticket.id, ticket.phase_id, "write parser", "d", now);
        let tasks = vec![&task];
        let discoveries = vec![Discovery::new(
            task.id,
            crate::domain::models::DiscoveryType::Bug,
            "off by one",
            now,
        )];
        let reviews = vec![ValidationReview::new(task.id, Uuid::new_v4(), 1, false, "add null check", now)];

        let a = aggregate_context(&ticket, &tasks, &discoveries, &reviews);
        let b = aggregate_context(&ticket, &tasks, &discoveries, &reviews);
        assert_eq!(a, b);
        assert!(a.contains("ship it"));
        assert!(a.contains("write parser"));
        assert!(a.contains("off by one"));
        assert!(a.contains("add null check"));
    }
}

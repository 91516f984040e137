//! Diagnostic monitor.
//!
//! Watches active workflows for the stuck condition: work exists, none
//! of it is moving, and no validated final result has been submitted.
//! On trigger it snapshots context and injects a recovery task through
//! the discovery service, then sits out the cooldown.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{
    topics, Actor, DiagnosticRun, DiagnosticStatus, DiscoveryConfig, DiscoveryType, Task,
    Ticket,
};
use crate::domain::ports::{
    ArtifactRepository, Clock, DiagnosticRepository, ReviewRepository, TaskRepository,
    TicketRepository,
};
use crate::services::discovery::DiscoveryService;
use crate::services::event_bus::EventBus;

/// Detects stuck workflows and injects recovery work.
pub struct DiagnosticService {
    tickets: Arc<dyn TicketRepository>,
    tasks: Arc<dyn TaskRepository>,
    artifacts: Arc<dyn ArtifactRepository>,
    diagnostics: Arc<dyn DiagnosticRepository>,
    reviews: Arc<dyn ReviewRepository>,
    discovery: Arc<DiscoveryService>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: DiscoveryConfig,
}

impl DiagnosticService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tickets: Arc<dyn TicketRepository>,
        tasks: Arc<dyn TaskRepository>,
        artifacts: Arc<dyn ArtifactRepository>,
        diagnostics: Arc<dyn DiagnosticRepository>,
        reviews: Arc<dyn ReviewRepository>,
        discovery: Arc<DiscoveryService>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: DiscoveryConfig,
    ) -> Self {
        Self { tickets, tasks, artifacts, diagnostics, reviews, discovery, bus, clock, config }
    }

    /// One monitor pass over every active workflow.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> KernelResult<Vec<DiagnosticRun>> {
        let mut fired = Vec::new();
        for ticket in self.tickets.list_active().await? {
            if let Some(run) = self.evaluate_workflow(&ticket).await? {
                fired.push(run);
            }
        }
        Ok(fired)
    }

    /// The stuck predicate; all clauses must hold.
    async fn is_stuck(&self, ticket: &Ticket, tasks: &[Task]) -> KernelResult<bool> {
        // (i) at least one task exists
        if tasks.is_empty() {
            return Ok(false);
        }
        // (ii) none of it is active
        if tasks.iter().any(|t| t.status.is_active()) {
            return Ok(false);
        }
        // (iii) no validated final result
        if self.artifacts.has_validated_workflow_result(ticket.id).await? {
            return Ok(false);
        }
        let now = self.clock.utc_now();
        // (iv) cooldown since the last run elapsed
        if let Some(last) = self.diagnostics.latest_for_workflow(ticket.id).await? {
            if last.in_cooldown(now) {
                return Ok(false);
            }
        }
        // (v) inactivity past the stuck threshold
        let threshold = Duration::seconds(self.config.stuck_threshold_seconds as i64);
        let last_activity = self
            .tasks
            .last_activity_for_ticket(ticket.id)
            .await?
            .unwrap_or(ticket.updated_at);
        Ok(now - last_activity > threshold)
    }

    async fn evaluate_workflow(&self, ticket: &Ticket) -> KernelResult<Option<DiagnosticRun>> {
        let tasks = self.tasks.list_by_ticket(ticket.id).await?;
        if !self.is_stuck(ticket, &tasks).await? {
            return Ok(None);
        }

        let now = self.clock.utc_now();
        let snapshot = self.context_snapshot(ticket, &tasks);
        let cooldown_until = now + Duration::seconds(self.config.diagnostic_cooldown_seconds as i64);
        let mut run = DiagnosticRun::new(
            ticket.id,
            "no_active_tasks_no_result",
            snapshot,
            cooldown_until,
            now,
        );
        self.diagnostics.insert(&run).await?;

        self.bus
            .publish(topics::DIAGNOSTIC_STARTED, ticket.id, Actor::System, serde_json::json!({
                "diagnostic_run_id": run.id,
                "trigger_reason": run.trigger_reason,
            }))
            .await?;

        // Recovery work goes through the discovery service, spawned into
        // the workflow's current phase off the most recent task. The
        // stuck predicate guarantees at least one task exists.
        let Some(source) = tasks.iter().max_by_key(|t| t.updated_at) else {
            return Ok(None);
        };
        let branch = self
            .discovery
            .record_discovery_and_branch(
                source.id,
                DiscoveryType::DiagnosticNoResult,
                &format!("workflow {} stalled with no validated result", ticket.id),
                ticket.phase_id,
                &recovery_description(ticket),
                true,
            )
            .await?;

        run.spawned_task_ids.push(branch.spawned_task.id);
        run.status = DiagnosticStatus::Completed;
        run.updated_at = self.clock.utc_now();
        self.diagnostics.update(&run).await?;

        self.bus
            .publish(topics::DIAGNOSTIC_COMPLETED, ticket.id, Actor::System, serde_json::json!({
                "diagnostic_run_id": run.id,
                "spawned_task_ids": run.spawned_task_ids,
            }))
            .await?;

        info!(workflow = %ticket.id, task = %branch.spawned_task.id, "Recovery task injected");
        Ok(Some(run))
    }

    /// Workflow goal, recent task summaries, and failure signatures.
    fn context_snapshot(&self, ticket: &Ticket, tasks: &[Task]) -> serde_json::Value {
        let mut recent: Vec<&Task> = tasks.iter().collect();
        recent.sort_by_key(|t| std::cmp::Reverse(t.updated_at));
        let recent_summaries: Vec<serde_json::Value> = recent
            .iter()
            .take(5)
            .map(|t| {
                serde_json::json!({
                    "task_id": t.id,
                    "title": t.title,
                    "status": t.status.as_str(),
                })
            })
            .collect();
        let failure_signatures: Vec<&str> =
            tasks.iter().filter_map(|t| t.failure_reason.as_deref()).collect();

        serde_json::json!({
            "workflow_goal": ticket.goal,
            "phase_id": ticket.phase_id,
            "recent_tasks": recent_summaries,
            "failure_signatures": failure_signatures,
        })
    }

    /// Validation-failure trigger: repeated failed reviews on a task
    /// inject a diagnostic the same way a stall does.
    pub async fn check_validation_failures(&self, task_id: Uuid) -> KernelResult<Option<DiagnosticRun>> {
        if !self.config.diag_on_validation_failures {
            return Ok(None);
        }
        let failures = self.reviews.trailing_failure_count(task_id).await?;
        if failures < self.config.diag_validation_failures_threshold {
            return Ok(None);
        }
        let Some(task) = self.tasks.get(task_id).await? else {
            return Ok(None);
        };
        let Some(ticket) = self.tickets.get(task.ticket_id).await? else {
            return Ok(None);
        };

        let now = self.clock.utc_now();
        if let Some(last) = self.diagnostics.latest_for_workflow(ticket.id).await? {
            if last.in_cooldown(now) {
                return Ok(None);
            }
        }

        let cooldown_until = now + Duration::seconds(self.config.diagnostic_cooldown_seconds as i64);
        let tasks = self.tasks.list_by_ticket(ticket.id).await?;
        let mut run = DiagnosticRun::new(
            ticket.id,
            "repeated_validation_failures",
            self.context_snapshot(&ticket, &tasks),
            cooldown_until,
            now,
        );
        self.diagnostics.insert(&run).await?;
        self.bus
            .publish(topics::DIAGNOSTIC_STARTED, ticket.id, Actor::System, serde_json::json!({
                "diagnostic_run_id": run.id,
                "trigger_reason": run.trigger_reason,
                "task_id": task_id,
            }))
            .await?;

        let branch = self
            .discovery
            .record_discovery_and_branch(
                task_id,
                DiscoveryType::DiagnosticTimeout,
                &format!("task {task_id} failed validation {failures} times in a row"),
                task.phase_id,
                &format!(
                    "Investigate repeated validation failures on task '{}'. Last feedback: {}",
                    task.title,
                    task.last_validation_feedback.as_deref().unwrap_or("none"),
                ),
                true,
            )
            .await?;

        run.spawned_task_ids.push(branch.spawned_task.id);
        run.status = DiagnosticStatus::Completed;
        run.updated_at = self.clock.utc_now();
        self.diagnostics.update(&run).await?;
        self.bus
            .publish(topics::DIAGNOSTIC_COMPLETED, ticket.id, Actor::System, serde_json::json!({
                "diagnostic_run_id": run.id,
                "spawned_task_ids": run.spawned_task_ids,
            }))
            .await?;
        Ok(Some(run))
    }
}

fn recovery_description(ticket: &Ticket) -> String {
    format!(
        "All tasks for workflow '{}' are settled but no validated final result exists. \
         Review the completed work and submit final result for the workflow goal: {}",
        ticket.title, ticket.goal,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_recovery_description_mentions_submission() {
        let ticket = Ticket::new("T", "goal", Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        let desc = recovery_description(&ticket);
        assert!(desc.contains("submit final result"));
    }
}

//! Validation loop.
//!
//! A task that claims done with validation enabled sits in
//! `under_review` until a validator is bound, then in
//! `validation_in_progress` until the validator submits exactly one
//! review for the current iteration. Pass completes the task; fail
//! stores the feedback and loops back through `needs_work`, bounded by
//! the iteration cap.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    topics, Actor, AgentType, SchedulingConfig, Task, TaskStatus, ValidationConfig,
    ValidationReview,
};
use crate::domain::ports::{AgentRepository, Clock, ReviewRepository, TaskRepository};
use crate::services::deadline_queue::{Deadline, DeadlineKind, DeadlineQueue};
use crate::services::event_bus::EventBus;
use crate::services::registry::RegistryService;
use crate::services::scheduler::SchedulerService;

/// Verdict content submitted by a validator.
#[derive(Debug, Clone)]
pub struct ReviewSubmission {
    pub validation_passed: bool,
    pub feedback: String,
    pub evidence: Vec<String>,
    pub recommendations: Vec<String>,
}

/// Drives reviews for validation-enabled tasks.
pub struct ValidationService {
    tasks: Arc<dyn TaskRepository>,
    reviews: Arc<dyn ReviewRepository>,
    agents: Arc<dyn AgentRepository>,
    registry: Arc<RegistryService>,
    scheduler: Arc<SchedulerService>,
    bus: Arc<EventBus>,
    deadlines: Arc<DeadlineQueue>,
    clock: Arc<dyn Clock>,
    config: ValidationConfig,
    scheduling: SchedulingConfig,
}

impl ValidationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn TaskRepository>,
        reviews: Arc<dyn ReviewRepository>,
        agents: Arc<dyn AgentRepository>,
        registry: Arc<RegistryService>,
        scheduler: Arc<SchedulerService>,
        bus: Arc<EventBus>,
        deadlines: Arc<DeadlineQueue>,
        clock: Arc<dyn Clock>,
        config: ValidationConfig,
        scheduling: SchedulingConfig,
    ) -> Self {
        Self {
            tasks,
            reviews,
            agents,
            registry,
            scheduler,
            bus,
            deadlines,
            clock,
            config,
            scheduling,
        }
    }

    /// Bind an idle validator to every task waiting in `under_review`.
    /// Tasks with no available validator stay queued for the next pass.
    #[instrument(skip(self))]
    pub async fn dispatch_reviews(&self) -> KernelResult<Vec<Uuid>> {
        let waiting = self.tasks.list_by_status(TaskStatus::UnderReview).await?;
        let mut started = Vec::new();
        for task in waiting {
            if self.begin_review(task.id).await?.is_some() {
                started.push(task.id);
            }
        }
        Ok(started)
    }

    /// Bind a validator to one task in `under_review`. Returns the
    /// validator id, or None when no validator is available.
    pub async fn begin_review(&self, task_id: Uuid) -> KernelResult<Option<Uuid>> {
        let now = self.clock.utc_now();
        let mut task = self.require(task_id).await?;
        if task.status != TaskStatus::UnderReview {
            return Ok(None);
        }

        let validators = self.agents.list_idle_validators(Some(task.phase_id)).await?;
        let Some(validator) = validators.into_iter().next() else {
            return Ok(None);
        };

        self.registry.bind_task(validator.id, task_id).await?;
        task.transition_to(TaskStatus::ValidationInProgress, now)?;
        self.tasks.update(&task).await?;

        self.deadlines.schedule(Deadline {
            due_at: now + Duration::seconds(self.config.validator_timeout_seconds as i64),
            kind: DeadlineKind::ValidationDeadline { task_id, iteration: task.validation_iteration },
        });

        self.bus
            .publish(topics::VALIDATION_STARTED, task_id, Actor::System, serde_json::json!({
                "validator_agent_id": validator.id,
                "iteration": task.validation_iteration,
            }))
            .await?;

        info!(task = %task_id, validator = %validator.name, "Validator bound");
        Ok(Some(validator.id))
    }

    /// Accept exactly one review per iteration from a validator.
    ///
    /// The caller must be a validator-type agent and the iteration must
    /// equal the task's current `validation_iteration`; anything else is
    /// refused before the row is written.
    #[instrument(skip(self, submission), err)]
    pub async fn give_review(
        &self,
        validator_agent_id: Uuid,
        task_id: Uuid,
        iteration_number: u32,
        submission: ReviewSubmission,
    ) -> KernelResult<ValidationReview> {
        let now = self.clock.utc_now();

        let validator = self
            .agents
            .get(validator_agent_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "agent", id: validator_agent_id.to_string() })?;
        if validator.agent_type != AgentType::Validator {
            return Err(KernelError::NotAuthorized {
                actor: validator.name,
                actual: validator.agent_type.authority().rank(),
                required: AgentType::Validator.authority().rank(),
            });
        }

        let mut task = self.require(task_id).await?;
        if !matches!(task.status, TaskStatus::UnderReview | TaskStatus::ValidationInProgress) {
            return Err(KernelError::InvalidTransition {
                entity: "task",
                from: task.status.as_str().to_string(),
                to: "reviewed".to_string(),
            });
        }
        if iteration_number != task.validation_iteration {
            return Err(KernelError::Conflict { entity: "validation_review", id: task_id.to_string() });
        }

        let mut review = ValidationReview::new(
            task_id,
            validator_agent_id,
            iteration_number,
            submission.validation_passed,
            submission.feedback.clone(),
            now,
        );
        review.evidence = submission.evidence;
        review.recommendations = submission.recommendations;
        self.reviews.insert(&review).await?;

        self.bus
            .publish(topics::VALIDATION_REVIEW_SUBMITTED, task_id, Actor::Agent(validator_agent_id), serde_json::json!({
                "iteration": iteration_number,
                "passed": submission.validation_passed,
            }))
            .await?;

        self.registry.release(validator_agent_id).await?;

        if submission.validation_passed {
            self.complete_passed(&mut task).await?;
        } else {
            self.loop_failed(&mut task, &submission.feedback).await?;
        }

        Ok(review)
    }

    async fn complete_passed(&self, task: &mut Task) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let worker = task.assigned_agent_id;
        task.transition_to(TaskStatus::Done, now)?;
        self.tasks.update(task).await?;
        if let Some(worker_id) = worker {
            self.registry.release(worker_id).await?;
        }
        self.bus
            .publish(topics::VALIDATION_PASSED, task.id, Actor::System, serde_json::json!({
                "iteration": task.validation_iteration,
            }))
            .await?;
        self.scheduler.publish_completed(task).await?;
        Ok(())
    }

    async fn loop_failed(&self, task: &mut Task, feedback: &str) -> KernelResult<()> {
        let now = self.clock.utc_now();
        task.last_validation_feedback = Some(feedback.to_string());

        self.bus
            .publish(topics::VALIDATION_FAILED, task.id, Actor::System, serde_json::json!({
                "iteration": task.validation_iteration,
                "feedback": feedback,
            }))
            .await?;

        // The iteration cap bounds the feedback loop; beyond it the
        // task terminates and supervisors are notified via task.failed.
        if task.validation_iteration >= self.scheduling.max_iterations {
            let worker = task.assigned_agent_id;
            task.fail("max_iterations", now)?;
            self.tasks.update(task).await?;
            if let Some(worker_id) = worker {
                self.registry.release(worker_id).await?;
            }
            self.bus
                .publish(topics::TASK_FAILED, task.id, Actor::System, serde_json::json!({
                    "reason": "max_iterations",
                }))
                .await?;
            warn!(task = %task.id, "Validation iteration cap reached, task failed");
            return Ok(());
        }

        task.transition_to(TaskStatus::NeedsWork, now)?;
        self.tasks.update(task).await?;
        self.bus
            .publish(topics::TASK_NEEDS_WORK, task.id, Actor::System, serde_json::json!({
                "iteration": task.validation_iteration,
                "feedback": feedback,
            }))
            .await?;

        // Re-enter dispatch, preferring the original assignee so the
        // feedback lands in the same session.
        self.scheduler.resume_needs_work(task.id).await?;
        Ok(())
    }

    /// Fired per-iteration deadline: a review still outstanding forces
    /// the task to fail with reason validation_timeout.
    pub async fn handle_validation_deadline(&self, task_id: Uuid, iteration: u32) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let Some(mut task) = self.tasks.get(task_id).await? else {
            return Ok(());
        };
        if task.status != TaskStatus::ValidationInProgress || task.validation_iteration != iteration {
            return Ok(()); // review landed before the deadline
        }

        let worker = task.assigned_agent_id;
        task.fail("validation_timeout", now)?;
        self.tasks.update(&task).await?;
        if let Some(worker_id) = worker {
            self.registry.release(worker_id).await?;
        }

        // Free the validator that never answered.
        let bound = self
            .agents
            .list(crate::domain::ports::AgentFilter {
                agent_type: Some(AgentType::Validator),
                status: Some(crate::domain::models::AgentStatus::Running),
                ..Default::default()
            })
            .await?;
        for validator in bound.into_iter().filter(|v| v.current_task_id == Some(task_id)) {
            self.registry.release(validator.id).await?;
        }
        self.bus
            .publish(topics::VALIDATION_FAILED, task_id, Actor::System, serde_json::json!({
                "iteration": iteration,
                "reason": "validation_timeout",
            }))
            .await?;
        self.bus
            .publish(topics::TASK_FAILED, task_id, Actor::System, serde_json::json!({
                "reason": "validation_timeout",
            }))
            .await?;
        warn!(task = %task_id, "Validator iteration timed out");
        Ok(())
    }

    /// Trailing consecutive failed reviews for a task, for the
    /// diagnostic validation-failure trigger.
    pub async fn trailing_failures(&self, task_id: Uuid) -> KernelResult<u32> {
        self.reviews.trailing_failure_count(task_id).await
    }

    async fn require(&self, task_id: Uuid) -> KernelResult<Task> {
        self.tasks
            .get(task_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "task", id: task_id.to_string() })
    }
}

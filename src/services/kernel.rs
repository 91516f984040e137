//! Kernel wiring.
//!
//! Builds every subsystem from a database pool and a config, then runs
//! the perpetual loops: deadline consumer, heartbeat sweep, approval
//! sweep, dispatch tick, validation dispatch, and the diagnostic
//! monitor. There is no process-wide mutable state; everything threads
//! through this wiring context.

use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::adapters::sqlite::{
    SqliteAgentRepository, SqliteArtifactRepository, SqliteDiagnosticRepository,
    SqliteDiscoveryRepository, SqliteEventJournal, SqlitePhaseRepository, SqliteReviewRepository,
    SqliteSupervisorRepository, SqliteTaskRepository, SqliteTicketRepository,
};
use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{topics, DeliveryMode, KernelConfig, TaskPriority, Ticket};
use crate::domain::ports::{
    Clock, SystemClock, TaskRepository, TicketRepository, TruncatingSummarizer,
};
use crate::services::approval::ApprovalService;
use crate::services::board::BoardService;
use crate::services::deadline_queue::{Deadline, DeadlineKind, DeadlineQueue};
use crate::services::diagnostic::DiagnosticService;
use crate::services::discovery::DiscoveryService;
use crate::services::event_bus::EventBus;
use crate::services::registry::RegistryService;
use crate::services::scheduler::SchedulerService;
use crate::services::supervisor::SupervisorService;
use crate::services::validation::ValidationService;

/// Options for creating a ticket through the kernel.
#[derive(Debug, Clone, Default)]
pub struct CreateTicketOptions {
    pub priority: TaskPriority,
    /// Overrides `approval.ticket_human_review` when set
    pub approval_required: Option<bool>,
    pub requested_by_agent_id: Option<Uuid>,
}

/// The assembled orchestration kernel.
pub struct Kernel {
    pub clock: Arc<dyn Clock>,
    pub bus: Arc<EventBus>,
    pub deadlines: Arc<DeadlineQueue>,
    pub registry: Arc<RegistryService>,
    pub scheduler: Arc<SchedulerService>,
    pub board: Arc<BoardService>,
    pub discovery: Arc<DiscoveryService>,
    pub validation: Arc<ValidationService>,
    pub diagnostic: Arc<DiagnosticService>,
    pub supervisor: Arc<SupervisorService>,
    pub approval: Arc<ApprovalService>,
    pub config: KernelConfig,
    tickets: Arc<dyn TicketRepository>,
    tasks: Arc<dyn TaskRepository>,
    deadline_rx: Mutex<Option<mpsc::Receiver<Deadline>>>,
}

impl Kernel {
    /// Wire every subsystem over a migrated pool.
    pub fn new(pool: SqlitePool, config: KernelConfig) -> Arc<Self> {
        Self::with_clock(pool, config, Arc::new(SystemClock::new()))
    }

    /// Wire with an explicit clock (deterministic tests).
    pub fn with_clock(pool: SqlitePool, config: KernelConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        let agents = Arc::new(SqliteAgentRepository::new(pool.clone()));
        let tasks: Arc<dyn TaskRepository> = Arc::new(SqliteTaskRepository::new(pool.clone()));
        let tickets: Arc<dyn TicketRepository> = Arc::new(SqliteTicketRepository::new(pool.clone()));
        let phases = Arc::new(SqlitePhaseRepository::new(pool.clone()));
        let discoveries = Arc::new(SqliteDiscoveryRepository::new(pool.clone()));
        let reviews = Arc::new(SqliteReviewRepository::new(pool.clone()));
        let artifacts = Arc::new(SqliteArtifactRepository::new(pool.clone()));
        let diagnostics = Arc::new(SqliteDiagnosticRepository::new(pool.clone()));
        let actions = Arc::new(SqliteSupervisorRepository::new(pool.clone()));
        let journal = Arc::new(SqliteEventJournal::new(pool));

        let bus = Arc::new(EventBus::new(journal, Arc::clone(&clock), config.bus.clone()));
        let deadlines = Arc::new(DeadlineQueue::new(Arc::clone(&clock)));

        let registry = Arc::new(RegistryService::new(
            agents.clone(),
            Arc::clone(&bus),
            Arc::clone(&deadlines),
            Arc::clone(&clock),
            config.heartbeat.clone(),
        ));

        let scheduler = Arc::new(SchedulerService::new(
            tasks.clone(),
            tickets.clone(),
            phases.clone(),
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&deadlines),
            Arc::clone(&clock),
            config.scheduling.clone(),
        ));

        let board = Arc::new(BoardService::new(
            tickets.clone(),
            tasks.clone(),
            phases.clone(),
            discoveries.clone(),
            reviews.clone(),
            artifacts.clone(),
            Arc::new(TruncatingSummarizer::new()),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.board.clone(),
        ));

        let discovery = Arc::new(DiscoveryService::new(
            discoveries,
            tasks.clone(),
            phases,
            Arc::clone(&scheduler),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.discovery.clone(),
        ));

        let validation = Arc::new(ValidationService::new(
            tasks.clone(),
            reviews.clone(),
            agents.clone(),
            Arc::clone(&registry),
            Arc::clone(&scheduler),
            Arc::clone(&bus),
            Arc::clone(&deadlines),
            Arc::clone(&clock),
            config.validation.clone(),
            config.scheduling.clone(),
        ));

        let diagnostic = Arc::new(DiagnosticService::new(
            tickets.clone(),
            tasks.clone(),
            artifacts,
            diagnostics,
            reviews,
            Arc::clone(&discovery),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.discovery.clone(),
        ));

        let supervisor = Arc::new(SupervisorService::new(
            actions,
            tasks.clone(),
            agents,
            Arc::clone(&registry),
            Arc::clone(&bus),
            Arc::clone(&clock),
            config.supervisor.clone(),
        ));

        let approval = Arc::new(ApprovalService::new(
            tickets.clone(),
            tasks.clone(),
            Arc::clone(&bus),
            Arc::clone(&deadlines),
            Arc::clone(&clock),
            config.approval.clone(),
        ));

        Arc::new(Self {
            clock,
            bus,
            deadlines,
            registry,
            scheduler,
            board,
            discovery,
            validation,
            diagnostic,
            supervisor,
            approval,
            config,
            tickets,
            tasks,
            deadline_rx: Mutex::new(None),
        })
    }

    /// Create a ticket, placing it on the board and applying the
    /// approval gate when configured or requested.
    pub async fn create_ticket(
        &self,
        title: &str,
        goal: &str,
        phase_id: Uuid,
        options: CreateTicketOptions,
    ) -> KernelResult<Ticket> {
        let active = self.tickets.list_active().await?.len() as u32;
        if active >= self.config.scheduling.max_concurrent_tickets {
            return Err(KernelError::ValidationFailed(format!(
                "max_concurrent_tickets ({}) reached",
                self.config.scheduling.max_concurrent_tickets,
            )));
        }

        let column = self
            .board
            .column_for_phase(phase_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "board_column", id: phase_id.to_string() })?;

        let now = self.clock.utc_now();
        let mut ticket = Ticket::new(title, goal, column.id, phase_id, now)
            .with_priority(options.priority);
        if let Some(agent_id) = options.requested_by_agent_id {
            ticket = ticket.requested_by(agent_id);
        }

        let gated = options
            .approval_required
            .unwrap_or(self.config.approval.ticket_human_review && options.requested_by_agent_id.is_some());
        if gated {
            ticket = ticket.with_pending_approval(self.approval.deadline_from_now());
        }

        let ticket = self.board.create_ticket(ticket).await?;
        if gated {
            self.approval.arm_deadline(&ticket);
        }
        Ok(ticket)
    }

    /// Startup reconciliation: rebuild derived state from the store and
    /// re-arm timers lost with the previous process.
    #[instrument(skip(self))]
    pub async fn startup(&self) -> KernelResult<()> {
        self.registry.rebuild_index().await?;

        // Re-arm approval deadlines from persisted state.
        let pending = self
            .tickets
            .list(crate::domain::ports::TicketFilter {
                approval_status: Some(crate::domain::models::ApprovalStatus::PendingReview),
                ..Default::default()
            })
            .await?;
        for ticket in &pending {
            self.approval.arm_deadline(ticket);
        }

        // Catch agents that went silent and tasks that ran long while
        // the kernel was down.
        self.registry.sweep_heartbeats().await?;
        self.scheduler.sweep_timeouts().await?;

        info!(pending_approvals = pending.len(), "Kernel startup reconciliation complete");
        Ok(())
    }

    /// Run every perpetual loop until `shutdown` flips true.
    pub async fn run(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> KernelResult<()> {
        let (deadline_tx, deadline_rx) = mpsc::channel(256);
        *self.deadline_rx.lock().await = Some(deadline_rx);
        tokio::spawn(Arc::clone(&self.deadlines).run(deadline_tx));

        let mut handles = Vec::new();
        handles.push(self.spawn_deadline_consumer(shutdown.clone()).await);
        handles.push(self.spawn_interval_loop(
            "heartbeat-sweep",
            Duration::from_secs(self.config.heartbeat.sweep_interval_seconds),
            shutdown.clone(),
            |k| async move { k.registry.sweep_heartbeats().await },
        ));
        handles.push(self.spawn_interval_loop(
            "approval-sweep",
            Duration::from_secs(self.config.approval.sweep_interval_seconds),
            shutdown.clone(),
            |k| async move { k.approval.sweep().await },
        ));
        handles.push(self.spawn_interval_loop(
            "dispatch",
            Duration::from_secs(1),
            shutdown.clone(),
            |k| async move { k.scheduler.dispatch_tick().await.map(|_| ()) },
        ));
        handles.push(self.spawn_interval_loop(
            "validation-dispatch",
            Duration::from_secs(1),
            shutdown.clone(),
            |k| async move { k.validation.dispatch_reviews().await.map(|_| ()) },
        ));
        handles.push(self.spawn_interval_loop(
            "diagnostic-monitor",
            Duration::from_secs(self.config.discovery.monitor_interval_seconds),
            shutdown.clone(),
            |k| async move { k.diagnostic.tick().await.map(|_| ()) },
        ));
        handles.push(self.spawn_validation_failure_watcher(shutdown.clone()).await);

        for handle in handles {
            let _ = handle.await;
        }
        info!("Kernel loops stopped");
        Ok(())
    }

    async fn spawn_deadline_consumer(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let kernel = Arc::clone(self);
        let Some(mut rx) = kernel.deadline_rx.lock().await.take() else {
            // run() called twice; the consumer is already draining.
            return tokio::spawn(async {});
        };
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    deadline = rx.recv() => {
                        let Some(deadline) = deadline else { break };
                        if let Err(e) = kernel.handle_deadline(deadline).await {
                            error!("Deadline handling failed: {e}");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Repeated validation failures on a task feed the diagnostic
    /// monitor through the bus.
    async fn spawn_validation_failure_watcher(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let kernel = Arc::clone(self);
        let (_id, mut rx) = kernel
            .bus
            .subscribe("kernel:diag-validation", topics::VALIDATION_FAILED, DeliveryMode::AtLeastOnce)
            .await;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        let task_id = event.envelope.partition_key;
                        if let Err(e) = kernel.diagnostic.check_validation_failures(task_id).await {
                            error!("Validation-failure diagnostic check failed: {e}");
                        }
                        if let Err(e) = kernel.bus.ack("kernel:diag-validation", event.position).await {
                            error!("Cursor update failed: {e}");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn handle_deadline(&self, deadline: Deadline) -> KernelResult<()> {
        match deadline.kind {
            DeadlineKind::RegistrationTimeout { agent_id } => {
                self.registry.handle_registration_timeout(agent_id).await
            }
            DeadlineKind::ApprovalDeadline { ticket_id } => {
                self.approval.handle_deadline(ticket_id).await
            }
            DeadlineKind::ValidationDeadline { task_id, iteration } => {
                self.validation.handle_validation_deadline(task_id, iteration).await
            }
            DeadlineKind::TaskTimeout { task_id } => self.scheduler.handle_task_timeout(task_id).await,
        }
    }

    fn spawn_interval_loop<F, Fut>(
        self: &Arc<Self>,
        name: &'static str,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        tick: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<Kernel>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = KernelResult<()>> + Send,
    {
        let kernel = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = tick(Arc::clone(&kernel)).await {
                            error!(loop_name = name, "Sweeper pass failed: {e}");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Direct access for read-side CLI queries.
    pub fn task_repository(&self) -> &Arc<dyn TaskRepository> {
        &self.tasks
    }

    pub fn ticket_repository(&self) -> &Arc<dyn TicketRepository> {
        &self.tickets
    }
}

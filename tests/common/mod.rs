//! Shared test harness: an in-memory kernel over a seeded workflow.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use conductor::adapters::sqlite::{create_migrated_test_pool, SqlitePhaseRepository};
use conductor::domain::models::{
    AgentType, BoardColumn, KernelConfig, Phase, TaskPriority,
};
use conductor::domain::ports::{Clock, ManualClock, PhaseRepository};
use conductor::services::{Kernel, RegistrationRequest};

/// Seeded workflow definition shared by the integration tests.
#[allow(dead_code)]
pub struct Harness {
    pub kernel: Arc<Kernel>,
    pub pool: SqlitePool,
    pub clock: Arc<ManualClock>,
    pub requirements: Phase,
    pub design: Phase,
    pub backlog: BoardColumn,
    pub building: BoardColumn,
    pub done: BoardColumn,
}

/// Build a kernel over an in-memory database with a manual clock and a
/// two-phase board: requirements -> design, columns backlog/building/done.
#[allow(dead_code)]
pub async fn setup() -> Harness {
    setup_with_config(KernelConfig::default()).await
}

#[allow(dead_code)]
pub async fn setup_with_config(config: KernelConfig) -> Harness {
    let pool = create_migrated_test_pool().await.expect("failed to create test pool");
    let clock = Arc::new(ManualClock::starting_at(Utc::now()));
    let kernel = Kernel::with_clock(pool.clone(), config, clock.clone());

    let phases = SqlitePhaseRepository::new(pool.clone());
    let now = clock.utc_now();

    let mut requirements = Phase::new("requirements", 1, now)
        .with_done_definition("requirements captured");
    let design = Phase::new("design", 2, now);
    requirements = requirements.with_transition(design.id);

    phases.insert_phase(&requirements).await.expect("failed to insert requirements phase");
    phases.insert_phase(&design).await.expect("failed to insert design phase");

    let backlog = BoardColumn::new("backlog", 1, now)
        .with_phase(requirements.id)
        .with_phase(design.id);
    let building = BoardColumn::new("building", 2, now)
        .with_phase(requirements.id)
        .with_phase(design.id);
    let done = BoardColumn::new("done", 3, now).terminal();

    phases.insert_column(&backlog).await.expect("failed to insert backlog column");
    phases.insert_column(&building).await.expect("failed to insert building column");
    phases.insert_column(&done).await.expect("failed to insert done column");

    Harness { kernel, pool, clock, requirements, design, backlog, building, done }
}

impl Harness {
    /// Register an idle worker in a phase and confirm its first heartbeat.
    #[allow(dead_code)]
    pub async fn register_worker(&self, phase_id: Uuid, capabilities: &[&str]) -> Uuid {
        self.register_agent(AgentType::Worker, Some(phase_id), capabilities).await
    }

    /// Register an idle validator for a phase.
    #[allow(dead_code)]
    pub async fn register_validator(&self, phase_id: Uuid) -> Uuid {
        self.register_agent(AgentType::Validator, Some(phase_id), &[]).await
    }

    #[allow(dead_code)]
    pub async fn register_agent(
        &self,
        agent_type: AgentType,
        phase_id: Option<Uuid>,
        capabilities: &[&str],
    ) -> Uuid {
        let grant = self
            .kernel
            .registry
            .register(RegistrationRequest {
                agent_type,
                phase_id,
                capabilities: capabilities.iter().map(ToString::to_string).collect::<BTreeSet<_>>(),
                max_concurrent_tasks: 1,
                version: "1.0.0".to_string(),
                binary_sha256: None,
                name: None,
            })
            .await
            .expect("registration failed");
        self.kernel
            .registry
            .heartbeat(grant.agent_id)
            .await
            .expect("initial heartbeat failed");
        grant.agent_id
    }

    /// Submit a pending task under a ticket.
    #[allow(dead_code)]
    pub async fn submit_task(
        &self,
        ticket_id: Uuid,
        phase_id: Uuid,
        title: &str,
        priority: TaskPriority,
        capabilities: &[&str],
    ) -> Uuid {
        let mut task = conductor::domain::models::Task::new(
            ticket_id,
            phase_id,
            title,
            format!("{title} description"),
            self.clock.utc_now(),
        )
        .with_priority(priority);
        for cap in capabilities {
            task = task.with_capability(*cap);
        }
        self.kernel.scheduler.submit(task).await.expect("task submission failed")
    }
}

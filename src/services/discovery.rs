//! Discovery service.
//!
//! Discoveries record findings made while executing a task and spawn
//! follow-up work, possibly in a phase the normal progression graph
//! does not reach. Recording is idempotent over
//! `(source_task, type, hash(description))`.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    hash_description, topics, Actor, BlockedReason, Discovery, DiscoveryConfig, DiscoveryType,
    Task, TaskStatus,
};
use crate::domain::ports::{Clock, DiscoveryRepository, PhaseRepository, TaskRepository};
use crate::services::event_bus::EventBus;
use crate::services::scheduler::SchedulerService;

/// Outcome of recording a discovery.
#[derive(Debug, Clone)]
pub struct DiscoveryBranch {
    pub discovery: Discovery,
    pub spawned_task: Task,
    /// False when an identical discovery already existed and the
    /// original spawn was returned.
    pub newly_recorded: bool,
}

/// Records discoveries and branches new work from them.
pub struct DiscoveryService {
    discoveries: Arc<dyn DiscoveryRepository>,
    tasks: Arc<dyn TaskRepository>,
    phases: Arc<dyn PhaseRepository>,
    scheduler: Arc<SchedulerService>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    config: DiscoveryConfig,
}

impl DiscoveryService {
    pub fn new(
        discoveries: Arc<dyn DiscoveryRepository>,
        tasks: Arc<dyn TaskRepository>,
        phases: Arc<dyn PhaseRepository>,
        scheduler: Arc<SchedulerService>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        config: DiscoveryConfig,
    ) -> Self {
        Self { discoveries, tasks, phases, scheduler, bus, clock, config }
    }

    /// Record a discovery and spawn its follow-up task.
    ///
    /// The spawn phase is accepted even outside the source phase's
    /// `allowed_transitions` unless phase bypass is disabled. Blocking
    /// discovery types (clarification, security) make the source task
    /// depend on the spawned child; other types spawn a sibling. With
    /// `priority_boost` the child runs one rank above the source,
    /// clamped to critical.
    #[instrument(skip(self, description, spawn_description), err)]
    pub async fn record_discovery_and_branch(
        &self,
        source_task_id: Uuid,
        discovery_type: DiscoveryType,
        description: &str,
        spawn_phase_id: Uuid,
        spawn_description: &str,
        priority_boost: bool,
    ) -> KernelResult<DiscoveryBranch> {
        let now = self.clock.utc_now();
        let source = self
            .tasks
            .get(source_task_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "task", id: source_task_id.to_string() })?;

        // Idempotency: an identical discovery returns the original spawn.
        let hash = hash_description(description);
        if let Some(existing) = self
            .discoveries
            .find_duplicate(source_task_id, discovery_type, &hash)
            .await?
        {
            let spawned_id = existing.spawned_task_ids.first().copied().ok_or_else(|| {
                KernelError::NotFound { entity: "task", id: "spawned task".to_string() }
            })?;
            let spawned_task = self
                .tasks
                .get(spawned_id)
                .await?
                .ok_or(KernelError::NotFound { entity: "task", id: spawned_id.to_string() })?;
            return Ok(DiscoveryBranch { discovery: existing, spawned_task, newly_recorded: false });
        }

        if !self.config.allow_phase_bypass && spawn_phase_id != source.phase_id {
            let source_phase = self
                .phases
                .get_phase(source.phase_id)
                .await?
                .ok_or(KernelError::NotFound { entity: "phase", id: source.phase_id.to_string() })?;
            if !source_phase.allows_transition_to(spawn_phase_id) {
                return Err(KernelError::InvalidTransition {
                    entity: "phase",
                    from: source.phase_id.to_string(),
                    to: spawn_phase_id.to_string(),
                });
            }
        }

        let child = Task::new(
            source.ticket_id,
            spawn_phase_id,
            discovery_title(discovery_type, description),
            spawn_description,
            now,
        )
        .with_parent(source_task_id)
        .with_priority(if priority_boost { source.priority.boosted() } else { source.priority });

        if discovery_type.blocks_source() {
            // The source cannot proceed until the child resolves.
            let mut source = source.clone();
            source.depends_on.insert(child.id);
            if source.status == TaskStatus::InProgress {
                source.block(BlockedReason::MissingDependency, now)?;
            } else {
                source.updated_at = now;
                source.version += 1;
            }
            self.tasks.update(&source).await?;
        }

        let spawned_id = self.scheduler.submit(child.clone()).await?;

        let mut discovery = Discovery::new(source_task_id, discovery_type, description, now);
        discovery.spawned_task_ids.push(spawned_id);
        discovery.priority_boost = priority_boost;
        self.discoveries.insert(&discovery).await?;

        self.bus
            .publish(topics::DISCOVERY_RECORDED, source_task_id, Actor::System, serde_json::json!({
                "discovery_id": discovery.id,
                "discovery_type": discovery_type.as_str(),
                "spawned_task_id": spawned_id,
                "spawn_phase_id": spawn_phase_id,
            }))
            .await?;

        info!(
            source = %source_task_id,
            kind = discovery_type.as_str(),
            spawned = %spawned_id,
            "Discovery recorded and branched"
        );
        Ok(DiscoveryBranch { discovery, spawned_task: child, newly_recorded: true })
    }

    pub async fn get(&self, id: Uuid) -> KernelResult<Option<Discovery>> {
        self.discoveries.get(id).await
    }

    pub async fn list_by_source(&self, source_task_id: Uuid) -> KernelResult<Vec<Discovery>> {
        self.discoveries.list_by_source(source_task_id).await
    }
}

fn discovery_title(discovery_type: DiscoveryType, description: &str) -> String {
    let first_line = description.lines().next().unwrap_or(description).trim();
    let mut title = format!("[{}] {}", discovery_type.as_str(), first_line);
    if title.len() > 100 {
        title.truncate(97);
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_title_truncates() {
        let long = "x".repeat(200);
        let title = discovery_title(DiscoveryType::Bug, &long);
        assert!(title.len() <= 100);
        assert!(title.starts_with("[bug] "));
        assert!(title.ends_with("..."));
    }
}

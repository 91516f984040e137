//! Agent registry.
//!
//! Owns the registration protocol, the heartbeat lifecycle, and the
//! in-memory capability index the scheduler reads. Status transitions
//! are serialized per agent through an agent-scoped lock; the index is
//! derived state rebuilt from the store on startup.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{
    topics, Actor, Agent, AgentStatus, AgentType, DeliveryMode, HeartbeatConfig,
};
use crate::domain::ports::{AgentRepository, Clock, JournaledEvent};
use crate::services::deadline_queue::{Deadline, DeadlineKind, DeadlineQueue};
use crate::services::event_bus::{EventBus, SubscriberId};

/// What a connecting process sends to register.
#[derive(Debug, Clone)]
pub struct RegistrationRequest {
    pub agent_type: AgentType,
    /// Bound phase; required for workers and validators
    pub phase_id: Option<Uuid>,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_tasks: u32,
    /// Agent build version, checked against the compatibility matrix
    pub version: String,
    /// Optional binary hash supplied by the launcher
    pub binary_sha256: Option<String>,
    /// Re-registration under an existing name returns the original grant
    pub name: Option<String>,
}

/// What a successful registration returns.
#[derive(Debug, Clone)]
pub struct RegistrationGrant {
    pub agent_id: Uuid,
    pub name: String,
    /// Hex ed25519 verifying key stored by the kernel
    pub public_key: String,
    /// Hex ed25519 signing key; returned exactly once, never persisted
    pub signing_key: Option<String>,
}

/// The three bus subscriptions created for every agent at registration.
pub struct AgentMailbox {
    pub inbox: mpsc::Receiver<JournaledEvent>,
    pub broadcast: mpsc::Receiver<JournaledEvent>,
    pub shutdown: mpsc::Receiver<JournaledEvent>,
}

/// Inverted indices over capabilities and phases for O(1) candidate lookup.
#[derive(Debug, Default)]
struct CapabilityIndex {
    by_capability: HashMap<String, HashSet<Uuid>>,
    by_phase: HashMap<Uuid, HashSet<Uuid>>,
}

impl CapabilityIndex {
    fn insert(&mut self, agent: &Agent) {
        for cap in &agent.capabilities {
            self.by_capability.entry(cap.clone()).or_default().insert(agent.id);
        }
        if let Some(phase) = agent.phase_id {
            self.by_phase.entry(phase).or_default().insert(agent.id);
        }
    }

    fn remove(&mut self, agent_id: Uuid) {
        for set in self.by_capability.values_mut() {
            set.remove(&agent_id);
        }
        for set in self.by_phase.values_mut() {
            set.remove(&agent_id);
        }
    }

    /// Agent ids bound to `phase_id` advertising every tag in `required`.
    fn candidates(&self, phase_id: Uuid, required: &BTreeSet<String>) -> HashSet<Uuid> {
        let Some(phase_agents) = self.by_phase.get(&phase_id) else {
            return HashSet::new();
        };
        let mut result = phase_agents.clone();
        for cap in required {
            match self.by_capability.get(cap) {
                Some(with_cap) => result.retain(|id| with_cap.contains(id)),
                None => return HashSet::new(),
            }
            if result.is_empty() {
                return HashSet::new();
            }
        }
        result
    }
}

struct SubscriptionHandles {
    inbox: SubscriberId,
    broadcast: SubscriberId,
    shutdown: SubscriberId,
}

/// Agent registry and lifecycle service.
pub struct RegistryService {
    agents: Arc<dyn AgentRepository>,
    bus: Arc<EventBus>,
    deadlines: Arc<DeadlineQueue>,
    clock: Arc<dyn Clock>,
    config: HeartbeatConfig,
    /// Accepted agent versions; empty means any version
    compatible_versions: Vec<String>,
    index: RwLock<CapabilityIndex>,
    /// Per-agent serialization of status transitions
    agent_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    /// Start of each agent's current restart-escalation window
    restart_windows: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    /// Mailboxes awaiting pickup by the agent's transport
    mailboxes: Mutex<HashMap<Uuid, AgentMailbox>>,
    subscriptions: Mutex<HashMap<Uuid, SubscriptionHandles>>,
}

impl RegistryService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        bus: Arc<EventBus>,
        deadlines: Arc<DeadlineQueue>,
        clock: Arc<dyn Clock>,
        config: HeartbeatConfig,
    ) -> Self {
        Self {
            agents,
            bus,
            deadlines,
            clock,
            config,
            compatible_versions: Vec::new(),
            index: RwLock::new(CapabilityIndex::default()),
            agent_locks: Mutex::new(HashMap::new()),
            restart_windows: Mutex::new(HashMap::new()),
            mailboxes: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    /// Restrict accepted agent versions.
    pub fn with_compatible_versions(mut self, versions: Vec<String>) -> Self {
        self.compatible_versions = versions;
        self
    }

    async fn lock_for(&self, agent_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.agent_locks.lock().await;
        locks.entry(agent_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Register an agent.
    ///
    /// The protocol is atomic from the caller's view: pre-validation,
    /// identity assignment, entry creation, and bus subscription either
    /// all take effect or none do. The initial-heartbeat deadline is
    /// armed last; if it fires before a heartbeat arrives the entry is
    /// deleted again.
    #[instrument(skip(self, request), fields(agent_type = request.agent_type.as_str()))]
    pub async fn register(&self, request: RegistrationRequest) -> KernelResult<RegistrationGrant> {
        self.pre_validate(&request)?;
        let now = self.clock.utc_now();

        // Re-registering an existing identity inside the registration
        // window returns the original grant.
        if let Some(name) = &request.name {
            if let Some(existing) = self.agents.get_by_identity(request.agent_type, name).await? {
                let window = Duration::seconds(self.config.registration_timeout_seconds as i64);
                if now - existing.created_at <= window {
                    return Ok(RegistrationGrant {
                        agent_id: existing.id,
                        name: existing.name,
                        public_key: existing.public_key,
                        signing_key: None,
                    });
                }
                return Err(KernelError::RegistrationRejected {
                    reason: format!("identity {name} already registered"),
                });
            }
        }

        // Identity assignment: id, derived name, key pair.
        let counter = self.agents.count_by_type_and_phase(request.agent_type, request.phase_id).await? + 1;
        let name = match request.name {
            Some(name) => name,
            None => derive_name(request.agent_type, request.phase_id, counter),
        };
        let signing_key = SigningKey::generate(&mut OsRng);
        let public_key = hex::encode(signing_key.verifying_key().to_bytes());

        let agent = Agent::new(request.agent_type, &name, request.phase_id, now)
            .with_capabilities(request.capabilities)
            .with_public_key(&public_key)
            .with_max_concurrent_tasks(request.max_concurrent_tasks);
        let agent_id = agent.id;

        self.agents.insert(&agent).await?;

        // Bus subscriptions: assignment inbox (own partition), system
        // broadcast, shutdown. Rolled back with the entry on failure.
        let (inbox_id, inbox) = self
            .bus
            .subscribe_partition(&name, topics::TASK_ASSIGNED, Some(agent_id), DeliveryMode::AtLeastOnce)
            .await;
        let (broadcast_id, broadcast) = self
            .bus
            .subscribe(format!("{name}:broadcast"), topics::SYSTEM_BROADCAST, DeliveryMode::BestEffort)
            .await;
        let (shutdown_id, shutdown) = self
            .bus
            .subscribe(format!("{name}:shutdown"), topics::SYSTEM_SHUTDOWN, DeliveryMode::AtLeastOnce)
            .await;
        self.subscriptions.lock().await.insert(
            agent_id,
            SubscriptionHandles { inbox: inbox_id, broadcast: broadcast_id, shutdown: shutdown_id },
        );
        self.mailboxes.lock().await.insert(agent_id, AgentMailbox { inbox, broadcast, shutdown });

        self.index.write().await.insert(&agent);

        self.deadlines.schedule(Deadline {
            due_at: now + Duration::seconds(self.config.registration_timeout_seconds as i64),
            kind: DeadlineKind::RegistrationTimeout { agent_id },
        });

        self.bus
            .publish(
                topics::AGENT_REGISTERED,
                agent_id,
                Actor::System,
                serde_json::json!({
                    "agent_id": agent_id,
                    "agent_type": request.agent_type.as_str(),
                    "name": name,
                    "phase_id": agent.phase_id,
                }),
            )
            .await?;

        info!(agent = %name, "Agent registered");
        Ok(RegistrationGrant {
            agent_id,
            name,
            public_key,
            signing_key: Some(hex::encode(signing_key.to_bytes())),
        })
    }

    fn pre_validate(&self, request: &RegistrationRequest) -> KernelResult<()> {
        if request.max_concurrent_tasks == 0 {
            return Err(KernelError::RegistrationRejected {
                reason: "max_concurrent_tasks must be at least 1".into(),
            });
        }
        if matches!(request.agent_type, AgentType::Worker) && request.phase_id.is_none() {
            return Err(KernelError::RegistrationRejected {
                reason: "workers must bind a phase".into(),
            });
        }
        if !self.compatible_versions.is_empty()
            && !self.compatible_versions.contains(&request.version)
        {
            return Err(KernelError::RegistrationRejected {
                reason: format!("version {} is not in the compatibility matrix", request.version),
            });
        }
        if request.binary_sha256.as_ref().is_some_and(|h| h.len() != 64 || !h.chars().all(|c| c.is_ascii_hexdigit())) {
            return Err(KernelError::RegistrationRejected {
                reason: "binary hash is not a sha256 digest".into(),
            });
        }
        Ok(())
    }

    /// Take ownership of an agent's mailbox. The external transport
    /// calls this once after registration.
    pub async fn take_mailbox(&self, agent_id: Uuid) -> Option<AgentMailbox> {
        self.mailboxes.lock().await.remove(&agent_id)
    }

    /// Record a heartbeat from an agent.
    pub async fn heartbeat(&self, agent_id: Uuid) -> KernelResult<()> {
        {
            let lock = self.lock_for(agent_id).await;
            let _guard = lock.lock().await;

            let now = self.clock.utc_now();
            let mut agent = self.require(agent_id).await?;
            agent.record_heartbeat(now);

            // A heartbeat from an unresponsive agent brings it back.
            if agent.status == AgentStatus::Unresponsive {
                agent.transition_to(AgentStatus::Idle, now)?;
            }
            self.agents.update(&agent).await?;
        }

        // Published outside the agent lock.
        self.bus
            .publish(topics::AGENT_HEARTBEAT, agent_id, Actor::Agent(agent_id), serde_json::json!({}))
            .await?;
        Ok(())
    }

    /// Heartbeat-TTL sweep: mark silent agents unresponsive, restart
    /// them up to the attempt budget, escalate past it.
    #[instrument(skip(self))]
    pub async fn sweep_heartbeats(&self) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let ttl = Duration::seconds(self.config.ttl_threshold_seconds as i64);
        let agents = self.agents.list(Default::default()).await?;

        for agent in agents {
            if matches!(agent.status, AgentStatus::Quarantined | AgentStatus::Failed) {
                continue;
            }
            if !agent.heartbeat_expired(now, ttl) {
                continue;
            }
            if agent.status == AgentStatus::Unresponsive {
                self.try_restart(agent).await?;
                continue;
            }

            let agent = {
                let lock = self.lock_for(agent.id).await;
                let _guard = lock.lock().await;
                let mut agent = self.require(agent.id).await?;
                if !agent.heartbeat_expired(now, ttl) {
                    continue; // heartbeat raced the sweep
                }
                agent.transition_to(AgentStatus::Unresponsive, now)?;
                self.agents.update(&agent).await?;
                agent
            };

            self.bus
                .publish(topics::AGENT_HEARTBEAT_MISSED, agent.id, Actor::System, serde_json::json!({
                    "last_heartbeat_at": agent.last_heartbeat_at,
                }))
                .await?;
            self.bus
                .publish(topics::AGENT_UNRESPONSIVE, agent.id, Actor::System, serde_json::json!({}))
                .await?;
            warn!(agent = %agent.name, "Agent marked unresponsive");
        }
        Ok(())
    }

    /// Restart an unresponsive agent, or escalate when the restart
    /// budget inside the escalation window is spent.
    async fn try_restart(&self, agent: Agent) -> KernelResult<()> {
        let now = self.clock.utc_now();
        let escalate = {
            let lock = self.lock_for(agent.id).await;
            let _guard = lock.lock().await;
            let mut agent = self.require(agent.id).await?;
            if agent.status != AgentStatus::Unresponsive {
                return Ok(());
            }

            let window = Duration::seconds(self.config.escalation_window_seconds as i64);
            {
                let mut windows = self.restart_windows.lock().await;
                let started = windows.entry(agent.id).or_insert(now);
                if now - *started > window {
                    *started = now;
                    agent.restart_count = 0;
                }
            }

            if agent.restart_count >= self.config.max_restart_attempts {
                Some(agent)
            } else {
                agent.restart_count += 1;
                agent.transition_to(AgentStatus::Idle, now)?;
                agent.record_heartbeat(now);
                self.agents.update(&agent).await?;
                info!(agent = %agent.name, restart = agent.restart_count, "Agent auto-restarted");
                None
            }
        };

        if let Some(agent) = escalate {
            self.bus
                .publish(topics::AGENT_ESCALATION, agent.id, Actor::System, serde_json::json!({
                    "restart_count": agent.restart_count,
                    "window_seconds": self.config.escalation_window_seconds,
                }))
                .await?;
            warn!(agent = %agent.name, "Restart budget exhausted, escalating to guardians");
        }
        Ok(())
    }

    /// Delete the registry entry when no initial heartbeat arrived
    /// inside the registration window.
    pub async fn handle_registration_timeout(&self, agent_id: Uuid) -> KernelResult<()> {
        let Some(agent) = self.agents.get(agent_id).await? else {
            return Ok(()); // already gone
        };
        // A heartbeat after creation keeps the entry alive.
        if agent.last_heartbeat_at > agent.created_at {
            return Ok(());
        }
        self.deregister(agent_id).await?;
        self.bus
            .publish(topics::AGENT_REGISTRATION_TIMEOUT, agent_id, Actor::System, serde_json::json!({}))
            .await?;
        warn!(agent = %agent.name, "Registration timed out, entry deleted");
        Ok(())
    }

    /// Serialized status transition used by the scheduler and supervisors.
    pub async fn transition(&self, agent_id: Uuid, new_status: AgentStatus) -> KernelResult<Agent> {
        let agent = {
            let lock = self.lock_for(agent_id).await;
            let _guard = lock.lock().await;

            let now = self.clock.utc_now();
            let mut agent = self.require(agent_id).await?;
            agent.transition_to(new_status, now)?;
            self.agents.update(&agent).await?;

            if new_status == AgentStatus::Quarantined {
                self.index.write().await.remove(agent_id);
            }
            agent
        };

        if new_status == AgentStatus::Quarantined {
            self.bus
                .publish(topics::AGENT_QUARANTINED, agent_id, Actor::System, serde_json::json!({}))
                .await?;
        }
        Ok(agent)
    }

    /// Bind a task to an idle agent (idle -> running).
    pub async fn bind_task(&self, agent_id: Uuid, task_id: Uuid) -> KernelResult<Agent> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.utc_now();
        let mut agent = self.require(agent_id).await?;
        agent.assign_task(task_id, now)?;
        self.agents.update(&agent).await?;
        Ok(agent)
    }

    /// Release a running agent back to idle.
    pub async fn release(&self, agent_id: Uuid) -> KernelResult<()> {
        let lock = self.lock_for(agent_id).await;
        let _guard = lock.lock().await;

        let now = self.clock.utc_now();
        let mut agent = self.require(agent_id).await?;
        if agent.status == AgentStatus::Running {
            agent.transition_to(AgentStatus::Idle, now)?;
            self.agents.update(&agent).await?;
        }
        Ok(())
    }

    /// Remove an agent entirely. Its history remains in the audit trail
    /// and the event journal.
    pub async fn deregister(&self, agent_id: Uuid) -> KernelResult<()> {
        if let Some(handles) = self.subscriptions.lock().await.remove(&agent_id) {
            self.bus.unsubscribe(handles.inbox).await;
            self.bus.unsubscribe(handles.broadcast).await;
            self.bus.unsubscribe(handles.shutdown).await;
        }
        self.mailboxes.lock().await.remove(&agent_id);
        self.index.write().await.remove(agent_id);
        self.restart_windows.lock().await.remove(&agent_id);
        self.agents.delete(agent_id).await
    }

    /// Idle agents bound to `phase_id` that satisfy `required`.
    pub async fn candidates_for(
        &self,
        phase_id: Uuid,
        required: &BTreeSet<String>,
    ) -> KernelResult<Vec<Agent>> {
        let ids = self.index.read().await.candidates(phase_id, required);
        let mut result = Vec::new();
        for id in ids {
            if let Some(agent) = self.agents.get(id).await? {
                if agent.status.is_schedulable() && agent.satisfies(required) {
                    result.push(agent);
                }
            }
        }
        result.sort_by_key(|a| a.created_at);
        Ok(result)
    }

    /// Rebuild the capability index from the store. Run on startup and
    /// on suspicion of drift.
    pub async fn rebuild_index(&self) -> KernelResult<()> {
        let agents = self.agents.list(Default::default()).await?;
        let mut index = self.index.write().await;
        *index = CapabilityIndex::default();
        for agent in &agents {
            if agent.status != AgentStatus::Quarantined {
                index.insert(agent);
            }
        }
        Ok(())
    }

    pub async fn get(&self, agent_id: Uuid) -> KernelResult<Option<Agent>> {
        self.agents.get(agent_id).await
    }

    async fn require(&self, agent_id: Uuid) -> KernelResult<Agent> {
        self.agents
            .get(agent_id)
            .await?
            .ok_or(KernelError::NotFound { entity: "agent", id: agent_id.to_string() })
    }
}

/// Derive the human-readable registration name `{type}-{phase}-{n}`.
fn derive_name(agent_type: AgentType, phase_id: Option<Uuid>, counter: u64) -> String {
    match phase_id {
        Some(phase) => {
            let short = &phase.to_string()[..8];
            format!("{}-{}-{}", agent_type.as_str(), short, counter)
        }
        None => format!("{}-{}", agent_type.as_str(), counter),
    }
}

//! Event envelope and the stable topic names.
//!
//! Events are ordered per `(topic, partition_key)` where the partition
//! key is the primary entity ID. Every payload carries the correlation
//! id, occurrence time, actor, and schema version in the envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current envelope schema version.
pub const SCHEMA_VERSION: u16 = 1;

/// Stable topic names. External consumers depend on these strings.
pub mod topics {
    pub const AGENT_REGISTERED: &str = "agent.registered";
    pub const AGENT_HEARTBEAT: &str = "agent.heartbeat";
    pub const AGENT_HEARTBEAT_MISSED: &str = "agent.heartbeat.missed";
    pub const AGENT_UNRESPONSIVE: &str = "agent.unresponsive";
    pub const AGENT_QUARANTINED: &str = "agent.quarantined";
    pub const AGENT_REGISTRATION_TIMEOUT: &str = "agent.registration_timeout";
    pub const AGENT_ESCALATION: &str = "agent.escalation";

    pub const TASK_CREATED: &str = "task.created";
    pub const TASK_READY: &str = "task.ready";
    pub const TASK_ASSIGNED: &str = "task.assigned";
    pub const TASK_STARTED: &str = "task.started";
    pub const TASK_COMPLETED: &str = "task.completed";
    pub const TASK_FAILED: &str = "task.failed";
    pub const TASK_BLOCKED: &str = "task.blocked";
    pub const TASK_NEEDS_WORK: &str = "task.needs_work";

    pub const TICKET_CREATED: &str = "ticket.created";
    pub const TICKET_TRANSITIONED: &str = "ticket.transitioned";
    pub const TICKET_APPROVAL_PENDING: &str = "ticket_approval_pending";
    pub const TICKET_APPROVED: &str = "ticket_approved";
    pub const TICKET_REJECTED: &str = "ticket_rejected";
    pub const TICKET_TIMED_OUT: &str = "ticket_timed_out";

    pub const DISCOVERY_RECORDED: &str = "discovery.recorded";

    pub const VALIDATION_STARTED: &str = "validation.started";
    pub const VALIDATION_REVIEW_SUBMITTED: &str = "validation.review_submitted";
    pub const VALIDATION_PASSED: &str = "validation.passed";
    pub const VALIDATION_FAILED: &str = "validation.failed";

    pub const PHASE_GATE_REJECTED: &str = "phase.gate_rejected";

    pub const SUPERVISOR_ACTION: &str = "supervisor.action";
    pub const SUPERVISOR_REVERTED: &str = "supervisor.reverted";

    pub const DIAGNOSTIC_STARTED: &str = "diagnostic.started";
    pub const DIAGNOSTIC_COMPLETED: &str = "diagnostic.completed";

    /// Prefix for quarantined deliveries; the original topic is appended.
    pub const DEAD_LETTER_PREFIX: &str = "deadletter.";

    /// System-wide broadcast to all registered agents.
    pub const SYSTEM_BROADCAST: &str = "system.broadcast";
    /// Shutdown channel agents subscribe to at registration.
    pub const SYSTEM_SHUTDOWN: &str = "system.shutdown";
}

/// Who produced an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Actor {
    /// The kernel itself (sweepers, scheduler, gates)
    System,
    /// A registered agent
    Agent(Uuid),
    /// A human operator acting through the external surface
    Human(String),
}

impl Actor {
    pub fn label(&self) -> String {
        match self {
            Self::System => "system".to_string(),
            Self::Agent(id) => format!("agent:{id}"),
            Self::Human(name) => format!("human:{name}"),
        }
    }
}

/// A journaled event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    pub topic: String,
    /// Primary entity id; total order holds within (topic, partition_key)
    pub partition_key: Uuid,
    /// Monotonic per-partition sequence assigned at append
    pub sequence: u64,
    pub correlation_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub actor: Actor,
    pub payload: serde_json::Value,
    pub schema_version: u16,
}

impl EventEnvelope {
    pub fn new(
        topic: impl Into<String>,
        partition_key: Uuid,
        actor: Actor,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            partition_key,
            sequence: 0,
            correlation_id: Uuid::new_v4(),
            occurred_at,
            actor,
            payload,
            schema_version: SCHEMA_VERSION,
        }
    }

    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// Delivery guarantee requested by a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    /// Durable: cursor persisted, replay on reconnect, handler must be
    /// idempotent keyed by (topic, correlation_id)
    AtLeastOnce,
    /// Fire-and-forget: drops under backpressure
    BestEffort,
}

/// Match a subscription pattern against a topic.
///
/// Patterns are exact topics, a trailing `*` segment (`task.*`), or the
/// lone `*` which matches everything.
pub fn topic_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix(".*") {
        return topic == prefix || topic.starts_with(&format!("{prefix}."));
    }
    pattern == topic
}

//! Event journal port.
//!
//! The journal is the append-only source of truth for the event bus.
//! `append` assigns a per-`(topic, partition_key)` sequence and a global
//! position; subscriber cursors persist the last acknowledged position.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::EventEnvelope;

/// Query over the journal.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Exact topic or trailing-wildcard pattern (`task.*`)
    pub topic_pattern: Option<String>,
    pub partition_key: Option<Uuid>,
    pub correlation_id: Option<Uuid>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

/// A journaled event together with its global position.
#[derive(Debug, Clone)]
pub struct JournaledEvent {
    /// Global append position, strictly increasing
    pub position: u64,
    pub envelope: EventEnvelope,
}

/// Port over the persistent event journal.
#[async_trait]
pub trait EventJournal: Send + Sync {
    /// Durably append an event. Returns the envelope with its assigned
    /// per-partition sequence, plus the global position.
    async fn append(&self, envelope: EventEnvelope) -> KernelResult<JournaledEvent>;

    async fn query(&self, query: EventQuery) -> KernelResult<Vec<JournaledEvent>>;

    /// Latest sequence within a partition, if any event exists.
    async fn latest_sequence(&self, topic: &str, partition_key: Uuid) -> KernelResult<Option<u64>>;

    /// Events after a global position matching a pattern, oldest first.
    async fn list_after_position(
        &self,
        position: u64,
        topic_pattern: &str,
        limit: u32,
    ) -> KernelResult<Vec<JournaledEvent>>;

    /// Last acknowledged global position for a durable subscriber.
    async fn get_cursor(&self, subscriber: &str) -> KernelResult<Option<u64>>;

    async fn set_cursor(&self, subscriber: &str, position: u64) -> KernelResult<()>;
}

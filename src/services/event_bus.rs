//! Event bus service.
//!
//! Publish appends to the persistent journal first, so an event is
//! durable before any subscriber sees it, then fans out to per-subscriber
//! bounded queues. Order is total within a `(topic, partition_key)`
//! partition because sequence assignment happens inside the journal
//! append transaction.
//!
//! Backpressure: a best-effort subscriber simply loses events when its
//! queue is full. An at-least-once subscriber gets an async redelivery
//! loop with exponential backoff; if its queue stays full past the slow
//! consumer timeout it is disconnected and must resume via `replay`
//! from its persisted cursor. Deliveries that exhaust the retry budget
//! are quarantined on the dead-letter topic.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{topic_matches, topics, Actor, BusConfig, DeliveryMode, EventEnvelope};
use crate::domain::ports::{Clock, EventJournal, JournaledEvent};

/// Handle identifying a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(pub Uuid);

struct Subscriber {
    id: SubscriberId,
    /// Durable name; the cursor key for at-least-once subscribers
    name: String,
    pattern: String,
    /// When set, only events on this partition key are delivered
    partition: Option<Uuid>,
    mode: DeliveryMode,
    tx: mpsc::Sender<JournaledEvent>,
    /// When the queue first refused an event, for slow-consumer eviction
    blocked_since: Option<Instant>,
}

/// Central topic-based publish/subscribe fabric.
pub struct EventBus {
    journal: Arc<dyn EventJournal>,
    clock: Arc<dyn Clock>,
    config: BusConfig,
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new(journal: Arc<dyn EventJournal>, clock: Arc<dyn Clock>, config: BusConfig) -> Self {
        Self {
            journal,
            clock,
            config,
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Publish an event. Returns once the event is durable in the journal.
    pub async fn publish(
        &self,
        topic: &str,
        partition_key: Uuid,
        actor: Actor,
        payload: serde_json::Value,
    ) -> KernelResult<EventEnvelope> {
        let envelope = EventEnvelope::new(topic, partition_key, actor, payload, self.clock.utc_now());
        self.publish_envelope(envelope).await
    }

    /// Publish with an explicit correlation id, linking the event to an
    /// existing causal chain.
    pub async fn publish_correlated(
        &self,
        topic: &str,
        partition_key: Uuid,
        actor: Actor,
        payload: serde_json::Value,
        correlation_id: Uuid,
    ) -> KernelResult<EventEnvelope> {
        let envelope = EventEnvelope::new(topic, partition_key, actor, payload, self.clock.utc_now())
            .with_correlation(correlation_id);
        self.publish_envelope(envelope).await
    }

    async fn publish_envelope(&self, envelope: EventEnvelope) -> KernelResult<EventEnvelope> {
        let journaled = self.journal.append(envelope).await?;
        self.fan_out(&journaled).await;
        Ok(journaled.envelope)
    }

    /// Subscribe to a topic pattern. Returns the receiver end of the
    /// subscriber's bounded queue.
    pub async fn subscribe(
        &self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        mode: DeliveryMode,
    ) -> (SubscriberId, mpsc::Receiver<JournaledEvent>) {
        self.subscribe_partition(name, pattern, None, mode).await
    }

    /// Subscribe to a topic pattern restricted to one partition key.
    /// This is how an agent's inbox sees only its own assignments.
    pub async fn subscribe_partition(
        &self,
        name: impl Into<String>,
        pattern: impl Into<String>,
        partition: Option<Uuid>,
        mode: DeliveryMode,
    ) -> (SubscriberId, mpsc::Receiver<JournaledEvent>) {
        let (tx, rx) = mpsc::channel(self.config.subscriber_queue_capacity);
        let id = SubscriberId(Uuid::new_v4());
        let subscriber = Subscriber {
            id,
            name: name.into(),
            pattern: pattern.into(),
            partition,
            mode,
            tx,
            blocked_since: None,
        };
        self.subscribers.write().await.push(subscriber);
        (id, rx)
    }

    pub async fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Acknowledge processing up to a global position for a durable
    /// subscriber, persisting its replay cursor.
    pub async fn ack(&self, subscriber_name: &str, position: u64) -> KernelResult<()> {
        self.journal.set_cursor(subscriber_name, position).await
    }

    /// Events past the subscriber's persisted cursor, oldest first.
    /// Used to resume after a disconnect.
    pub async fn replay(
        &self,
        subscriber_name: &str,
        pattern: &str,
        limit: u32,
    ) -> KernelResult<Vec<JournaledEvent>> {
        let cursor = self.journal.get_cursor(subscriber_name).await?.unwrap_or(0);
        self.journal.list_after_position(cursor, pattern, limit).await
    }

    async fn fan_out(&self, event: &JournaledEvent) {
        let mut evicted: Vec<SubscriberId> = Vec::new();
        let slow_timeout = Duration::from_secs(self.config.slow_consumer_timeout_seconds);

        {
            let mut subs = self.subscribers.write().await;
            for sub in subs.iter_mut() {
                if !topic_matches(&sub.pattern, &event.envelope.topic) {
                    continue;
                }
                if sub.partition.is_some_and(|p| p != event.envelope.partition_key) {
                    continue;
                }
                match sub.tx.try_send(event.clone()) {
                    Ok(()) => {
                        sub.blocked_since = None;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        evicted.push(sub.id);
                    }
                    Err(mpsc::error::TrySendError::Full(ev)) => {
                        let first_blocked = *sub.blocked_since.get_or_insert_with(Instant::now);
                        if first_blocked.elapsed() > slow_timeout {
                            warn!(
                                subscriber = %sub.name,
                                topic = %event.envelope.topic,
                                "Disconnecting slow consumer; resume via replay from cursor"
                            );
                            evicted.push(sub.id);
                        } else if sub.mode == DeliveryMode::AtLeastOnce {
                            self.spawn_redelivery(sub.name.clone(), sub.tx.clone(), ev);
                        } else {
                            debug!(subscriber = %sub.name, "Dropping event for best-effort subscriber");
                        }
                    }
                }
            }
            subs.retain(|s| !evicted.contains(&s.id));
        }
    }

    /// Retry a refused delivery with exponential backoff, dead-lettering
    /// on exhaustion. Runs detached so publishers never block.
    fn spawn_redelivery(
        &self,
        subscriber_name: String,
        tx: mpsc::Sender<JournaledEvent>,
        event: JournaledEvent,
    ) {
        let journal = Arc::clone(&self.journal);
        let clock = Arc::clone(&self.clock);
        let max_attempts = self.config.retry_max_attempts;
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(self.config.retry_base_ms),
            multiplier: 2.0,
            randomization_factor: 0.0,
            max_interval: Duration::from_secs(60),
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        };

        tokio::spawn(async move {
            let mut attempt = 0u32;
            let outcome = backoff::future::retry(policy, || {
                attempt += 1;
                let exhausted = attempt >= max_attempts;
                let this_attempt = attempt;
                let tx = tx.clone();
                let event = event.clone();
                let subscriber = subscriber_name.clone();
                async move {
                    match tx.try_send(event) {
                        Ok(()) => Ok(()),
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            Err(backoff::Error::permanent(Redelivery::Closed))
                        }
                        Err(mpsc::error::TrySendError::Full(_)) if exhausted => {
                            Err(backoff::Error::permanent(Redelivery::Exhausted))
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!(
                                subscriber = %subscriber,
                                attempt = this_attempt,
                                "Redelivery attempt failed, queue still full"
                            );
                            Err(backoff::Error::transient(Redelivery::QueueFull))
                        }
                    }
                }
            })
            .await;

            match outcome {
                // Delivered, or the subscriber is gone; nothing to quarantine.
                Ok(()) | Err(Redelivery::Closed) => return,
                Err(Redelivery::Exhausted | Redelivery::QueueFull) => {}
            }

            // Quarantine to the dead-letter topic; replay remains possible
            // from the original journal entry.
            let dead_topic = format!("{}{}", topics::DEAD_LETTER_PREFIX, event.envelope.topic);
            let dead = EventEnvelope::new(
                dead_topic,
                event.envelope.partition_key,
                Actor::System,
                serde_json::json!({
                    "subscriber": subscriber_name,
                    "original_topic": event.envelope.topic,
                    "original_position": event.position,
                }),
                clock.utc_now(),
            )
            .with_correlation(event.envelope.correlation_id);

            if let Err(e) = journal.append(dead).await {
                warn!("Failed to journal dead-letter event: {e}");
            }
        });
    }
}

/// Why a redelivery loop stopped without a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Redelivery {
    /// The subscriber's receiver was dropped
    Closed,
    /// The retry budget ran out against a full queue
    Exhausted,
    /// Transient marker while the queue is full
    QueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteEventJournal};
    use crate::domain::ports::SystemClock;

    async fn test_bus() -> EventBus {
        let pool = create_migrated_test_pool().await.expect("test pool");
        let journal = Arc::new(SqliteEventJournal::new(pool));
        EventBus::new(journal, Arc::new(SystemClock::new()), BusConfig::default())
    }

    #[tokio::test]
    async fn test_publish_assigns_partition_sequence() {
        let bus = test_bus().await;
        let partition = Uuid::new_v4();

        let e1 = bus
            .publish(topics::TASK_CREATED, partition, Actor::System, serde_json::json!({}))
            .await
            .unwrap();
        let e2 = bus
            .publish(topics::TASK_CREATED, partition, Actor::System, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(e1.sequence, 0);
        assert_eq!(e2.sequence, 1);

        // Separate partition starts over.
        let e3 = bus
            .publish(topics::TASK_CREATED, Uuid::new_v4(), Actor::System, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(e3.sequence, 0);
    }

    #[tokio::test]
    async fn test_subscriber_receives_matching_topics() {
        let bus = test_bus().await;
        let (_id, mut rx) = bus.subscribe("worker-1", "task.*", DeliveryMode::BestEffort).await;

        let partition = Uuid::new_v4();
        bus.publish(topics::TASK_CREATED, partition, Actor::System, serde_json::json!({}))
            .await
            .unwrap();
        bus.publish(topics::TICKET_CREATED, partition, Actor::System, serde_json::json!({}))
            .await
            .unwrap();
        bus.publish(topics::TASK_ASSIGNED, partition, Actor::System, serde_json::json!({}))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.envelope.topic, topics::TASK_CREATED);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.envelope.topic, topics::TASK_ASSIGNED);
    }

    #[tokio::test]
    async fn test_replay_from_cursor() {
        let bus = test_bus().await;
        let partition = Uuid::new_v4();

        let mut positions = Vec::new();
        for i in 0..5 {
            bus.publish(topics::TASK_CREATED, partition, Actor::System, serde_json::json!({ "i": i }))
                .await
                .unwrap();
            positions.push(i);
        }

        // No cursor: everything replays.
        let all = bus.replay("late-subscriber", "task.*", 100).await.unwrap();
        assert_eq!(all.len(), 5);

        // Ack to the middle and replay the remainder.
        bus.ack("late-subscriber", all[2].position).await.unwrap();
        let rest = bus.replay("late-subscriber", "task.*", 100).await.unwrap();
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let bus = test_bus().await;
        let (id, mut rx) = bus.subscribe("gone", "*", DeliveryMode::BestEffort).await;
        bus.unsubscribe(id).await;
        bus.publish(topics::TASK_CREATED, Uuid::new_v4(), Actor::System, serde_json::json!({}))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(bus.subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn test_correlation_id_propagates() {
        let bus = test_bus().await;
        let correlation = Uuid::new_v4();
        let event = bus
            .publish_correlated(
                topics::SUPERVISOR_ACTION,
                Uuid::new_v4(),
                Actor::System,
                serde_json::json!({}),
                correlation,
            )
            .await
            .unwrap();
        assert_eq!(event.correlation_id, correlation);
    }
}

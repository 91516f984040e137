mod common;

use common::setup;
use conductor::adapters::sqlite::SqliteEventJournal;
use conductor::domain::models::{topics, Actor, DeliveryMode, EventEnvelope};
use conductor::domain::ports::{Clock, EventJournal, EventQuery};
use uuid::Uuid;

#[tokio::test]
async fn test_partition_order_is_monotonic() {
    let h = setup().await;
    let partition = Uuid::new_v4();

    for i in 0..10 {
        h.clock.advance(chrono::Duration::milliseconds(7));
        h.kernel
            .bus
            .publish(topics::TASK_STARTED, partition, Actor::System, serde_json::json!({ "i": i }))
            .await
            .unwrap();
    }

    let journal = SqliteEventJournal::new(h.pool.clone());
    let events = journal
        .query(EventQuery { partition_key: Some(partition), ..Default::default() })
        .await
        .unwrap();

    assert_eq!(events.len(), 10);
    for (i, window) in events.windows(2).enumerate() {
        assert_eq!(window[0].envelope.sequence, i as u64);
        assert!(window[0].envelope.occurred_at <= window[1].envelope.occurred_at);
        assert!(window[0].position < window[1].position);
    }
}

#[tokio::test]
async fn test_query_by_correlation_chain() {
    let h = setup().await;
    let correlation = Uuid::new_v4();

    for topic in [topics::SUPERVISOR_ACTION, topics::TASK_FAILED, topics::SUPERVISOR_REVERTED] {
        h.kernel
            .bus
            .publish_correlated(topic, Uuid::new_v4(), Actor::System, serde_json::json!({}), correlation)
            .await
            .unwrap();
    }
    h.kernel
        .bus
        .publish(topics::TASK_CREATED, Uuid::new_v4(), Actor::System, serde_json::json!({}))
        .await
        .unwrap();

    let journal = SqliteEventJournal::new(h.pool.clone());
    let chain = journal
        .query(EventQuery { correlation_id: Some(correlation), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(chain.len(), 3);
}

#[tokio::test]
async fn test_direct_append_assigns_sequence_per_partition() {
    let h = setup().await;
    let journal = SqliteEventJournal::new(h.pool.clone());
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();

    let e1 = journal
        .append(EventEnvelope::new("x.y", a, Actor::System, serde_json::json!({}), h.clock.utc_now()))
        .await
        .unwrap();
    let e2 = journal
        .append(EventEnvelope::new("x.y", b, Actor::System, serde_json::json!({}), h.clock.utc_now()))
        .await
        .unwrap();
    let e3 = journal
        .append(EventEnvelope::new("x.y", a, Actor::System, serde_json::json!({}), h.clock.utc_now()))
        .await
        .unwrap();

    assert_eq!(e1.envelope.sequence, 0);
    assert_eq!(e2.envelope.sequence, 0);
    assert_eq!(e3.envelope.sequence, 1);
    assert_eq!(journal.latest_sequence("x.y", a).await.unwrap(), Some(1));
    assert_eq!(journal.latest_sequence("x.y", Uuid::new_v4()).await.unwrap(), None);
}

#[tokio::test]
async fn test_durable_subscriber_resumes_from_cursor() {
    let h = setup().await;
    let partition = Uuid::new_v4();

    let (_id, mut rx) = h.kernel.bus.subscribe("auditor", "task.*", DeliveryMode::AtLeastOnce).await;
    h.kernel
        .bus
        .publish(topics::TASK_CREATED, partition, Actor::System, serde_json::json!({ "n": 1 }))
        .await
        .unwrap();
    let first = rx.recv().await.unwrap();
    h.kernel.bus.ack("auditor", first.position).await.unwrap();

    // More events land while the auditor is away.
    h.kernel
        .bus
        .publish(topics::TASK_STARTED, partition, Actor::System, serde_json::json!({ "n": 2 }))
        .await
        .unwrap();
    h.kernel
        .bus
        .publish(topics::TASK_COMPLETED, partition, Actor::System, serde_json::json!({ "n": 3 }))
        .await
        .unwrap();

    let replayed = h.kernel.bus.replay("auditor", "task.*", 100).await.unwrap();
    let topics_seen: Vec<&str> = replayed.iter().map(|e| e.envelope.topic.as_str()).collect();
    assert_eq!(topics_seen, vec![topics::TASK_STARTED, topics::TASK_COMPLETED]);
}

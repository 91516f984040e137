mod common;

use common::setup;
use conductor::domain::models::{DiscoveryType, TaskPriority, TaskStatus};
use conductor::services::CreateTicketOptions;

async fn source_task(h: &common::Harness) -> uuid::Uuid {
    let ticket = h
        .kernel
        .create_ticket("T", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    h.submit_task(ticket.id, h.requirements.id, "source", TaskPriority::Medium, &[]).await
}

#[tokio::test]
async fn test_branch_spawns_into_foreign_phase() {
    let h = setup().await;
    let source = source_task(&h).await;

    // design is not reachable from requirements for this ticket's tasks,
    // but discovery branching bypasses the progression DAG.
    let branch = h
        .kernel
        .discovery
        .record_discovery_and_branch(
            source,
            DiscoveryType::TechDebt,
            "parser module needs a rewrite",
            h.design.id,
            "Rework the parser module design",
            false,
        )
        .await
        .unwrap();

    assert!(branch.newly_recorded);
    assert_eq!(branch.spawned_task.phase_id, h.design.id);
    assert_eq!(branch.spawned_task.parent_task_id, Some(source));
    assert_eq!(branch.spawned_task.status, TaskStatus::Pending);
}

#[tokio::test]
async fn test_duplicate_discovery_returns_original_spawn() {
    let h = setup().await;
    let source = source_task(&h).await;

    let first = h
        .kernel
        .discovery
        .record_discovery_and_branch(
            source,
            DiscoveryType::Bug,
            "Null  check missing in parser",
            h.requirements.id,
            "Fix the null check",
            false,
        )
        .await
        .unwrap();

    // Same content modulo case and whitespace: idempotent.
    let second = h
        .kernel
        .discovery
        .record_discovery_and_branch(
            source,
            DiscoveryType::Bug,
            "null check missing in PARSER",
            h.requirements.id,
            "Fix the null check again",
            false,
        )
        .await
        .unwrap();

    assert!(!second.newly_recorded);
    assert_eq!(second.discovery.id, first.discovery.id);
    assert_eq!(second.spawned_task.id, first.spawned_task.id);
}

#[tokio::test]
async fn test_priority_boost_one_rank_clamped() {
    let h = setup().await;
    let source = source_task(&h).await; // medium

    let boosted = h
        .kernel
        .discovery
        .record_discovery_and_branch(
            source,
            DiscoveryType::Performance,
            "hot loop allocates",
            h.requirements.id,
            "Remove allocation from hot loop",
            true,
        )
        .await
        .unwrap();
    assert_eq!(boosted.spawned_task.priority, TaskPriority::High);

    // A critical source stays critical.
    let ticket = h
        .kernel
        .create_ticket("T2", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    let critical_source = h
        .submit_task(ticket.id, h.requirements.id, "critical source", TaskPriority::Critical, &[])
        .await;
    let clamped = h
        .kernel
        .discovery
        .record_discovery_and_branch(
            critical_source,
            DiscoveryType::Security,
            "token leaks into logs",
            h.requirements.id,
            "Scrub tokens from logs",
            true,
        )
        .await
        .unwrap();
    assert_eq!(clamped.spawned_task.priority, TaskPriority::Critical);
}

#[tokio::test]
async fn test_clarification_blocks_the_source() {
    let h = setup().await;
    let ticket = h
        .kernel
        .create_ticket("T", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    let source = h.submit_task(ticket.id, h.requirements.id, "source", TaskPriority::Medium, &[]).await;
    let agent = h.register_worker(h.requirements.id, &[]).await;
    h.kernel.scheduler.dispatch_tick().await.unwrap();
    h.kernel.scheduler.start_task(source, agent).await.unwrap();

    let branch = h
        .kernel
        .discovery
        .record_discovery_and_branch(
            source,
            DiscoveryType::Clarification,
            "is the retry budget per call or global?",
            h.requirements.id,
            "Answer the retry budget question",
            false,
        )
        .await
        .unwrap();

    let source_task = h.kernel.scheduler.get(source).await.unwrap().unwrap();
    assert_eq!(source_task.status, TaskStatus::Blocked);
    assert!(source_task.depends_on.contains(&branch.spawned_task.id));
}

#[tokio::test]
async fn test_discovery_recorded_event_emitted() {
    let h = setup().await;
    let source = source_task(&h).await;
    h.kernel
        .discovery
        .record_discovery_and_branch(
            source,
            DiscoveryType::Integration,
            "downstream schema drift",
            h.requirements.id,
            "Align the schema",
            false,
        )
        .await
        .unwrap();

    use conductor::adapters::sqlite::SqliteEventJournal;
    use conductor::domain::ports::{EventJournal, EventQuery};
    let journal = SqliteEventJournal::new(h.pool.clone());
    let events = journal
        .query(EventQuery { topic_pattern: Some("discovery.recorded".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].envelope.payload["discovery_type"], "integration");
}

mod common;

use std::collections::BTreeSet;

use common::setup;
use conductor::domain::models::{AgentStatus, AgentType};
use conductor::services::RegistrationRequest;

fn request(agent_type: AgentType, phase: Option<uuid::Uuid>) -> RegistrationRequest {
    RegistrationRequest {
        agent_type,
        phase_id: phase,
        capabilities: BTreeSet::new(),
        max_concurrent_tasks: 1,
        version: "1.0.0".to_string(),
        binary_sha256: None,
        name: None,
    }
}

#[tokio::test]
async fn test_registration_returns_signing_key_once() {
    let h = setup().await;
    let grant = h
        .kernel
        .registry
        .register(request(AgentType::Worker, Some(h.requirements.id)))
        .await
        .unwrap();

    assert!(grant.name.starts_with("worker-"));
    assert_eq!(grant.public_key.len(), 64);
    let signing = grant.signing_key.expect("first registration returns the signing key");
    assert_eq!(signing.len(), 64);

    // The stored record holds only the verifying key.
    let agent = h.kernel.registry.get(grant.agent_id).await.unwrap().unwrap();
    assert_eq!(agent.public_key, grant.public_key);
    assert_eq!(agent.status, AgentStatus::Idle);
}

#[tokio::test]
async fn test_reregistration_within_window_returns_same_id() {
    let h = setup().await;
    let mut req = request(AgentType::Worker, Some(h.requirements.id));
    req.name = Some("worker-req-1".to_string());

    let first = h.kernel.registry.register(req.clone()).await.unwrap();
    let second = h.kernel.registry.register(req).await.unwrap();

    assert_eq!(first.agent_id, second.agent_id);
    assert!(second.signing_key.is_none());
}

#[tokio::test]
async fn test_prevalidation_rejections() {
    let h = setup().await;

    // Workers must bind a phase.
    let err = h.kernel.registry.register(request(AgentType::Worker, None)).await.unwrap_err();
    assert_eq!(err.code(), "registration_rejected");

    // Zero capacity is refused.
    let mut req = request(AgentType::Monitor, None);
    req.max_concurrent_tasks = 0;
    let err = h.kernel.registry.register(req).await.unwrap_err();
    assert_eq!(err.code(), "registration_rejected");

    // A malformed binary hash is refused.
    let mut req = request(AgentType::Monitor, None);
    req.binary_sha256 = Some("nothex".to_string());
    let err = h.kernel.registry.register(req).await.unwrap_err();
    assert_eq!(err.code(), "registration_rejected");
}

#[tokio::test]
async fn test_registration_timeout_deletes_entry() {
    let h = setup().await;
    let grant = h
        .kernel
        .registry
        .register(request(AgentType::Worker, Some(h.requirements.id)))
        .await
        .unwrap();

    // No initial heartbeat inside the 60s window.
    h.clock.advance(chrono::Duration::seconds(61));
    h.kernel.registry.handle_registration_timeout(grant.agent_id).await.unwrap();

    assert!(h.kernel.registry.get(grant.agent_id).await.unwrap().is_none());

    use conductor::adapters::sqlite::SqliteEventJournal;
    use conductor::domain::ports::{EventJournal, EventQuery};
    let journal = SqliteEventJournal::new(h.pool.clone());
    let events = journal
        .query(EventQuery {
            topic_pattern: Some("agent.registration_timeout".into()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_initial_heartbeat_keeps_entry() {
    let h = setup().await;
    let grant = h
        .kernel
        .registry
        .register(request(AgentType::Worker, Some(h.requirements.id)))
        .await
        .unwrap();

    h.clock.advance(chrono::Duration::seconds(10));
    h.kernel.registry.heartbeat(grant.agent_id).await.unwrap();

    h.clock.advance(chrono::Duration::seconds(55));
    h.kernel.registry.handle_registration_timeout(grant.agent_id).await.unwrap();
    assert!(h.kernel.registry.get(grant.agent_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_heartbeat_sweep_marks_unresponsive_then_restarts() {
    let h = setup().await;
    let agent = h.register_worker(h.requirements.id, &[]).await;

    // Silence past the 30s TTL.
    h.clock.advance(chrono::Duration::seconds(31));
    h.kernel.registry.sweep_heartbeats().await.unwrap();
    let stored = h.kernel.registry.get(agent).await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::Unresponsive);

    // The next sweep auto-restarts it.
    h.kernel.registry.sweep_heartbeats().await.unwrap();
    let stored = h.kernel.registry.get(agent).await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::Idle);
    assert_eq!(stored.restart_count, 1);
}

#[tokio::test]
async fn test_restart_budget_exhaustion_escalates() {
    let h = setup().await;
    let agent = h.register_worker(h.requirements.id, &[]).await;

    // Burn through the three restarts.
    for round in 1..=3u32 {
        h.clock.advance(chrono::Duration::seconds(31));
        h.kernel.registry.sweep_heartbeats().await.unwrap();
        h.kernel.registry.sweep_heartbeats().await.unwrap();
        let stored = h.kernel.registry.get(agent).await.unwrap().unwrap();
        assert_eq!(stored.restart_count, round);
    }

    // The fourth silence escalates instead of restarting.
    h.clock.advance(chrono::Duration::seconds(31));
    h.kernel.registry.sweep_heartbeats().await.unwrap();
    h.kernel.registry.sweep_heartbeats().await.unwrap();
    let stored = h.kernel.registry.get(agent).await.unwrap().unwrap();
    assert_eq!(stored.status, AgentStatus::Unresponsive);

    use conductor::adapters::sqlite::SqliteEventJournal;
    use conductor::domain::ports::{EventJournal, EventQuery};
    let journal = SqliteEventJournal::new(h.pool.clone());
    let events = journal
        .query(EventQuery { topic_pattern: Some("agent.escalation".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_heartbeat_recovers_unresponsive_agent() {
    let h = setup().await;
    let agent = h.register_worker(h.requirements.id, &[]).await;

    h.clock.advance(chrono::Duration::seconds(31));
    h.kernel.registry.sweep_heartbeats().await.unwrap();
    assert_eq!(
        h.kernel.registry.get(agent).await.unwrap().unwrap().status,
        AgentStatus::Unresponsive
    );

    h.kernel.registry.heartbeat(agent).await.unwrap();
    assert_eq!(h.kernel.registry.get(agent).await.unwrap().unwrap().status, AgentStatus::Idle);
}

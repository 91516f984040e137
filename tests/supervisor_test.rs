mod common;

use common::setup;
use conductor::domain::models::{AgentStatus, AgentType, TaskPriority, TaskStatus};
use conductor::services::{CreateTicketOptions, Issuer};

async fn running_task(h: &common::Harness) -> (uuid::Uuid, uuid::Uuid) {
    let ticket = h
        .kernel
        .create_ticket("T", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    let task = h.submit_task(ticket.id, h.requirements.id, "work", TaskPriority::Medium, &[]).await;
    let agent = h.register_worker(h.requirements.id, &[]).await;
    h.kernel.scheduler.dispatch_tick().await.unwrap();
    h.kernel.scheduler.start_task(task, agent).await.unwrap();
    (task, agent)
}

#[tokio::test]
async fn test_worker_cannot_cancel_tasks() {
    let h = setup().await;
    let (task, worker) = running_task(&h).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(worker).await.unwrap();
    let err = h.kernel.supervisor.cancel_task(issuer, task, "nope").await.unwrap_err();
    assert_eq!(err.code(), "not_authorized");
}

#[tokio::test]
async fn test_watchdog_cancels_and_releases_agent() {
    let h = setup().await;
    let (task, worker) = running_task(&h).await;
    let watchdog = h.register_agent(AgentType::Watchdog, None, &[]).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(watchdog).await.unwrap();
    let action = h.kernel.supervisor.cancel_task(issuer, task, "stale work").await.unwrap();
    assert!(!action.reversed);
    assert_eq!(action.audit_log.len(), 1);
    assert!(action.snapshot_before["status"].as_str().is_some());

    let task = h.kernel.scheduler.get(task).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    let agent = h.kernel.registry.get(worker).await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
}

#[tokio::test]
async fn test_revert_restores_snapshot_and_rebinds_agent() {
    let h = setup().await;
    let (task, worker) = running_task(&h).await;
    let watchdog = h.register_agent(AgentType::Watchdog, None, &[]).await;
    let monitor = h.register_agent(AgentType::Monitor, None, &[]).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(watchdog).await.unwrap();
    let action = h.kernel.supervisor.cancel_task(issuer, task, "mistake").await.unwrap();
    assert_eq!(
        h.kernel.registry.get(worker).await.unwrap().unwrap().status,
        AgentStatus::Idle
    );

    // A monitor outranks the watchdog issuer and may revert.
    let reverter = h.kernel.supervisor.issuer_for_agent(monitor).await.unwrap();
    let reverted = h.kernel.supervisor.revert(reverter, action.id).await.unwrap();
    assert!(reverted.reversed);

    // The task row and the agent binding are both restored.
    let task = h.kernel.scheduler.get(task).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assigned_agent_id, Some(worker));
    let agent = h.kernel.registry.get(worker).await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Running);
    assert_eq!(agent.current_task_id, Some(task.id));
}

#[tokio::test]
async fn test_revert_rejected_when_assignee_rebound_elsewhere() {
    let h = setup().await;
    let (t1, worker) = running_task(&h).await;
    let watchdog = h.register_agent(AgentType::Watchdog, None, &[]).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(watchdog).await.unwrap();
    let action = h.kernel.supervisor.cancel_task(issuer, t1, "stale").await.unwrap();

    // Normal dispatch moves the released agent onto new work.
    let ticket = h
        .kernel
        .create_ticket("T2", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    let t2 = h.submit_task(ticket.id, h.requirements.id, "next", TaskPriority::Medium, &[]).await;
    let assignments = h.kernel.scheduler.dispatch_tick().await.unwrap();
    assert_eq!(assignments.len(), 1);
    assert_eq!(assignments[0].agent_id, worker);

    // Reverting the cancel would resurrect t1 against an agent that is
    // now bound to t2: rejected as cascaded state.
    let err = h.kernel.supervisor.revert(Issuer::system(), action.id).await.unwrap_err();
    assert_eq!(err.code(), "conflict");

    // Nothing was rewritten: t1 stays failed, the agent stays on t2.
    let t1 = h.kernel.scheduler.get(t1).await.unwrap().unwrap();
    assert_eq!(t1.status, TaskStatus::Failed);
    let agent = h.kernel.registry.get(worker).await.unwrap().unwrap();
    assert_eq!(agent.current_task_id, Some(t2));
}

#[tokio::test]
async fn test_revert_below_issuer_authority_rejected() {
    let h = setup().await;
    let (task, _worker) = running_task(&h).await;
    let guardian = h.register_agent(AgentType::Guardian, None, &[]).await;
    let watchdog = h.register_agent(AgentType::Watchdog, None, &[]).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(guardian).await.unwrap();
    let action = h.kernel.supervisor.cancel_task(issuer, task, "guardian call").await.unwrap();

    let low = h.kernel.supervisor.issuer_for_agent(watchdog).await.unwrap();
    let err = h.kernel.supervisor.revert(low, action.id).await.unwrap_err();
    assert_eq!(err.code(), "not_authorized");
}

#[tokio::test]
async fn test_revert_after_window_is_terminal() {
    let h = setup().await;
    let (task, _worker) = running_task(&h).await;
    let watchdog = h.register_agent(AgentType::Watchdog, None, &[]).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(watchdog).await.unwrap();
    let action = h.kernel.supervisor.cancel_task(issuer, task, "late").await.unwrap();

    h.clock.advance(chrono::Duration::hours(2));
    let err = h.kernel.supervisor.revert(Issuer::system(), action.id).await.unwrap_err();
    assert_eq!(err.code(), "timeout");
}

#[tokio::test]
async fn test_revert_rejected_on_cascaded_state() {
    let h = setup().await;
    let (task, _worker) = running_task(&h).await;
    let monitor = h.register_agent(AgentType::Monitor, None, &[]).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(monitor).await.unwrap();
    let first = h.kernel.supervisor.override_priority(issuer, task, TaskPriority::Critical).await.unwrap();
    h.clock.advance(chrono::Duration::seconds(1));
    let _second = h.kernel.supervisor.override_priority(issuer, task, TaskPriority::Low).await.unwrap();

    // Downstream state exists against the same target.
    let err = h.kernel.supervisor.revert(Issuer::system(), first.id).await.unwrap_err();
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
async fn test_quarantine_requires_guardian_and_halts_assignment() {
    let h = setup().await;
    let worker = h.register_worker(h.requirements.id, &[]).await;
    let monitor = h.register_agent(AgentType::Monitor, None, &[]).await;
    let guardian = h.register_agent(AgentType::Guardian, None, &[]).await;

    let low = h.kernel.supervisor.issuer_for_agent(monitor).await.unwrap();
    let err = h.kernel.supervisor.quarantine_agent(low, worker).await.unwrap_err();
    assert_eq!(err.code(), "not_authorized");

    let issuer = h.kernel.supervisor.issuer_for_agent(guardian).await.unwrap();
    h.kernel.supervisor.quarantine_agent(issuer, worker).await.unwrap();

    let agent = h.kernel.registry.get(worker).await.unwrap().unwrap();
    assert_eq!(agent.status, AgentStatus::Quarantined);

    // A quarantined agent receives no new work.
    let ticket = h
        .kernel
        .create_ticket("T", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    h.submit_task(ticket.id, h.requirements.id, "q", TaskPriority::High, &[]).await;
    assert!(h.kernel.scheduler.dispatch_tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reallocate_capacity_guards_in_flight_work() {
    let h = setup().await;
    let (_, busy) = running_task(&h).await;
    let spare = h.register_worker(h.requirements.id, &[]).await;
    let monitor = h.register_agent(AgentType::Monitor, None, &[]).await;

    let issuer = h.kernel.supervisor.issuer_for_agent(monitor).await.unwrap();

    // Draining the busy donor to zero would strand its running task.
    let err = h
        .kernel
        .supervisor
        .reallocate_capacity(issuer, busy, spare, 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "validation_failed");

    // The idle donor can give up its slot.
    h.kernel.supervisor.reallocate_capacity(issuer, spare, busy, 1).await.unwrap();
    let donor = h.kernel.registry.get(spare).await.unwrap().unwrap();
    let recipient = h.kernel.registry.get(busy).await.unwrap().unwrap();
    assert_eq!(donor.max_concurrent_tasks, 0);
    assert_eq!(recipient.max_concurrent_tasks, 2);
}

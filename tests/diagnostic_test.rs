mod common;

use common::setup;
use conductor::domain::models::{DiagnosticStatus, TaskPriority, TaskStatus};
use conductor::domain::ports::Clock;
use conductor::services::CreateTicketOptions;

/// Drive a workflow to the settled-but-unfinished state: one done task,
/// no validated final result.
async fn settle_workflow(h: &common::Harness) -> uuid::Uuid {
    let ticket = h
        .kernel
        .create_ticket("W", "deliver the report", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    let task = h.submit_task(ticket.id, h.requirements.id, "only task", TaskPriority::Medium, &[]).await;
    let agent = h.register_worker(h.requirements.id, &[]).await;
    h.kernel.scheduler.dispatch_tick().await.unwrap();
    h.kernel.scheduler.start_task(task, agent).await.unwrap();
    h.kernel.scheduler.claim_done(task, agent).await.unwrap();
    ticket.id
}

#[tokio::test]
async fn test_stuck_workflow_spawns_recovery_task() {
    let h = setup().await;
    let workflow = settle_workflow(&h).await;

    // Inside the stuck threshold nothing fires.
    h.clock.advance(chrono::Duration::seconds(30));
    assert!(h.kernel.diagnostic.tick().await.unwrap().is_empty());

    // Past the threshold the monitor fires once.
    h.clock.advance(chrono::Duration::seconds(31));
    let fired = h.kernel.diagnostic.tick().await.unwrap();
    assert_eq!(fired.len(), 1);

    let run = &fired[0];
    assert_eq!(run.workflow_id, workflow);
    assert_eq!(run.status, DiagnosticStatus::Completed);
    assert_eq!(run.spawned_task_ids.len(), 1);
    assert_eq!(run.cooldown_until, h.clock.utc_now() + chrono::Duration::seconds(60));
    assert_eq!(run.context_snapshot["workflow_goal"], "deliver the report");

    // The recovery task sits in the workflow's current phase and tells
    // the agent what to do.
    let recovery = h.kernel.scheduler.get(run.spawned_task_ids[0]).await.unwrap().unwrap();
    assert_eq!(recovery.phase_id, h.requirements.id);
    assert_eq!(recovery.status, TaskStatus::Pending);
    assert!(recovery.description.contains("submit final result"));
}

#[tokio::test]
async fn test_cooldown_suppresses_second_firing() {
    let h = setup().await;
    let workflow = settle_workflow(&h).await;

    h.clock.advance(chrono::Duration::seconds(61));
    let fired = h.kernel.diagnostic.tick().await.unwrap();
    assert_eq!(fired.len(), 1);

    // Settle the recovery task so only the cooldown separates us from a
    // second firing, then tick inside the window.
    let recovery = fired[0].spawned_task_ids[0];
    use conductor::services::Issuer;
    h.kernel.supervisor.cancel_task(Issuer::system(), recovery, "test settle").await.unwrap();

    h.clock.advance(chrono::Duration::seconds(30));
    assert!(h.kernel.diagnostic.tick().await.unwrap().is_empty());

    // Past the cooldown and the stuck threshold it may fire again.
    h.clock.advance(chrono::Duration::seconds(61));
    let fired_again = h.kernel.diagnostic.tick().await.unwrap();
    assert_eq!(fired_again.len(), 1);
    assert_eq!(fired_again[0].workflow_id, workflow);
}

#[tokio::test]
async fn test_active_tasks_suppress_diagnostic() {
    let h = setup().await;
    let ticket = h
        .kernel
        .create_ticket("W", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    h.submit_task(ticket.id, h.requirements.id, "pending work", TaskPriority::Medium, &[]).await;

    h.clock.advance(chrono::Duration::seconds(120));
    assert!(h.kernel.diagnostic.tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_workflow_without_tasks_never_stuck() {
    let h = setup().await;
    h.kernel
        .create_ticket("empty", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    h.clock.advance(chrono::Duration::seconds(3600));
    assert!(h.kernel.diagnostic.tick().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_validated_result_suppresses_diagnostic() {
    let h = setup().await;
    let workflow = settle_workflow(&h).await;

    // Submit and validate a final result.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("final.md");
    std::fs::write(&path, "# done\n").unwrap();
    let result = h
        .kernel
        .board
        .submit_workflow_result(workflow, path.to_str().unwrap(), vec!["tests pass".into()])
        .await
        .unwrap();

    use conductor::adapters::sqlite::SqliteArtifactRepository;
    use conductor::domain::models::VerificationStatus;
    use conductor::domain::ports::ArtifactRepository;
    let artifacts = SqliteArtifactRepository::new(h.pool.clone());
    artifacts.set_workflow_result_status(result.id, VerificationStatus::Validated).await.unwrap();

    h.clock.advance(chrono::Duration::seconds(120));
    assert!(h.kernel.diagnostic.tick().await.unwrap().is_empty());
}

mod common;

use std::io::Write;

use common::setup;
use conductor::domain::models::{ResultKind, TaskPriority, MAX_ARTIFACT_BYTES};
use conductor::services::CreateTicketOptions;

async fn assigned_task(h: &common::Harness) -> (uuid::Uuid, uuid::Uuid) {
    let ticket = h
        .kernel
        .create_ticket("T", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    let task = h.submit_task(ticket.id, h.requirements.id, "work", TaskPriority::Medium, &[]).await;
    let agent = h.register_worker(h.requirements.id, &[]).await;
    h.kernel.scheduler.dispatch_tick().await.unwrap();
    (task, agent)
}

fn md_file(dir: &tempfile::TempDir, name: &str, bytes: usize) -> String {
    let path = dir.path().join(name);
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(&vec![b'x'; bytes]).unwrap();
    path.to_str().unwrap().to_string()
}

#[tokio::test]
async fn test_submission_requires_task_ownership() {
    let h = setup().await;
    let (task, agent) = assigned_task(&h).await;
    let stranger = h.register_worker(h.requirements.id, &[]).await;
    let dir = tempfile::tempdir().unwrap();
    let path = md_file(&dir, "out.md", 64);

    let err = h
        .kernel
        .board
        .submit_agent_result(task, stranger, &path, ResultKind::Deliverable, "result")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_authorized");

    let result = h
        .kernel
        .board
        .submit_agent_result(task, agent, &path, ResultKind::Deliverable, "result")
        .await
        .unwrap();
    assert_eq!(result.task_id, task);
}

#[tokio::test]
async fn test_size_boundary_and_traversal() {
    let h = setup().await;
    let (task, agent) = assigned_task(&h).await;
    let dir = tempfile::tempdir().unwrap();

    // Exactly at the cap is accepted.
    let exact = md_file(&dir, "exact.md", MAX_ARTIFACT_BYTES as usize);
    h.kernel
        .board
        .submit_agent_result(task, agent, &exact, ResultKind::Deliverable, "")
        .await
        .unwrap();

    // One byte past the cap is refused.
    let over = md_file(&dir, "over.md", MAX_ARTIFACT_BYTES as usize + 1);
    let err = h
        .kernel
        .board
        .submit_agent_result(task, agent, &over, ResultKind::Deliverable, "")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "file_too_large");

    // Traversal segments are refused before touching the filesystem.
    let sneaky = format!("{}/../sneaky.md", dir.path().display());
    let err = h
        .kernel
        .board
        .submit_agent_result(task, agent, &sneaky, ResultKind::Deliverable, "")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "path_traversal");
}

#[tokio::test]
async fn test_phase_gate_resolves_expected_outputs_from_submissions() {
    let h = setup().await;

    // Require a summary document out of the requirements phase.
    use conductor::adapters::sqlite::SqlitePhaseRepository;
    use conductor::domain::models::{ExpectedOutput, OutputKind};
    use conductor::domain::ports::PhaseRepository;
    let phases = SqlitePhaseRepository::new(h.pool.clone());
    let mut requirements = phases.get_phase(h.requirements.id).await.unwrap().unwrap();
    requirements
        .expected_outputs
        .push(ExpectedOutput::required("summary.md", OutputKind::Document));
    phases.update_phase(&requirements).await.unwrap();

    let (task, agent) = assigned_task(&h).await;
    let ticket_id = h.kernel.scheduler.get(task).await.unwrap().unwrap().ticket_id;
    h.kernel.board.satisfy_criterion(h.requirements.id, "requirements captured").await.unwrap();

    // Gate rejects while the output is unresolved.
    let err = h.kernel.board.advance_phase(ticket_id, h.design.id, false).await.unwrap_err();
    match err {
        conductor::domain::errors::KernelError::PhaseGateRejected { expected_outputs_missing, .. } => {
            assert_eq!(expected_outputs_missing, vec!["summary.md".to_string()]);
        }
        other => panic!("expected phase_gate_rejected, got {other}"),
    }

    // Submitting the artifact resolves the pattern and the gate opens.
    let dir = tempfile::tempdir().unwrap();
    let path = md_file(&dir, "summary.md", 128);
    h.kernel
        .board
        .submit_agent_result(task, agent, &path, ResultKind::Summary, "phase summary")
        .await
        .unwrap();

    let advanced = h.kernel.board.advance_phase(ticket_id, h.design.id, false).await.unwrap();
    assert_eq!(advanced.phase_id, h.design.id);
}

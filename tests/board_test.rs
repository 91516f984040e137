mod common;

use common::setup;
use conductor::adapters::sqlite::SqlitePhaseRepository;
use conductor::domain::models::AuthorityLevel;
use conductor::domain::ports::{EventJournal, EventQuery, PhaseRepository};
use conductor::services::CreateTicketOptions;

#[tokio::test]
async fn test_wip_limit_blocks_then_guardian_forces() {
    let h = setup().await;

    // Cap the building column at two tickets.
    let phases = SqlitePhaseRepository::new(h.pool.clone());
    let mut building = phases.get_column(h.building.id).await.unwrap().unwrap();
    building.wip_limit = Some(2);
    phases.update_column(&building).await.unwrap();

    let t1 = h.kernel.create_ticket("T1", "g", h.requirements.id, CreateTicketOptions::default()).await.unwrap();
    let t2 = h.kernel.create_ticket("T2", "g", h.requirements.id, CreateTicketOptions::default()).await.unwrap();
    let t3 = h.kernel.create_ticket("T3", "g", h.requirements.id, CreateTicketOptions::default()).await.unwrap();

    h.kernel.board.move_ticket(t1.id, h.building.id, false, AuthorityLevel::Worker).await.unwrap();
    h.kernel.board.move_ticket(t2.id, h.building.id, false, AuthorityLevel::Worker).await.unwrap();

    // Third move exceeds the limit.
    let err = h
        .kernel
        .board
        .move_ticket(t3.id, h.building.id, false, AuthorityLevel::Worker)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "wip_exceeded");

    // Force below guardian is refused outright.
    let err = h
        .kernel
        .board
        .move_ticket(t3.id, h.building.id, true, AuthorityLevel::Monitor)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_authorized");

    // A guardian forces the move; the transition is journaled as forced.
    let moved = h
        .kernel
        .board
        .move_ticket(t3.id, h.building.id, true, AuthorityLevel::Guardian)
        .await
        .unwrap();
    assert_eq!(moved.column_id, h.building.id);

    use conductor::adapters::sqlite::SqliteEventJournal;
    let journal = SqliteEventJournal::new(h.pool.clone());
    let events = journal
        .query(EventQuery {
            topic_pattern: Some("ticket.transitioned".into()),
            partition_key: Some(t3.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(events
        .iter()
        .any(|e| e.envelope.payload["forced"].as_bool() == Some(true)));
}

#[tokio::test]
async fn test_move_to_unmapped_column_rejected() {
    let h = setup().await;
    let ticket = h.kernel.create_ticket("T", "g", h.requirements.id, CreateTicketOptions::default()).await.unwrap();

    // The done column maps no phases.
    let err = h
        .kernel
        .board
        .move_ticket(ticket.id, h.done.id, false, AuthorityLevel::Worker)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_transition");
}

#[tokio::test]
async fn test_auto_transition_cascades() {
    let h = setup().await;

    // backlog auto-advances into building.
    let phases = SqlitePhaseRepository::new(h.pool.clone());
    let mut backlog = phases.get_column(h.backlog.id).await.unwrap().unwrap();
    backlog.auto_transition_to = Some(h.building.id);
    phases.update_column(&backlog).await.unwrap();

    let ticket = h.kernel.create_ticket("T", "g", h.requirements.id, CreateTicketOptions::default()).await.unwrap();
    let moved = h
        .kernel
        .board
        .move_ticket(ticket.id, h.backlog.id, true, AuthorityLevel::Guardian)
        .await
        .unwrap();
    assert_eq!(moved.column_id, h.building.id);
}

#[tokio::test]
async fn test_phase_gate_rejects_with_missing_criteria() {
    let h = setup().await;
    let ticket = h.kernel.create_ticket("T", "g", h.requirements.id, CreateTicketOptions::default()).await.unwrap();

    // The "requirements captured" criterion is unsatisfied.
    let err = h.kernel.board.advance_phase(ticket.id, h.design.id, false).await.unwrap_err();
    match err {
        conductor::domain::errors::KernelError::PhaseGateRejected { missing, .. } => {
            assert!(missing.contains(&"requirements captured".to_string()));
        }
        other => panic!("expected phase_gate_rejected, got {other}"),
    }

    use conductor::adapters::sqlite::SqliteEventJournal;
    let journal = SqliteEventJournal::new(h.pool.clone());
    let events = journal
        .query(EventQuery { topic_pattern: Some("phase.gate_rejected".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn test_gate_rejects_transition_outside_dag() {
    let h = setup().await;
    // design has no allowed transitions; going back to requirements is
    // refused unless a discovery drives it.
    let ticket = h.kernel.create_ticket("T", "g", h.design.id, CreateTicketOptions::default()).await.unwrap();
    let err = h.kernel.board.advance_phase(ticket.id, h.requirements.id, false).await.unwrap_err();
    assert_eq!(err.code(), "phase_gate_rejected");

    // The discovery flag bypasses the DAG constraint.
    let advanced = h.kernel.board.advance_phase(ticket.id, h.requirements.id, true).await;
    assert!(advanced.is_ok());
}

#[tokio::test]
async fn test_context_summary_is_bounded() {
    let h = setup().await;
    let ticket = h.kernel.create_ticket("T", "g", h.requirements.id, CreateTicketOptions::default()).await.unwrap();

    // Many settled tasks inflate the aggregate past the summary bound.
    for i in 0..200 {
        h.submit_task(
            ticket.id,
            h.requirements.id,
            &format!("task {i} with a reasonably long descriptive title"),
            conductor::domain::models::TaskPriority::Medium,
            &[],
        )
        .await;
    }
    h.kernel.board.satisfy_criterion(h.requirements.id, "requirements captured").await.unwrap();

    let advanced = h.kernel.board.advance_phase(ticket.id, h.design.id, false).await.unwrap();
    assert!(advanced.context_summary.len() <= 4096);
    assert!(advanced.context.len() > advanced.context_summary.len());
}

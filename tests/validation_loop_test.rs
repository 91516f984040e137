mod common;

use common::setup;
use conductor::domain::models::{Task, TaskPriority, TaskStatus};
use conductor::domain::ports::Clock;
use conductor::services::{CreateTicketOptions, ReviewSubmission};

fn submission(passed: bool, feedback: &str) -> ReviewSubmission {
    ReviewSubmission {
        validation_passed: passed,
        feedback: feedback.to_string(),
        evidence: vec![],
        recommendations: vec![],
    }
}

async fn validated_task_in_progress(h: &common::Harness) -> (uuid::Uuid, uuid::Uuid, uuid::Uuid) {
    let ticket = h
        .kernel
        .create_ticket("T", "goal", h.requirements.id, CreateTicketOptions::default())
        .await
        .unwrap();
    let task = Task::new(ticket.id, h.requirements.id, "Q3", "implement", h.clock.utc_now())
        .with_priority(TaskPriority::High)
        .with_validation(true);
    let task_id = h.kernel.scheduler.submit(task).await.unwrap();
    let worker = h.register_worker(h.requirements.id, &[]).await;
    let validator = h.register_validator(h.requirements.id).await;

    h.kernel.scheduler.dispatch_tick().await.unwrap();
    h.kernel.scheduler.start_task(task_id, worker).await.unwrap();
    (task_id, worker, validator)
}

#[tokio::test]
async fn test_fail_then_pass_loop() {
    let h = setup().await;
    let (task_id, worker, validator) = validated_task_in_progress(&h).await;

    // Claim done: enters review, iteration 1.
    let task = h.kernel.scheduler.claim_done(task_id, worker).await.unwrap();
    assert_eq!(task.status, TaskStatus::UnderReview);
    assert_eq!(task.validation_iteration, 1);

    // Validator binds and fails the first iteration.
    let started = h.kernel.validation.dispatch_reviews().await.unwrap();
    assert_eq!(started, vec![task_id]);
    let task = h.kernel.scheduler.get(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::ValidationInProgress);

    h.kernel
        .validation
        .give_review(validator, task_id, 1, submission(false, "add null check"))
        .await
        .unwrap();

    // Feedback stored; same assignee resumes in progress.
    let task = h.kernel.scheduler.get(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assigned_agent_id, Some(worker));
    assert_eq!(task.last_validation_feedback.as_deref(), Some("add null check"));

    // Second round passes.
    let task = h.kernel.scheduler.claim_done(task_id, worker).await.unwrap();
    assert_eq!(task.validation_iteration, 2);
    h.kernel.validation.dispatch_reviews().await.unwrap();
    h.kernel
        .validation
        .give_review(validator, task_id, 2, submission(true, "looks good"))
        .await
        .unwrap();

    let task = h.kernel.scheduler.get(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);

    // Exactly two review rows, iterations 1 and 2.
    use conductor::adapters::sqlite::SqliteReviewRepository;
    use conductor::domain::ports::ReviewRepository;
    let reviews = SqliteReviewRepository::new(h.pool.clone()).list_by_task(task_id).await.unwrap();
    assert_eq!(reviews.len(), 2);
    assert_eq!(reviews[0].iteration_number, 1);
    assert!(!reviews[0].validation_passed);
    assert_eq!(reviews[1].iteration_number, 2);
    assert!(reviews[1].validation_passed);
}

#[tokio::test]
async fn test_review_with_stale_iteration_rejected() {
    let h = setup().await;
    let (task_id, worker, validator) = validated_task_in_progress(&h).await;

    h.kernel.scheduler.claim_done(task_id, worker).await.unwrap();
    h.kernel.validation.dispatch_reviews().await.unwrap();

    // Task is at iteration 1; a review for iteration 2 is refused.
    let err = h
        .kernel
        .validation
        .give_review(validator, task_id, 2, submission(true, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "conflict");
}

#[tokio::test]
async fn test_non_validator_cannot_review() {
    let h = setup().await;
    let (task_id, worker, _validator) = validated_task_in_progress(&h).await;
    h.kernel.scheduler.claim_done(task_id, worker).await.unwrap();
    h.kernel.validation.dispatch_reviews().await.unwrap();

    let err = h
        .kernel
        .validation
        .give_review(worker, task_id, 1, submission(true, ""))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "not_authorized");
}

#[tokio::test]
async fn test_max_iterations_terminates_task() {
    let config = conductor::domain::models::KernelConfig {
        scheduling: conductor::domain::models::SchedulingConfig {
            max_iterations: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let h = common::setup_with_config(config).await;
    let (task_id, worker, validator) = validated_task_in_progress(&h).await;

    // Iteration 1 fails, loops back.
    h.kernel.scheduler.claim_done(task_id, worker).await.unwrap();
    h.kernel.validation.dispatch_reviews().await.unwrap();
    h.kernel
        .validation
        .give_review(validator, task_id, 1, submission(false, "wrong"))
        .await
        .unwrap();

    // Iteration 2 fails at the cap: terminal failure, no more reviews.
    h.kernel.scheduler.claim_done(task_id, worker).await.unwrap();
    h.kernel.validation.dispatch_reviews().await.unwrap();
    h.kernel
        .validation
        .give_review(validator, task_id, 2, submission(false, "still wrong"))
        .await
        .unwrap();

    let task = h.kernel.scheduler.get(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason.as_deref(), Some("max_iterations"));

    let started = h.kernel.validation.dispatch_reviews().await.unwrap();
    assert!(started.is_empty());
}

#[tokio::test]
async fn test_validation_deadline_forces_failure() {
    let h = setup().await;
    let (task_id, worker, _validator) = validated_task_in_progress(&h).await;
    h.kernel.scheduler.claim_done(task_id, worker).await.unwrap();
    h.kernel.validation.dispatch_reviews().await.unwrap();

    // The validator never submits; the iteration deadline fires.
    h.clock.advance(chrono::Duration::seconds(1801));
    h.kernel.validation.handle_validation_deadline(task_id, 1).await.unwrap();

    let task = h.kernel.scheduler.get(task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.failure_reason.as_deref(), Some("validation_timeout"));
}

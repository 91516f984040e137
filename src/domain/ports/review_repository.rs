//! Validation review repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::ValidationReview;

/// Repository interface for ValidationReview persistence.
///
/// Reviews are immutable after insert. The insert enforces that
/// `iteration_number` equals the task's current `validation_iteration`.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn insert(&self, review: &ValidationReview) -> KernelResult<()>;

    async fn get(&self, id: Uuid) -> KernelResult<Option<ValidationReview>>;

    /// Reviews for a task in iteration order.
    async fn list_by_task(&self, task_id: Uuid) -> KernelResult<Vec<ValidationReview>>;

    async fn count_for_task(&self, task_id: Uuid) -> KernelResult<u64>;

    /// Consecutive failed reviews at the tail of a task's history, for
    /// the diagnostic validation-failure trigger.
    async fn trailing_failure_count(&self, task_id: Uuid) -> KernelResult<u32>;
}

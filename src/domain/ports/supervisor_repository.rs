//! Supervisor action repository port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::SupervisorAction;

/// Repository interface for the supervisor action journal.
#[async_trait]
pub trait SupervisorRepository: Send + Sync {
    async fn insert(&self, action: &SupervisorAction) -> KernelResult<()>;

    async fn get(&self, id: Uuid) -> KernelResult<Option<SupervisorAction>>;

    async fn update(&self, action: &SupervisorAction) -> KernelResult<()>;

    /// Actions against a target, newest first.
    async fn list_for_target(&self, target_id: Uuid) -> KernelResult<Vec<SupervisorAction>>;

    /// Actions against a target created after the given instant,
    /// used to detect cascaded state before a reversal.
    async fn list_for_target_since(
        &self,
        target_id: Uuid,
        since: DateTime<Utc>,
    ) -> KernelResult<Vec<SupervisorAction>>;
}

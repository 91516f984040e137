//! Discovery repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{Discovery, DiscoveryType};

/// Repository interface for Discovery persistence.
#[async_trait]
pub trait DiscoveryRepository: Send + Sync {
    async fn insert(&self, discovery: &Discovery) -> KernelResult<()>;

    async fn get(&self, id: Uuid) -> KernelResult<Option<Discovery>>;

    /// Look up by the idempotency key
    /// `(source_task_id, discovery_type, description_hash)`.
    async fn find_duplicate(
        &self,
        source_task_id: Uuid,
        discovery_type: DiscoveryType,
        description_hash: &str,
    ) -> KernelResult<Option<Discovery>>;

    async fn update(&self, discovery: &Discovery) -> KernelResult<()>;

    async fn list_by_source(&self, source_task_id: Uuid) -> KernelResult<Vec<Discovery>>;

    /// Discoveries whose source tasks belong to a ticket's phase, for
    /// context aggregation at phase exit.
    async fn list_for_ticket_phase(&self, ticket_id: Uuid, phase_id: Uuid) -> KernelResult<Vec<Discovery>>;
}

//! Phase and board-column repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{BoardColumn, Phase};

/// Repository interface for the workflow definition: phases and the
/// board columns they map onto.
#[async_trait]
pub trait PhaseRepository: Send + Sync {
    async fn insert_phase(&self, phase: &Phase) -> KernelResult<()>;

    async fn get_phase(&self, id: Uuid) -> KernelResult<Option<Phase>>;

    async fn get_phase_by_name(&self, name: &str) -> KernelResult<Option<Phase>>;

    async fn update_phase(&self, phase: &Phase) -> KernelResult<()>;

    /// Phases in sequence order.
    async fn list_phases(&self) -> KernelResult<Vec<Phase>>;

    async fn insert_column(&self, column: &BoardColumn) -> KernelResult<()>;

    async fn get_column(&self, id: Uuid) -> KernelResult<Option<BoardColumn>>;

    async fn get_column_by_name(&self, name: &str) -> KernelResult<Option<BoardColumn>>;

    async fn update_column(&self, column: &BoardColumn) -> KernelResult<()>;

    /// Columns in sequence order.
    async fn list_columns(&self) -> KernelResult<Vec<BoardColumn>>;
}

//! Diagnostic run repository port.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::DiagnosticRun;

/// Repository interface for DiagnosticRun persistence.
#[async_trait]
pub trait DiagnosticRepository: Send + Sync {
    async fn insert(&self, run: &DiagnosticRun) -> KernelResult<()>;

    async fn get(&self, id: Uuid) -> KernelResult<Option<DiagnosticRun>>;

    async fn update(&self, run: &DiagnosticRun) -> KernelResult<()>;

    /// Most recent run for a workflow, used for the cooldown gate.
    async fn latest_for_workflow(&self, workflow_id: Uuid) -> KernelResult<Option<DiagnosticRun>>;

    async fn list_for_workflow(&self, workflow_id: Uuid) -> KernelResult<Vec<DiagnosticRun>>;
}

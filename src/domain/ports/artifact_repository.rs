//! Artifact repository port for agent and workflow results.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::KernelResult;
use crate::domain::models::{AgentResult, VerificationStatus, WorkflowResult};

/// Repository interface for markdown result submissions.
#[async_trait]
pub trait ArtifactRepository: Send + Sync {
    async fn insert_agent_result(&self, result: &AgentResult) -> KernelResult<()>;

    async fn list_agent_results_by_task(&self, task_id: Uuid) -> KernelResult<Vec<AgentResult>>;

    /// Markdown paths submitted by tasks of a ticket's phase, for
    /// resolving expected outputs at the phase gate.
    async fn list_paths_for_ticket_phase(&self, ticket_id: Uuid, phase_id: Uuid) -> KernelResult<Vec<String>>;

    async fn insert_workflow_result(&self, result: &WorkflowResult) -> KernelResult<()>;

    async fn list_workflow_results(&self, workflow_id: Uuid) -> KernelResult<Vec<WorkflowResult>>;

    async fn set_workflow_result_status(
        &self,
        result_id: Uuid,
        status: VerificationStatus,
    ) -> KernelResult<()>;

    /// Whether the workflow has any validated final result.
    async fn has_validated_workflow_result(&self, workflow_id: Uuid) -> KernelResult<bool>;
}

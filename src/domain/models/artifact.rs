//! Markdown artifact submissions.
//!
//! Agents submit results as markdown files on disk. The kernel stores a
//! reference plus a verification state; the file itself is validated at
//! submission time (size, extension, absolute path, no traversal).

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::KernelError;

/// Maximum size of a submitted markdown artifact.
pub const MAX_ARTIFACT_BYTES: u64 = 100_000;

/// Verification state of a submitted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Validated,
    Rejected,
}

impl Default for VerificationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "validated" => Some(Self::Validated),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// Kind of agent result submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Deliverable,
    Finding,
    Summary,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deliverable => "deliverable",
            Self::Finding => "finding",
            Self::Summary => "summary",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "deliverable" => Some(Self::Deliverable),
            "finding" => Some(Self::Finding),
            "summary" => Some(Self::Summary),
            _ => None,
        }
    }
}

/// A task-level markdown submission by the assigned agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub agent_id: Uuid,
    /// Absolute path to the markdown file
    pub markdown_path: String,
    pub kind: ResultKind,
    pub summary: String,
    pub verification_status: VerificationStatus,
    pub created_at: DateTime<Utc>,
}

impl AgentResult {
    pub fn new(
        task_id: Uuid,
        agent_id: Uuid,
        markdown_path: impl Into<String>,
        kind: ResultKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            agent_id,
            markdown_path: markdown_path.into(),
            kind,
            summary: String::new(),
            verification_status: VerificationStatus::Pending,
            created_at: now,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// A workflow-level (ticket-level) final result submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub id: Uuid,
    /// The owning ticket
    pub workflow_id: Uuid,
    pub markdown_path: String,
    pub evidence: Vec<String>,
    pub validation_status: VerificationStatus,
    pub created_at: DateTime<Utc>,
}

impl WorkflowResult {
    pub fn new(workflow_id: Uuid, markdown_path: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            markdown_path: markdown_path.into(),
            evidence: Vec::new(),
            validation_status: VerificationStatus::Pending,
            created_at: now,
        }
    }
}

/// Validate a markdown artifact path without touching the filesystem.
///
/// Checks: absolute, `.md` extension, no `..` segments. Size and
/// readability are checked separately against the real file.
pub fn validate_artifact_path(path: &str) -> Result<(), KernelError> {
    let p = Path::new(path);
    if !p.is_absolute() {
        return Err(KernelError::InvalidArtifact(format!("path must be absolute: {path}")));
    }
    if p.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
        return Err(KernelError::PathTraversal(path.to_string()));
    }
    if p.extension().and_then(|e| e.to_str()) != Some("md") {
        return Err(KernelError::InvalidArtifact(format!("artifact must be a .md file: {path}")));
    }
    Ok(())
}

/// Validate the artifact file on disk: it exists, is readable, and is
/// within the size cap.
pub fn validate_artifact_file(path: &str) -> Result<(), KernelError> {
    validate_artifact_path(path)?;
    let meta = std::fs::metadata(path)
        .map_err(|e| KernelError::InvalidArtifact(format!("artifact not readable: {e}")))?;
    if !meta.is_file() {
        return Err(KernelError::InvalidArtifact(format!("artifact is not a file: {path}")));
    }
    if meta.len() > MAX_ARTIFACT_BYTES {
        return Err(KernelError::FileTooLarge { size: meta.len(), limit: MAX_ARTIFACT_BYTES });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_relative_path_rejected() {
        let err = validate_artifact_path("results/out.md").unwrap_err();
        assert_eq!(err.code(), "invalid_artifact");
    }

    #[test]
    fn test_traversal_rejected() {
        let err = validate_artifact_path("/work/../etc/out.md").unwrap_err();
        assert_eq!(err.code(), "path_traversal");
    }

    #[test]
    fn test_extension_enforced() {
        let err = validate_artifact_path("/work/out.txt").unwrap_err();
        assert_eq!(err.code(), "invalid_artifact");
        assert!(validate_artifact_path("/work/out.md").is_ok());
    }

    #[test]
    fn test_size_boundary() {
        let dir = tempfile::tempdir().unwrap();

        let ok_path = dir.path().join("exact.md");
        let mut f = std::fs::File::create(&ok_path).unwrap();
        f.write_all(&vec![b'a'; MAX_ARTIFACT_BYTES as usize]).unwrap();
        assert!(validate_artifact_file(ok_path.to_str().unwrap()).is_ok());

        let big_path = dir.path().join("over.md");
        let mut f = std::fs::File::create(&big_path).unwrap();
        f.write_all(&vec![b'a'; MAX_ARTIFACT_BYTES as usize + 1]).unwrap();
        let err = validate_artifact_file(big_path.to_str().unwrap()).unwrap_err();
        assert_eq!(err.code(), "file_too_large");
    }

    #[test]
    fn test_missing_file_rejected() {
        let err = validate_artifact_file("/definitely/not/there.md").unwrap_err();
        assert_eq!(err.code(), "invalid_artifact");
    }
}

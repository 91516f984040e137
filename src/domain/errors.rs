//! Kernel errors for the Conductor orchestration system.
//!
//! Every variant maps to a stable error code surfaced at the API boundary.
//! Retryability is a property of the code, not of the call site.

use thiserror::Error;
use uuid::Uuid;

/// Kernel-level errors raised by the orchestration core.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("Registration rejected: {reason}")]
    RegistrationRejected { reason: String },

    #[error("Registration timed out for agent {0}")]
    RegistrationTimeout(Uuid),

    #[error("Actor {actor} (authority {actual}) is not authorized: requires authority >= {required}")]
    NotAuthorized {
        actor: String,
        actual: u8,
        required: u8,
    },

    #[error("Invalid {entity} transition from {from} to {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("WIP limit of {limit} exceeded for column {column_id}")]
    WipExceeded { column_id: Uuid, limit: u32 },

    #[error("Phase gate rejected: {missing:?} unsatisfied, {expected_outputs_missing:?} missing")]
    PhaseGateRejected {
        missing: Vec<String>,
        expected_outputs_missing: Vec<String>,
    },

    #[error("Task dependency cycle detected involving task {0}")]
    DependencyCycle(Uuid),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Concurrency conflict: {entity} {id} was modified")]
    Conflict { entity: &'static str, id: String },

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Validation iteration timed out for task {0}")]
    ValidationTimeout(Uuid),

    #[error("Approval deadline elapsed for ticket {0}")]
    ApprovalTimeout(Uuid),

    #[error("Artifact exceeds {limit} bytes: {size}")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("Artifact path contains a traversal segment: {0}")]
    PathTraversal(String),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Event bus unavailable: {0}")]
    BusUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

pub type KernelResult<T> = Result<T, KernelError>;

impl KernelError {
    /// Stable error code surfaced at the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RegistrationRejected { .. } => "registration_rejected",
            Self::RegistrationTimeout(_) => "registration_timeout",
            Self::NotAuthorized { .. } => "not_authorized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::WipExceeded { .. } => "wip_exceeded",
            Self::PhaseGateRejected { .. } => "phase_gate_rejected",
            Self::DependencyCycle(_) => "dependency_cycle",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Timeout(_) => "timeout",
            Self::ValidationTimeout(_) => "validation_timeout",
            Self::ApprovalTimeout(_) => "approval_timeout",
            Self::FileTooLarge { .. } => "file_too_large",
            Self::PathTraversal(_) => "path_traversal",
            Self::InvalidArtifact(_) => "invalid_artifact",
            Self::StoreUnavailable(_) => "store_unavailable",
            Self::BusUnavailable(_) => "bus_unavailable",
            Self::Serialization(_) => "serialization_error",
            Self::ValidationFailed(_) => "validation_failed",
        }
    }

    /// Whether a caller may retry the operation without changing its inputs.
    ///
    /// Conflicts retry with jitter, store/bus outages retry with backoff,
    /// and `not_found` is retryable only under eventual consistency. State
    /// machine violations and authority failures fail fast.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. }
                | Self::NotFound { .. }
                | Self::StoreUnavailable(_)
                | Self::BusUnavailable(_)
                | Self::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for KernelError {
    fn from(err: sqlx::Error) -> Self {
        KernelError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for KernelError {
    fn from(err: serde_json::Error) -> Self {
        KernelError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_codes() {
        assert_eq!(
            KernelError::RegistrationRejected { reason: "bad".into() }.code(),
            "registration_rejected"
        );
        assert_eq!(KernelError::DependencyCycle(Uuid::new_v4()).code(), "dependency_cycle");
        assert_eq!(
            KernelError::WipExceeded { column_id: Uuid::new_v4(), limit: 2 }.code(),
            "wip_exceeded"
        );
    }

    #[test]
    fn test_retryability_classification() {
        assert!(KernelError::StoreUnavailable("down".into()).is_retryable());
        assert!(KernelError::Conflict { entity: "task", id: "x".into() }.is_retryable());
        assert!(!KernelError::NotAuthorized { actor: "a".into(), actual: 1, required: 4 }.is_retryable());
        assert!(!KernelError::InvalidTransition {
            entity: "task",
            from: "done".into(),
            to: "pending".into()
        }
        .is_retryable());
    }
}

//! Domain models for the Conductor orchestration kernel.

pub mod agent;
pub mod artifact;
pub mod board;
pub mod config;
pub mod diagnostic;
pub mod discovery;
pub mod event;
pub mod phase;
pub mod review;
pub mod supervisor;
pub mod task;
pub mod ticket;

pub use agent::{Agent, AgentStatus, AgentType, HealthStatus};
pub use artifact::{
    validate_artifact_file, validate_artifact_path, AgentResult, ResultKind, VerificationStatus,
    WorkflowResult, MAX_ARTIFACT_BYTES,
};
pub use board::BoardColumn;
pub use config::{
    ApprovalConfig, BoardConfig, BusConfig, DatabaseConfig, DiscoveryConfig, HeartbeatConfig,
    KernelConfig, LoggingConfig, SchedulingConfig, SupervisorConfig, ValidationConfig,
};
pub use diagnostic::{DiagnosticRun, DiagnosticStatus};
pub use discovery::{hash_description, Discovery, DiscoveryType, ResolutionStatus};
pub use event::{topic_matches, topics, Actor, DeliveryMode, EventEnvelope, SCHEMA_VERSION};
pub use phase::{DoneDefinition, ExpectedOutput, OutputKind, Phase};
pub use review::ValidationReview;
pub use supervisor::{AuditEntry, AuthorityLevel, SupervisorAction, SupervisorActionType};
pub use task::{BlockedReason, Task, TaskPriority, TaskStatus};
pub use ticket::{ApprovalStatus, RejectDisposition, Ticket};

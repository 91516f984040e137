//! Discovery domain model.
//!
//! Discoveries are findings recorded by a task that may spawn new work,
//! possibly in a different phase. The unique key over
//! `(source_task_id, discovery_type, description_hash)` makes recording
//! idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Kind of finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryType {
    Bug,
    Optimization,
    Clarification,
    Security,
    Performance,
    TechDebt,
    Integration,
    /// Injected by the diagnostic monitor when a workflow stalls with no result
    DiagnosticNoResult,
    /// Injected by the diagnostic monitor on a workflow-level timeout
    DiagnosticTimeout,
}

impl DiscoveryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Optimization => "optimization",
            Self::Clarification => "clarification",
            Self::Security => "security",
            Self::Performance => "performance",
            Self::TechDebt => "tech_debt",
            Self::Integration => "integration",
            Self::DiagnosticNoResult => "diagnostic_no_result",
            Self::DiagnosticTimeout => "diagnostic_timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "bug" => Some(Self::Bug),
            "optimization" => Some(Self::Optimization),
            "clarification" => Some(Self::Clarification),
            "security" => Some(Self::Security),
            "performance" => Some(Self::Performance),
            "tech_debt" => Some(Self::TechDebt),
            "integration" => Some(Self::Integration),
            "diagnostic_no_result" => Some(Self::DiagnosticNoResult),
            "diagnostic_timeout" => Some(Self::DiagnosticTimeout),
            _ => None,
        }
    }

    /// Whether the spawned child must block its source task.
    ///
    /// A clarification answers a question the source cannot proceed
    /// without; security findings likewise gate the source. Everything
    /// else spawns a sibling.
    pub fn blocks_source(&self) -> bool {
        matches!(self, Self::Clarification | Self::Security)
    }
}

/// Resolution state of a discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Open,
    Resolved,
    Dismissed,
}

impl Default for ResolutionStatus {
    fn default() -> Self {
        Self::Open
    }
}

impl ResolutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Resolved => "resolved",
            Self::Dismissed => "dismissed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "resolved" => Some(Self::Resolved),
            "dismissed" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

/// A recorded finding, possibly with spawned follow-up work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    pub id: Uuid,
    pub source_task_id: Uuid,
    pub discovery_type: DiscoveryType,
    pub description: String,
    /// SHA-256 of the normalized description; part of the unique key
    pub description_hash: String,
    /// Tasks spawned from this discovery
    pub spawned_task_ids: Vec<Uuid>,
    /// Whether the spawned child was promoted one priority rank
    pub priority_boost: bool,
    pub resolution_status: ResolutionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Discovery {
    pub fn new(
        source_task_id: Uuid,
        discovery_type: DiscoveryType,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let description = description.into();
        let description_hash = hash_description(&description);
        Self {
            id: Uuid::new_v4(),
            source_task_id,
            discovery_type,
            description,
            description_hash,
            spawned_task_ids: Vec::new(),
            priority_boost: false,
            resolution_status: ResolutionStatus::Open,
            created_at: now,
            updated_at: now,
        }
    }
}

/// SHA-256 over the normalized description: lowercased, whitespace collapsed.
pub fn hash_description(description: &str) -> String {
    let normalized = description.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_normalizes_whitespace_and_case() {
        let a = hash_description("Null  check missing\nin parser");
        let b = hash_description("null check missing in PARSER");
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_distinguishes_content() {
        assert_ne!(hash_description("bug in parser"), hash_description("bug in lexer"));
    }

    #[test]
    fn test_blocking_types() {
        assert!(DiscoveryType::Clarification.blocks_source());
        assert!(DiscoveryType::Security.blocks_source());
        assert!(!DiscoveryType::Bug.blocks_source());
        assert!(!DiscoveryType::DiagnosticNoResult.blocks_source());
    }

    #[test]
    fn test_round_trip_type_names() {
        for t in [
            DiscoveryType::Bug,
            DiscoveryType::Optimization,
            DiscoveryType::Clarification,
            DiscoveryType::Security,
            DiscoveryType::Performance,
            DiscoveryType::TechDebt,
            DiscoveryType::Integration,
            DiscoveryType::DiagnosticNoResult,
            DiscoveryType::DiagnosticTimeout,
        ] {
            assert_eq!(DiscoveryType::from_str(t.as_str()), Some(t));
        }
    }
}

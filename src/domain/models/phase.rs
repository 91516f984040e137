//! Phase domain model.
//!
//! Phases are the stages of a workflow (requirements, design, building,
//! validation, ...). Normal progression follows `allowed_transitions`,
//! which forms a DAG; discovery-driven branching may bypass it.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A verifiable completion criterion checked at phase exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneDefinition {
    /// Textual criterion, e.g. "all acceptance tests pass"
    pub criterion: String,
    /// Marked by task completions or explicit artifact submissions
    pub satisfied: bool,
}

impl DoneDefinition {
    pub fn new(criterion: impl Into<String>) -> Self {
        Self { criterion: criterion.into(), satisfied: false }
    }
}

/// Kind of artifact a phase is expected to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Document,
    Code,
    Report,
    Data,
}

impl OutputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Code => "code",
            Self::Report => "report",
            Self::Data => "data",
        }
    }
}

/// A typed artifact pattern a phase should produce before exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedOutput {
    /// Glob-ish pattern matched against submitted artifact paths
    pub pattern: String,
    pub kind: OutputKind,
    /// Required outputs block the phase gate when unresolved
    pub required: bool,
}

impl ExpectedOutput {
    pub fn required(pattern: impl Into<String>, kind: OutputKind) -> Self {
        Self { pattern: pattern.into(), kind, required: true }
    }

    pub fn optional(pattern: impl Into<String>, kind: OutputKind) -> Self {
        Self { pattern: pattern.into(), kind, required: false }
    }

    /// Match a submitted artifact path against this pattern.
    ///
    /// Supports a single `*` wildcard segment; anything else is an
    /// exact suffix match on the file name.
    pub fn matches(&self, path: &str) -> bool {
        let name = path.rsplit('/').next().unwrap_or(path);
        if let Some(suffix) = self.pattern.strip_prefix('*') {
            name.ends_with(suffix)
        } else {
            name == self.pattern
        }
    }
}

/// A stage of work with its own criteria and allowed next stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: Uuid,
    /// Stable key, e.g. "requirements", "design", "building"
    pub name: String,
    pub sequence_order: u32,
    /// Next phases reachable through normal progression (a DAG)
    pub allowed_transitions: BTreeSet<Uuid>,
    /// Ordered completion criteria checked at the phase gate
    pub done_definitions: Vec<DoneDefinition>,
    /// Artifact patterns this phase should produce
    pub expected_outputs: Vec<ExpectedOutput>,
    /// Prompt material handed to agents working in this phase
    pub phase_prompt: String,
    /// Operator guidance for the next phase
    pub next_steps_guide: String,
    /// Per-phase in-progress timeout override, seconds
    pub task_timeout_seconds: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Phase {
    pub fn new(name: impl Into<String>, sequence_order: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sequence_order,
            allowed_transitions: BTreeSet::new(),
            done_definitions: Vec::new(),
            expected_outputs: Vec::new(),
            phase_prompt: String::new(),
            next_steps_guide: String::new(),
            task_timeout_seconds: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_transition(mut self, next: Uuid) -> Self {
        self.allowed_transitions.insert(next);
        self
    }

    pub fn with_done_definition(mut self, criterion: impl Into<String>) -> Self {
        self.done_definitions.push(DoneDefinition::new(criterion));
        self
    }

    pub fn with_expected_output(mut self, output: ExpectedOutput) -> Self {
        self.expected_outputs.push(output);
        self
    }

    pub fn allows_transition_to(&self, next: Uuid) -> bool {
        self.allowed_transitions.contains(&next)
    }

    /// Criteria not yet satisfied, in definition order.
    pub fn unsatisfied_criteria(&self) -> Vec<String> {
        self.done_definitions
            .iter()
            .filter(|d| !d.satisfied)
            .map(|d| d.criterion.clone())
            .collect()
    }

    /// Required output patterns not matched by any of `artifact_paths`.
    pub fn unresolved_outputs(&self, artifact_paths: &[String]) -> Vec<String> {
        self.expected_outputs
            .iter()
            .filter(|o| o.required)
            .filter(|o| !artifact_paths.iter().any(|p| o.matches(p)))
            .map(|o| o.pattern.clone())
            .collect()
    }
}

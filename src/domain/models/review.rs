//! Validation reviews.
//!
//! One immutable row per validator iteration. The `iteration_number`
//! must equal the task's `validation_iteration` at the moment of
//! creation; the review repository enforces this on insert.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validator's verdict on one iteration of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReview {
    pub id: Uuid,
    pub task_id: Uuid,
    pub validator_agent_id: Uuid,
    /// Equals the task's validation_iteration when written
    pub iteration_number: u32,
    pub validation_passed: bool,
    /// Actionable feedback delivered to the originating agent on failure
    pub feedback: String,
    /// Supporting evidence (logs, test output, file references)
    pub evidence: Vec<String>,
    /// Non-binding suggestions
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ValidationReview {
    pub fn new(
        task_id: Uuid,
        validator_agent_id: Uuid,
        iteration_number: u32,
        validation_passed: bool,
        feedback: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            validator_agent_id,
            iteration_number,
            validation_passed,
            feedback: feedback.into(),
            evidence: Vec::new(),
            recommendations: Vec::new(),
            created_at: now,
        }
    }

    pub fn with_evidence(mut self, item: impl Into<String>) -> Self {
        self.evidence.push(item.into());
        self
    }

    pub fn with_recommendation(mut self, item: impl Into<String>) -> Self {
        self.recommendations.push(item.into());
        self
    }
}

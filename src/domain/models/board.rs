//! Kanban board columns.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A visual grouping of tickets mapped to one or more phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardColumn {
    pub id: Uuid,
    /// Stable key, e.g. "backlog", "building", "done"
    pub name: String,
    pub sequence_order: u32,
    /// Phases whose tickets may occupy this column
    pub phase_mapping: BTreeSet<Uuid>,
    /// Maximum tickets allowed absent a forced override
    pub wip_limit: Option<u32>,
    pub is_terminal: bool,
    /// Follow-on column for automatic moves
    pub auto_transition_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BoardColumn {
    pub fn new(name: impl Into<String>, sequence_order: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sequence_order,
            phase_mapping: BTreeSet::new(),
            wip_limit: None,
            is_terminal: false,
            auto_transition_to: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_phase(mut self, phase_id: Uuid) -> Self {
        self.phase_mapping.insert(phase_id);
        self
    }

    pub fn with_wip_limit(mut self, limit: u32) -> Self {
        self.wip_limit = Some(limit);
        self
    }

    pub fn terminal(mut self) -> Self {
        self.is_terminal = true;
        self
    }

    pub fn with_auto_transition(mut self, next: Uuid) -> Self {
        self.auto_transition_to = Some(next);
        self
    }

    /// Whether a ticket in `phase_id` may occupy this column.
    pub fn accepts_phase(&self, phase_id: Uuid) -> bool {
        self.phase_mapping.contains(&phase_id)
    }

    /// Whether `occupancy` more tickets would exceed the WIP limit.
    pub fn over_wip(&self, occupancy: u32) -> bool {
        self.wip_limit.is_some_and(|limit| occupancy >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wip_boundary() {
        let col = BoardColumn::new("building", 3, Utc::now()).with_wip_limit(2);
        assert!(!col.over_wip(0));
        assert!(!col.over_wip(1));
        assert!(col.over_wip(2));
    }

    #[test]
    fn test_no_wip_limit_never_over() {
        let col = BoardColumn::new("backlog", 1, Utc::now());
        assert!(!col.over_wip(u32::MAX));
    }

    #[test]
    fn test_phase_mapping() {
        let phase = Uuid::new_v4();
        let col = BoardColumn::new("building", 3, Utc::now()).with_phase(phase);
        assert!(col.accepts_phase(phase));
        assert!(!col.accepts_phase(Uuid::new_v4()));
    }
}

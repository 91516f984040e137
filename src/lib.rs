//! Conductor - multi-agent workflow orchestration kernel
//!
//! Drives software-engineering work from a goal through phased
//! execution to a validated result:
//! - Agent registry with heartbeats and capability matching
//! - Priority/phase/capability-aware task scheduler over a dependency DAG
//! - Kanban ticket engine with WIP limits and phase gates
//! - Discovery-driven branching and diagnostic self-healing
//! - Validation loop with iterate-until-done semantics
//! - Rank-ordered supervisor authority with audited, reversible actions
//! - Journaled, partition-ordered event bus

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{KernelError, KernelResult};
pub use services::Kernel;

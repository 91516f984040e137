//! CLI command handlers.

pub mod agent;
pub mod event;
pub mod init;
pub mod serve;
pub mod task;
pub mod ticket;

use anyhow::{anyhow, Result};
use uuid::Uuid;

/// Resolve a full or prefixed UUID argument.
pub fn parse_id(input: &str) -> Result<Uuid> {
    Uuid::parse_str(input).map_err(|_| anyhow!("'{input}' is not a valid id; pass the full UUID"))
}

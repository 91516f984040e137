//! `conductor agent` - inspect registered agents.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;

use crate::adapters::sqlite::SqliteAgentRepository;
use crate::cli::display::agents_table;
use crate::domain::models::AgentStatus;
use crate::domain::ports::{AgentFilter, AgentRepository};

use super::parse_id;

pub async fn handle_list(pool: SqlitePool, status: Option<String>, json: bool) -> Result<()> {
    let repo = SqliteAgentRepository::new(pool);
    let status = match status {
        Some(s) => {
            Some(AgentStatus::from_str(&s).ok_or_else(|| anyhow!("unknown agent status '{s}'"))?)
        }
        None => None,
    };
    let agents = repo.list(AgentFilter { status, ..Default::default() }).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
    } else {
        println!("{}", agents_table(&agents));
    }
    Ok(())
}

pub async fn handle_show(pool: SqlitePool, id: &str, json: bool) -> Result<()> {
    let repo = SqliteAgentRepository::new(pool);
    let agent = repo
        .get(parse_id(id)?)
        .await?
        .ok_or_else(|| anyhow!("agent {id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&agent)?);
    } else {
        println!("{}", agents_table(std::slice::from_ref(&agent)));
    }
    Ok(())
}

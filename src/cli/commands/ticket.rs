//! `conductor ticket` - inspect tickets.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;

use crate::adapters::sqlite::SqliteTicketRepository;
use crate::cli::display::tickets_table;
use crate::domain::ports::{TicketFilter, TicketRepository};

use super::parse_id;

pub async fn handle_list(pool: SqlitePool, archived: bool, json: bool) -> Result<()> {
    let repo = SqliteTicketRepository::new(pool);
    let tickets = repo
        .list(TicketFilter { include_archived: archived, ..Default::default() })
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tickets)?);
    } else {
        println!("{}", tickets_table(&tickets));
    }
    Ok(())
}

pub async fn handle_show(pool: SqlitePool, id: &str, json: bool) -> Result<()> {
    let repo = SqliteTicketRepository::new(pool);
    let ticket = repo
        .get(parse_id(id)?)
        .await?
        .ok_or_else(|| anyhow!("ticket {id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&ticket)?);
    } else {
        println!("{}", tickets_table(std::slice::from_ref(&ticket)));
        if !ticket.context_summary.is_empty() {
            println!("\ncontext summary:\n{}", ticket.context_summary);
        }
    }
    Ok(())
}

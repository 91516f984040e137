//! `conductor task` - inspect tasks.

use anyhow::{anyhow, Result};
use sqlx::SqlitePool;

use crate::adapters::sqlite::SqliteTaskRepository;
use crate::cli::display::tasks_table;
use crate::domain::models::TaskStatus;
use crate::domain::ports::{TaskFilter, TaskRepository};

use super::parse_id;

pub async fn handle_list(
    pool: SqlitePool,
    status: Option<String>,
    ticket: Option<String>,
    json: bool,
) -> Result<()> {
    let repo = SqliteTaskRepository::new(pool);
    let status = match status {
        Some(s) => Some(TaskStatus::from_str(&s).ok_or_else(|| anyhow!("unknown task status '{s}'"))?),
        None => None,
    };
    let ticket_id = ticket.as_deref().map(parse_id).transpose()?;
    let tasks = repo.list(TaskFilter { status, ticket_id, ..Default::default() }).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else {
        println!("{}", tasks_table(&tasks));
    }
    Ok(())
}

pub async fn handle_show(pool: SqlitePool, id: &str, json: bool) -> Result<()> {
    let repo = SqliteTaskRepository::new(pool);
    let task = repo
        .get(parse_id(id)?)
        .await?
        .ok_or_else(|| anyhow!("task {id} not found"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!("{}", tasks_table(std::slice::from_ref(&task)));
        if let Some(feedback) = &task.last_validation_feedback {
            println!("\nlast validation feedback:\n{feedback}");
        }
    }
    Ok(())
}

//! `conductor event` - inspect the journal.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::adapters::sqlite::SqliteEventJournal;
use crate::cli::display::events_table;
use crate::domain::ports::{EventJournal, EventQuery};

pub async fn handle_tail(pool: SqlitePool, topic: &str, limit: u32, json: bool) -> Result<()> {
    let journal = SqliteEventJournal::new(pool);
    let mut events = journal
        .query(EventQuery {
            topic_pattern: Some(topic.to_string()),
            ..Default::default()
        })
        .await?;

    // Keep only the newest `limit`, oldest first.
    if events.len() > limit as usize {
        events.drain(..events.len() - limit as usize);
    }

    if json {
        let envelopes: Vec<_> = events.iter().map(|e| &e.envelope).collect();
        println!("{}", serde_json::to_string_pretty(&envelopes)?);
    } else {
        let rows: Vec<_> = events.into_iter().map(|e| (e.position, e.envelope)).collect();
        println!("{}", events_table(&rows));
    }
    Ok(())
}

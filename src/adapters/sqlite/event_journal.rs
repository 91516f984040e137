//! SQLite implementation of the EventJournal.
//!
//! Sequence assignment and the append run in one transaction so the
//! per-partition sequence is gapless and totally ordered even with
//! concurrent publishers.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{Actor, EventEnvelope};
use crate::domain::ports::{EventJournal, EventQuery, JournaledEvent};

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteEventJournal {
    pool: SqlitePool,
}

impl SqliteEventJournal {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    position: i64,
    id: String,
    topic: String,
    partition_key: String,
    sequence: i64,
    correlation_id: String,
    occurred_at: String,
    actor: String,
    payload: String,
    schema_version: i64,
}

impl TryFrom<EventRow> for JournaledEvent {
    type Error = KernelError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let actor: Actor = serde_json::from_str(&row.actor)?;
        Ok(JournaledEvent {
            position: row.position as u64,
            envelope: EventEnvelope {
                id: parse_uuid(&row.id)?,
                topic: row.topic,
                partition_key: parse_uuid(&row.partition_key)?,
                sequence: row.sequence as u64,
                correlation_id: parse_uuid(&row.correlation_id)?,
                occurred_at: parse_datetime(&row.occurred_at)?,
                actor,
                payload: serde_json::from_str(&row.payload)?,
                schema_version: row.schema_version as u16,
            },
        })
    }
}

/// Translate a trailing-wildcard pattern into a SQL LIKE clause.
fn pattern_to_like(pattern: &str) -> Option<String> {
    if pattern == "*" {
        return None;
    }
    pattern.strip_suffix(".*").map(|prefix| format!("{prefix}.%"))
}

#[async_trait]
impl EventJournal for SqliteEventJournal {
    async fn append(&self, mut envelope: EventEnvelope) -> KernelResult<JournaledEvent> {
        let mut tx = self.pool.begin().await?;

        let next: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), -1) + 1 FROM events WHERE topic = ? AND partition_key = ?",
        )
        .bind(&envelope.topic)
        .bind(envelope.partition_key.to_string())
        .fetch_one(&mut *tx)
        .await?;
        envelope.sequence = next.0 as u64;

        let result = sqlx::query(
            r#"INSERT INTO events (id, topic, partition_key, sequence, correlation_id,
               occurred_at, actor, payload, schema_version)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(envelope.id.to_string())
        .bind(&envelope.topic)
        .bind(envelope.partition_key.to_string())
        .bind(envelope.sequence as i64)
        .bind(envelope.correlation_id.to_string())
        .bind(envelope.occurred_at.to_rfc3339())
        .bind(serde_json::to_string(&envelope.actor)?)
        .bind(serde_json::to_string(&envelope.payload)?)
        .bind(i64::from(envelope.schema_version))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(JournaledEvent { position: result.last_insert_rowid() as u64, envelope })
    }

    async fn query(&self, query: EventQuery) -> KernelResult<Vec<JournaledEvent>> {
        let mut sql = String::from("SELECT * FROM events WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(pattern) = &query.topic_pattern {
            if let Some(like) = pattern_to_like(pattern) {
                sql.push_str(" AND topic LIKE ?");
                bindings.push(like);
            } else if pattern != "*" {
                sql.push_str(" AND topic = ?");
                bindings.push(pattern.clone());
            }
        }
        if let Some(partition) = query.partition_key {
            sql.push_str(" AND partition_key = ?");
            bindings.push(partition.to_string());
        }
        if let Some(correlation) = query.correlation_id {
            sql.push_str(" AND correlation_id = ?");
            bindings.push(correlation.to_string());
        }
        if let Some(since) = query.since {
            sql.push_str(" AND occurred_at >= ?");
            bindings.push(since.to_rfc3339());
        }
        if let Some(until) = query.until {
            sql.push_str(" AND occurred_at <= ?");
            bindings.push(until.to_rfc3339());
        }
        sql.push_str(" ORDER BY position ASC");
        if let Some(limit) = query.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut q = sqlx::query_as::<_, EventRow>(&sql);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows: Vec<EventRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn latest_sequence(&self, topic: &str, partition_key: Uuid) -> KernelResult<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT MAX(sequence) FROM events WHERE topic = ? AND partition_key = ?
             HAVING MAX(sequence) IS NOT NULL",
        )
        .bind(topic)
        .bind(partition_key.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(s,)| s as u64))
    }

    async fn list_after_position(
        &self,
        position: u64,
        topic_pattern: &str,
        limit: u32,
    ) -> KernelResult<Vec<JournaledEvent>> {
        let rows: Vec<EventRow> = match pattern_to_like(topic_pattern) {
            Some(like) => {
                sqlx::query_as(
                    "SELECT * FROM events WHERE position > ? AND topic LIKE ?
                     ORDER BY position ASC LIMIT ?",
                )
                .bind(position as i64)
                .bind(like)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
            None if topic_pattern == "*" => {
                sqlx::query_as("SELECT * FROM events WHERE position > ? ORDER BY position ASC LIMIT ?")
                    .bind(position as i64)
                    .bind(i64::from(limit))
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT * FROM events WHERE position > ? AND topic = ?
                     ORDER BY position ASC LIMIT ?",
                )
                .bind(position as i64)
                .bind(topic_pattern)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_cursor(&self, subscriber: &str) -> KernelResult<Option<u64>> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT position FROM event_cursors WHERE subscriber = ?")
            .bind(subscriber)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(p,)| p as u64))
    }

    async fn set_cursor(&self, subscriber: &str, position: u64) -> KernelResult<()> {
        sqlx::query(
            "INSERT INTO event_cursors (subscriber, position, updated_at)
             VALUES (?, ?, datetime('now'))
             ON CONFLICT(subscriber) DO UPDATE SET position = excluded.position,
             updated_at = excluded.updated_at",
        )
        .bind(subscriber)
        .bind(position as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

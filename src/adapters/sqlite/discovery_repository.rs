//! SQLite implementation of the DiscoveryRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{Discovery, DiscoveryType, ResolutionStatus};
use crate::domain::ports::DiscoveryRepository;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteDiscoveryRepository {
    pool: SqlitePool,
}

impl SqliteDiscoveryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct DiscoveryRow {
    id: String,
    source_task_id: String,
    discovery_type: String,
    description: String,
    description_hash: String,
    spawned_task_ids: String,
    priority_boost: i64,
    resolution_status: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<DiscoveryRow> for Discovery {
    type Error = KernelError;

    fn try_from(row: DiscoveryRow) -> Result<Self, Self::Error> {
        let spawned: Vec<String> = serde_json::from_str(&row.spawned_task_ids)?;
        let spawned_task_ids = spawned.iter().map(|s| parse_uuid(s)).collect::<KernelResult<Vec<_>>>()?;
        Ok(Discovery {
            id: parse_uuid(&row.id)?,
            source_task_id: parse_uuid(&row.source_task_id)?,
            discovery_type: DiscoveryType::from_str(&row.discovery_type).ok_or_else(|| {
                KernelError::Serialization(format!("unknown discovery type {}", row.discovery_type))
            })?,
            description: row.description,
            description_hash: row.description_hash,
            spawned_task_ids,
            priority_boost: row.priority_boost != 0,
            resolution_status: ResolutionStatus::from_str(&row.resolution_status).ok_or_else(|| {
                KernelError::Serialization(format!("unknown resolution status {}", row.resolution_status))
            })?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

fn spawned_json(discovery: &Discovery) -> Result<String, serde_json::Error> {
    let strings: Vec<String> = discovery.spawned_task_ids.iter().map(ToString::to_string).collect();
    serde_json::to_string(&strings)
}

#[async_trait]
impl DiscoveryRepository for SqliteDiscoveryRepository {
    async fn insert(&self, discovery: &Discovery) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO task_discoveries (id, source_task_id, discovery_type, description,
               description_hash, spawned_task_ids, priority_boost, resolution_status, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(discovery.id.to_string())
        .bind(discovery.source_task_id.to_string())
        .bind(discovery.discovery_type.as_str())
        .bind(&discovery.description)
        .bind(&discovery.description_hash)
        .bind(spawned_json(discovery)?)
        .bind(i64::from(discovery.priority_boost))
        .bind(discovery.resolution_status.as_str())
        .bind(discovery.created_at.to_rfc3339())
        .bind(discovery.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => {
                KernelError::Conflict { entity: "discovery", id: discovery.id.to_string() }
            }
            _ => e.into(),
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<Discovery>> {
        let row: Option<DiscoveryRow> = sqlx::query_as("SELECT * FROM task_discoveries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_duplicate(
        &self,
        source_task_id: Uuid,
        discovery_type: DiscoveryType,
        description_hash: &str,
    ) -> KernelResult<Option<Discovery>> {
        let row: Option<DiscoveryRow> = sqlx::query_as(
            "SELECT * FROM task_discoveries
             WHERE source_task_id = ? AND discovery_type = ? AND description_hash = ?",
        )
        .bind(source_task_id.to_string())
        .bind(discovery_type.as_str())
        .bind(description_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, discovery: &Discovery) -> KernelResult<()> {
        let result = sqlx::query(
            r#"UPDATE task_discoveries SET spawned_task_ids = ?, priority_boost = ?,
               resolution_status = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(spawned_json(discovery)?)
        .bind(i64::from(discovery.priority_boost))
        .bind(discovery.resolution_status.as_str())
        .bind(discovery.updated_at.to_rfc3339())
        .bind(discovery.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "discovery", id: discovery.id.to_string() });
        }
        Ok(())
    }

    async fn list_by_source(&self, source_task_id: Uuid) -> KernelResult<Vec<Discovery>> {
        let rows: Vec<DiscoveryRow> = sqlx::query_as(
            "SELECT * FROM task_discoveries WHERE source_task_id = ? ORDER BY created_at ASC",
        )
        .bind(source_task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_for_ticket_phase(&self, ticket_id: Uuid, phase_id: Uuid) -> KernelResult<Vec<Discovery>> {
        let rows: Vec<DiscoveryRow> = sqlx::query_as(
            "SELECT d.* FROM task_discoveries d
             JOIN tasks t ON t.id = d.source_task_id
             WHERE t.ticket_id = ? AND t.phase_id = ?
             ORDER BY d.created_at ASC",
        )
        .bind(ticket_id.to_string())
        .bind(phase_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

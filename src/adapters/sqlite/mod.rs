//! SQLite persistence adapters for the Conductor kernel.

pub mod agent_repository;
pub mod artifact_repository;
pub mod connection;
pub mod diagnostic_repository;
pub mod discovery_repository;
pub mod event_journal;
pub mod migrations;
pub mod phase_repository;
pub mod review_repository;
pub mod supervisor_repository;
pub mod task_repository;
pub mod ticket_repository;

pub use agent_repository::SqliteAgentRepository;
pub use artifact_repository::SqliteArtifactRepository;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use diagnostic_repository::SqliteDiagnosticRepository;
pub use discovery_repository::SqliteDiscoveryRepository;
pub use event_journal::SqliteEventJournal;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use phase_repository::SqlitePhaseRepository;
pub use review_repository::SqliteReviewRepository;
pub use supervisor_repository::SqliteSupervisorRepository;
pub use task_repository::SqliteTaskRepository;
pub use ticket_repository::SqliteTicketRepository;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};

/// Parse a UUID string from a SQLite row field.
pub fn parse_uuid(s: &str) -> KernelResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| KernelError::Serialization(e.to_string()))
}

/// Parse an optional UUID string from a SQLite row field.
pub fn parse_optional_uuid(s: Option<String>) -> KernelResult<Option<Uuid>> {
    s.map(|s| Uuid::parse_str(&s))
        .transpose()
        .map_err(|e| KernelError::Serialization(e.to_string()))
}

/// Parse an RFC3339 datetime string from a SQLite row field.
pub fn parse_datetime(s: &str) -> KernelResult<DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map_err(|e| KernelError::Serialization(e.to_string()))
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an optional RFC3339 datetime string from a SQLite row field.
pub fn parse_optional_datetime(s: Option<String>) -> KernelResult<Option<DateTime<Utc>>> {
    s.map(|s| chrono::DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
        .transpose()
        .map_err(|e| KernelError::Serialization(e.to_string()))
}

/// Parse a JSON string from a SQLite row field, falling back to the type's default.
pub fn parse_json_or_default<T: serde::de::DeserializeOwned + Default>(s: Option<String>) -> KernelResult<T> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| KernelError::Serialization(e.to_string()))
        .map(|opt| opt.unwrap_or_default())
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),
}

pub async fn initialize_database(database_url: &str) -> Result<SqlitePool, DatabaseError> {
    let pool = create_pool(database_url, None).await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

/// Create an in-memory test pool with all migrations applied.
pub async fn create_migrated_test_pool() -> Result<SqlitePool, DatabaseError> {
    let pool = create_test_pool().await?;
    let migrator = Migrator::new(pool.clone());
    migrator.run_embedded_migrations(all_embedded_migrations()).await?;
    Ok(pool)
}

//! SQLite implementation of the PhaseRepository (phases + board columns).

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::{BoardColumn, DoneDefinition, ExpectedOutput, Phase};
use crate::domain::ports::PhaseRepository;

use super::{parse_datetime, parse_optional_uuid, parse_uuid};

#[derive(Clone)]
pub struct SqlitePhaseRepository {
    pool: SqlitePool,
}

impl SqlitePhaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PhaseRow {
    id: String,
    name: String,
    sequence_order: i64,
    allowed_transitions: String,
    done_definitions: String,
    expected_outputs: String,
    phase_prompt: String,
    next_steps_guide: String,
    task_timeout_seconds: Option<i64>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PhaseRow> for Phase {
    type Error = KernelError;

    fn try_from(row: PhaseRow) -> Result<Self, Self::Error> {
        let transitions: BTreeSet<String> = serde_json::from_str(&row.allowed_transitions)?;
        let allowed_transitions = transitions
            .iter()
            .map(|s| parse_uuid(s))
            .collect::<KernelResult<BTreeSet<Uuid>>>()?;
        let done_definitions: Vec<DoneDefinition> = serde_json::from_str(&row.done_definitions)?;
        let expected_outputs: Vec<ExpectedOutput> = serde_json::from_str(&row.expected_outputs)?;
        Ok(Phase {
            id: parse_uuid(&row.id)?,
            name: row.name,
            sequence_order: row.sequence_order as u32,
            allowed_transitions,
            done_definitions,
            expected_outputs,
            phase_prompt: row.phase_prompt,
            next_steps_guide: row.next_steps_guide,
            task_timeout_seconds: row.task_timeout_seconds.map(|s| s as u64),
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ColumnRow {
    id: String,
    name: String,
    sequence_order: i64,
    phase_mapping: String,
    wip_limit: Option<i64>,
    is_terminal: i64,
    auto_transition_to: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ColumnRow> for BoardColumn {
    type Error = KernelError;

    fn try_from(row: ColumnRow) -> Result<Self, Self::Error> {
        let mapping: BTreeSet<String> = serde_json::from_str(&row.phase_mapping)?;
        let phase_mapping = mapping
            .iter()
            .map(|s| parse_uuid(s))
            .collect::<KernelResult<BTreeSet<Uuid>>>()?;
        Ok(BoardColumn {
            id: parse_uuid(&row.id)?,
            name: row.name,
            sequence_order: row.sequence_order as u32,
            phase_mapping,
            wip_limit: row.wip_limit.map(|l| l as u32),
            is_terminal: row.is_terminal != 0,
            auto_transition_to: parse_optional_uuid(row.auto_transition_to)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

fn uuid_set_json(set: &BTreeSet<Uuid>) -> Result<String, serde_json::Error> {
    let strings: Vec<String> = set.iter().map(ToString::to_string).collect();
    serde_json::to_string(&strings)
}

#[async_trait]
impl PhaseRepository for SqlitePhaseRepository {
    async fn insert_phase(&self, phase: &Phase) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO phases (id, name, sequence_order, allowed_transitions, done_definitions,
               expected_outputs, phase_prompt, next_steps_guide, task_timeout_seconds, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(phase.id.to_string())
        .bind(&phase.name)
        .bind(phase.sequence_order as i64)
        .bind(uuid_set_json(&phase.allowed_transitions)?)
        .bind(serde_json::to_string(&phase.done_definitions)?)
        .bind(serde_json::to_string(&phase.expected_outputs)?)
        .bind(&phase.phase_prompt)
        .bind(&phase.next_steps_guide)
        .bind(phase.task_timeout_seconds.map(|s| s as i64))
        .bind(phase.created_at.to_rfc3339())
        .bind(phase.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_phase(&self, id: Uuid) -> KernelResult<Option<Phase>> {
        let row: Option<PhaseRow> = sqlx::query_as("SELECT * FROM phases WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_phase_by_name(&self, name: &str) -> KernelResult<Option<Phase>> {
        let row: Option<PhaseRow> = sqlx::query_as("SELECT * FROM phases WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_phase(&self, phase: &Phase) -> KernelResult<()> {
        let result = sqlx::query(
            r#"UPDATE phases SET name = ?, sequence_order = ?, allowed_transitions = ?,
               done_definitions = ?, expected_outputs = ?, phase_prompt = ?, next_steps_guide = ?,
               task_timeout_seconds = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&phase.name)
        .bind(phase.sequence_order as i64)
        .bind(uuid_set_json(&phase.allowed_transitions)?)
        .bind(serde_json::to_string(&phase.done_definitions)?)
        .bind(serde_json::to_string(&phase.expected_outputs)?)
        .bind(&phase.phase_prompt)
        .bind(&phase.next_steps_guide)
        .bind(phase.task_timeout_seconds.map(|s| s as i64))
        .bind(phase.updated_at.to_rfc3339())
        .bind(phase.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "phase", id: phase.id.to_string() });
        }
        Ok(())
    }

    async fn list_phases(&self) -> KernelResult<Vec<Phase>> {
        let rows: Vec<PhaseRow> = sqlx::query_as("SELECT * FROM phases ORDER BY sequence_order ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn insert_column(&self, column: &BoardColumn) -> KernelResult<()> {
        sqlx::query(
            r#"INSERT INTO board_columns (id, name, sequence_order, phase_mapping, wip_limit,
               is_terminal, auto_transition_to, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(column.id.to_string())
        .bind(&column.name)
        .bind(column.sequence_order as i64)
        .bind(uuid_set_json(&column.phase_mapping)?)
        .bind(column.wip_limit.map(i64::from))
        .bind(i64::from(column.is_terminal))
        .bind(column.auto_transition_to.map(|id| id.to_string()))
        .bind(column.created_at.to_rfc3339())
        .bind(column.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_column(&self, id: Uuid) -> KernelResult<Option<BoardColumn>> {
        let row: Option<ColumnRow> = sqlx::query_as("SELECT * FROM board_columns WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_column_by_name(&self, name: &str) -> KernelResult<Option<BoardColumn>> {
        let row: Option<ColumnRow> = sqlx::query_as("SELECT * FROM board_columns WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn update_column(&self, column: &BoardColumn) -> KernelResult<()> {
        let result = sqlx::query(
            r#"UPDATE board_columns SET name = ?, sequence_order = ?, phase_mapping = ?,
               wip_limit = ?, is_terminal = ?, auto_transition_to = ?, updated_at = ? WHERE id = ?"#,
        )
        .bind(&column.name)
        .bind(column.sequence_order as i64)
        .bind(uuid_set_json(&column.phase_mapping)?)
        .bind(column.wip_limit.map(i64::from))
        .bind(i64::from(column.is_terminal))
        .bind(column.auto_transition_to.map(|id| id.to_string()))
        .bind(column.updated_at.to_rfc3339())
        .bind(column.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(KernelError::NotFound { entity: "board_column", id: column.id.to_string() });
        }
        Ok(())
    }

    async fn list_columns(&self) -> KernelResult<Vec<BoardColumn>> {
        let rows: Vec<ColumnRow> =
            sqlx::query_as("SELECT * FROM board_columns ORDER BY sequence_order ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }
}

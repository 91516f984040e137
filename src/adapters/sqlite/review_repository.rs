//! SQLite implementation of the ReviewRepository.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{KernelError, KernelResult};
use crate::domain::models::ValidationReview;
use crate::domain::ports::ReviewRepository;

use super::{parse_datetime, parse_uuid};

#[derive(Clone)]
pub struct SqliteReviewRepository {
    pool: SqlitePool,
}

impl SqliteReviewRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: String,
    task_id: String,
    validator_agent_id: String,
    iteration_number: i64,
    validation_passed: i64,
    feedback: String,
    evidence: String,
    recommendations: String,
    created_at: String,
}

impl TryFrom<ReviewRow> for ValidationReview {
    type Error = KernelError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        Ok(ValidationReview {
            id: parse_uuid(&row.id)?,
            task_id: parse_uuid(&row.task_id)?,
            validator_agent_id: parse_uuid(&row.validator_agent_id)?,
            iteration_number: row.iteration_number as u32,
            validation_passed: row.validation_passed != 0,
            feedback: row.feedback,
            evidence: serde_json::from_str(&row.evidence)?,
            recommendations: serde_json::from_str(&row.recommendations)?,
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}

#[async_trait]
impl ReviewRepository for SqliteReviewRepository {
    async fn insert(&self, review: &ValidationReview) -> KernelResult<()> {
        // The review is accepted only while the task sits at the same
        // iteration; checked here so the row and the task agree even if
        // the service-level check races.
        let task_iteration: Option<(i64,)> =
            sqlx::query_as("SELECT validation_iteration FROM tasks WHERE id = ?")
                .bind(review.task_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        match task_iteration {
            None => {
                return Err(KernelError::NotFound { entity: "task", id: review.task_id.to_string() })
            }
            Some((iteration,)) if iteration as u32 != review.iteration_number => {
                return Err(KernelError::Conflict {
                    entity: "validation_review",
                    id: review.task_id.to_string(),
                });
            }
            Some(_) => {}
        }

        sqlx::query(
            r#"INSERT INTO validation_reviews (id, task_id, validator_agent_id, iteration_number,
               validation_passed, feedback, evidence, recommendations, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(review.id.to_string())
        .bind(review.task_id.to_string())
        .bind(review.validator_agent_id.to_string())
        .bind(review.iteration_number as i64)
        .bind(i64::from(review.validation_passed))
        .bind(&review.feedback)
        .bind(serde_json::to_string(&review.evidence)?)
        .bind(serde_json::to_string(&review.recommendations)?)
        .bind(review.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE") => KernelError::Conflict {
                entity: "validation_review",
                id: review.task_id.to_string(),
            },
            _ => e.into(),
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> KernelResult<Option<ValidationReview>> {
        let row: Option<ReviewRow> = sqlx::query_as("SELECT * FROM validation_reviews WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_by_task(&self, task_id: Uuid) -> KernelResult<Vec<ValidationReview>> {
        let rows: Vec<ReviewRow> = sqlx::query_as(
            "SELECT * FROM validation_reviews WHERE task_id = ? ORDER BY iteration_number ASC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_for_task(&self, task_id: Uuid) -> KernelResult<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM validation_reviews WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 as u64)
    }

    async fn trailing_failure_count(&self, task_id: Uuid) -> KernelResult<u32> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT validation_passed FROM validation_reviews
             WHERE task_id = ? ORDER BY iteration_number DESC",
        )
        .bind(task_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        let mut count = 0;
        for (passed,) in rows {
            if passed != 0 {
                break;
            }
            count += 1;
        }
        Ok(count)
    }
}

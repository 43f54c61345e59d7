use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use kahawa_core::domain::notification::{NotificationJob, NotificationJobId, NotificationState};
use kahawa_core::domain::request::RequestId;

use super::{parse_timestamp, parse_u32, OutboxRepository, RepositoryError};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
        id,
        request_id,
        recipient_identity,
        recipient_phone,
        message,
        state,
        attempts,
        max_attempts,
        available_at,
        last_error,
        created_at,
        updated_at
     FROM notification_outbox";

const UPSERT: &str = "INSERT INTO notification_outbox (
        id,
        request_id,
        recipient_identity,
        recipient_phone,
        message,
        state,
        attempts,
        max_attempts,
        available_at,
        last_error,
        created_at,
        updated_at
     ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
     ON CONFLICT(id) DO UPDATE SET
        state = excluded.state,
        attempts = excluded.attempts,
        max_attempts = excluded.max_attempts,
        available_at = excluded.available_at,
        last_error = excluded.last_error,
        updated_at = excluded.updated_at";

pub struct SqlOutboxRepository {
    pool: DbPool,
}

impl SqlOutboxRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Jobs still waiting for delivery, due or not.
    pub async fn backlog(&self) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(1) FROM notification_outbox WHERE state IN ('queued', 'retryable_failed')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

fn bind_job<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    job: &'q NotificationJob,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(&job.id.0)
        .bind(job.request_id.as_str())
        .bind(&job.recipient_identity)
        .bind(&job.recipient_phone)
        .bind(&job.message)
        .bind(job.state.as_str())
        .bind(i64::from(job.attempts))
        .bind(i64::from(job.max_attempts))
        .bind(job.available_at.to_rfc3339())
        .bind(job.last_error.as_deref())
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
}

#[async_trait::async_trait]
impl OutboxRepository for SqlOutboxRepository {
    async fn enqueue(&self, jobs: &[NotificationJob]) -> Result<(), RepositoryError> {
        if jobs.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for job in jobs {
            bind_job(sqlx::query(UPSERT), job).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationJob>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE state IN ('queued', 'retryable_failed') AND available_at <= ?
             ORDER BY available_at ASC, created_at ASC
             LIMIT ?"
        ))
        .bind(now.to_rfc3339())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(job_from_row).collect()
    }

    async fn save(&self, job: &NotificationJob) -> Result<(), RepositoryError> {
        bind_job(sqlx::query(UPSERT), job).execute(&self.pool).await?;
        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<NotificationJob>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE request_id = ? ORDER BY created_at ASC, id ASC"
        ))
        .bind(request_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(job_from_row).collect()
    }
}

fn job_from_row(row: SqliteRow) -> Result<NotificationJob, RepositoryError> {
    let state_raw = row.try_get::<String, _>("state")?;
    let state = NotificationState::parse(&state_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown notification state `{state_raw}`"))
    })?;

    Ok(NotificationJob {
        id: NotificationJobId(row.try_get("id")?),
        request_id: RequestId(row.try_get("request_id")?),
        recipient_identity: row.try_get("recipient_identity")?,
        recipient_phone: row.try_get("recipient_phone")?,
        message: row.try_get("message")?,
        state,
        attempts: parse_u32("attempts", row.try_get("attempts")?)?,
        max_attempts: parse_u32("max_attempts", row.try_get("max_attempts")?)?,
        available_at: parse_timestamp("available_at", row.try_get("available_at")?)?,
        last_error: row.try_get("last_error")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

use sqlx::{sqlite::SqliteRow, Row};

use kahawa_core::domain::archive::ArchivedRequest;
use kahawa_core::domain::request::{FundsRequest, RequestId};
use kahawa_core::flows::ApprovalState;

use super::{encode_json, parse_json, parse_timestamp, ArchiveRepository, RepositoryError};
use crate::DbPool;

pub struct SqlArchiveRepository {
    pool: DbPool,
}

impl SqlArchiveRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ArchiveRepository for SqlArchiveRepository {
    async fn archive(
        &self,
        archived: &ArchivedRequest,
        remove_original: bool,
    ) -> Result<(), RepositoryError> {
        let snapshot = encode_json("snapshot_json", &archived.snapshot)?;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            "INSERT INTO archived_request (
                request_id,
                snapshot_json,
                final_status,
                archived_by,
                archived_at
             ) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(request_id) DO NOTHING",
        )
        .bind(archived.request_id.as_str())
        .bind(snapshot)
        .bind(archived.final_status.as_str())
        .bind(&archived.archived_by)
        .bind(archived.archived_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::Duplicate {
                entity: "archived request",
                id: archived.request_id.to_string(),
            });
        }

        if remove_original {
            sqlx::query("DELETE FROM funds_request WHERE id = ?")
                .bind(archived.request_id.as_str())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn find(
        &self,
        request_id: &RequestId,
    ) -> Result<Option<ArchivedRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT request_id, snapshot_json, final_status, archived_by, archived_at
             FROM archived_request
             WHERE request_id = ?",
        )
        .bind(request_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(archived_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<ArchivedRequest>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT request_id, snapshot_json, final_status, archived_by, archived_at
             FROM archived_request
             ORDER BY archived_at DESC, request_id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(archived_from_row).collect()
    }
}

fn archived_from_row(row: SqliteRow) -> Result<ArchivedRequest, RepositoryError> {
    let status_raw = row.try_get::<String, _>("final_status")?;
    let final_status = ApprovalState::parse(&status_raw)
        .filter(ApprovalState::is_terminal)
        .ok_or_else(|| RepositoryError::Decode(format!("invalid final status `{status_raw}`")))?;
    let snapshot_raw = row.try_get::<String, _>("snapshot_json")?;
    let snapshot: FundsRequest = parse_json("snapshot_json", &snapshot_raw)?;

    Ok(ArchivedRequest {
        request_id: RequestId(row.try_get("request_id")?),
        snapshot,
        final_status,
        archived_by: row.try_get("archived_by")?,
        archived_at: parse_timestamp("archived_at", row.try_get("archived_at")?)?,
    })
}

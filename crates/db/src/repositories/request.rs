use sqlx::{sqlite::SqliteRow, Row};

use kahawa_core::domain::employee::normalize_identity;
use kahawa_core::domain::request::{
    FundsRequest, Priority, Rejection, RequestFilter, RequestId, RequestKind, StageSignoff,
};
use kahawa_core::flows::ApprovalState;

use super::{
    encode_json, parse_decimal, parse_json, parse_optional_timestamp, parse_timestamp, parse_u32,
    RepositoryError, RequestRepository,
};
use crate::DbPool;

const SELECT_COLUMNS: &str = "SELECT
        id,
        kind,
        title,
        description,
        amount,
        requester,
        requester_name,
        department,
        priority,
        state,
        finance_approved_by,
        finance_approved_at,
        admin_approved_by,
        admin_approved_at,
        rejected_by,
        rejection_reason,
        rejected_at,
        details_json,
        version,
        created_at,
        updated_at
     FROM funds_request";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RequestRepository for SqlRequestRepository {
    async fn insert(&self, request: &FundsRequest) -> Result<(), RepositoryError> {
        let details = encode_json("details_json", &request.details)?;
        let (finance_by, finance_at) = signoff_columns(request.finance_signoff.as_ref());
        let (admin_by, admin_at) = signoff_columns(request.admin_signoff.as_ref());

        let result = sqlx::query(
            "INSERT INTO funds_request (
                id,
                kind,
                title,
                description,
                amount,
                requester,
                requester_name,
                department,
                priority,
                state,
                finance_approved_by,
                finance_approved_at,
                admin_approved_by,
                admin_approved_at,
                rejected_by,
                rejection_reason,
                rejected_at,
                details_json,
                version,
                created_at,
                updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(request.id.as_str())
        .bind(request.kind.as_str())
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.amount.to_string())
        .bind(&request.requester)
        .bind(&request.requester_name)
        .bind(&request.department)
        .bind(request.priority.as_str())
        .bind(request.state.as_str())
        .bind(finance_by)
        .bind(finance_at)
        .bind(admin_by)
        .bind(admin_at)
        .bind(request.rejection.as_ref().map(|rejection| rejection.rejected_by.as_str()))
        .bind(request.rejection.as_ref().map(|rejection| rejection.reason.as_str()))
        .bind(request.rejection.as_ref().map(|rejection| rejection.rejected_at.to_rfc3339()))
        .bind(details)
        .bind(i64::from(request.version))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Duplicate {
                entity: "request",
                id: request.id.to_string(),
            });
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &RequestId) -> Result<Option<FundsRequest>, RepositoryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(request_from_row).transpose()
    }

    async fn list(&self, filter: &RequestFilter) -> Result<Vec<FundsRequest>, RepositoryError> {
        let limit = filter.limit.map(i64::from).unwrap_or(-1);
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS}
             WHERE (? IS NULL OR state = ?)
               AND (? IS NULL OR lower(department) = lower(?))
               AND (? IS NULL OR requester = ?)
             ORDER BY created_at DESC, id ASC
             LIMIT ?"
        ))
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.state.map(|state| state.as_str()))
        .bind(filter.department.as_deref().map(str::trim))
        .bind(filter.department.as_deref().map(str::trim))
        .bind(filter.requester.as_deref().map(normalize_identity))
        .bind(filter.requester.as_deref().map(normalize_identity))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(request_from_row).collect()
    }

    async fn update(&self, mut request: FundsRequest) -> Result<FundsRequest, RepositoryError> {
        let details = encode_json("details_json", &request.details)?;
        let (finance_by, finance_at) = signoff_columns(request.finance_signoff.as_ref());
        let (admin_by, admin_at) = signoff_columns(request.admin_signoff.as_ref());

        let result = sqlx::query(
            "UPDATE funds_request SET
                title = ?,
                description = ?,
                amount = ?,
                requester_name = ?,
                department = ?,
                priority = ?,
                state = ?,
                finance_approved_by = ?,
                finance_approved_at = ?,
                admin_approved_by = ?,
                admin_approved_at = ?,
                rejected_by = ?,
                rejection_reason = ?,
                rejected_at = ?,
                details_json = ?,
                version = version + 1,
                updated_at = ?
             WHERE id = ? AND version = ?",
        )
        .bind(&request.title)
        .bind(&request.description)
        .bind(request.amount.to_string())
        .bind(&request.requester_name)
        .bind(&request.department)
        .bind(request.priority.as_str())
        .bind(request.state.as_str())
        .bind(finance_by)
        .bind(finance_at)
        .bind(admin_by)
        .bind(admin_at)
        .bind(request.rejection.as_ref().map(|rejection| rejection.rejected_by.as_str()))
        .bind(request.rejection.as_ref().map(|rejection| rejection.reason.as_str()))
        .bind(request.rejection.as_ref().map(|rejection| rejection.rejected_at.to_rfc3339()))
        .bind(details)
        .bind(request.updated_at.to_rfc3339())
        .bind(request.id.as_str())
        .bind(i64::from(request.version))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Conflict {
                entity: "request",
                id: request.id.to_string(),
                expected_version: request.version,
            });
        }

        request.version += 1;
        Ok(request)
    }

    async fn delete(&self, id: &RequestId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM funds_request WHERE id = ?")
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn signoff_columns(signoff: Option<&StageSignoff>) -> (Option<&str>, Option<String>) {
    match signoff {
        Some(signoff) => (Some(signoff.approver.as_str()), Some(signoff.approved_at.to_rfc3339())),
        None => (None, None),
    }
}

fn signoff_from_row(
    row: &SqliteRow,
    by_column: &str,
    at_column: &str,
) -> Result<Option<StageSignoff>, RepositoryError> {
    let approver = row.try_get::<Option<String>, _>(by_column)?;
    let approved_at = parse_optional_timestamp(at_column, row.try_get(at_column)?)?;
    match (approver, approved_at) {
        (Some(approver), Some(approved_at)) => Ok(Some(StageSignoff { approver, approved_at })),
        (None, None) => Ok(None),
        _ => Err(RepositoryError::Decode(format!(
            "`{by_column}` and `{at_column}` must be set together"
        ))),
    }
}

pub(crate) fn request_from_row(row: SqliteRow) -> Result<FundsRequest, RepositoryError> {
    let kind_raw = row.try_get::<String, _>("kind")?;
    let kind = RequestKind::parse(&kind_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request kind `{kind_raw}`")))?;
    let priority_raw = row.try_get::<String, _>("priority")?;
    let priority = Priority::parse(&priority_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown priority `{priority_raw}`")))?;
    let state_raw = row.try_get::<String, _>("state")?;
    let state = ApprovalState::parse(&state_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown request state `{state_raw}`")))?;

    let rejection = match row.try_get::<Option<String>, _>("rejected_by")? {
        Some(rejected_by) => Some(Rejection {
            rejected_by,
            reason: row.try_get::<Option<String>, _>("rejection_reason")?.unwrap_or_default(),
            rejected_at: parse_timestamp("rejected_at", row.try_get("rejected_at")?)?,
        }),
        None => None,
    };
    let details_raw = row.try_get::<String, _>("details_json")?;

    Ok(FundsRequest {
        finance_signoff: signoff_from_row(&row, "finance_approved_by", "finance_approved_at")?,
        admin_signoff: signoff_from_row(&row, "admin_approved_by", "admin_approved_at")?,
        id: RequestId(row.try_get("id")?),
        kind,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        amount: parse_decimal("amount", row.try_get("amount")?)?,
        requester: row.try_get("requester")?,
        requester_name: row.try_get("requester_name")?,
        department: row.try_get("department")?,
        priority,
        state,
        rejection,
        details: parse_json("details_json", &details_raw)?,
        version: parse_u32("version", row.try_get("version")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

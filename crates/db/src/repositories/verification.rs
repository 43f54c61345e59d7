use sqlx::{sqlite::SqliteRow, Row};

use kahawa_core::domain::verification::{VerificationCode, VerificationRecord, VerificationStatus};

use super::{parse_optional_timestamp, parse_timestamp, RepositoryError, VerificationRepository};
use crate::DbPool;

pub struct SqlVerificationRepository {
    pool: DbPool,
}

impl SqlVerificationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl VerificationRepository for SqlVerificationRepository {
    async fn insert(&self, record: &VerificationRecord) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO verification_record (
                code,
                document_kind,
                document_ref,
                subject_name,
                issued_by,
                status,
                issued_at,
                expires_at,
                revoked_at,
                revoked_reason
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(code) DO NOTHING",
        )
        .bind(record.code.as_str())
        .bind(&record.document_kind)
        .bind(&record.document_ref)
        .bind(&record.subject_name)
        .bind(&record.issued_by)
        .bind(record.status.as_str())
        .bind(record.issued_at.to_rfc3339())
        .bind(record.expires_at.map(|value| value.to_rfc3339()))
        .bind(record.revoked_at.map(|value| value.to_rfc3339()))
        .bind(record.revoked_reason.as_deref())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::Duplicate {
                entity: "verification code",
                id: record.code.as_str().to_owned(),
            });
        }
        Ok(())
    }

    async fn find(
        &self,
        code: &VerificationCode,
    ) -> Result<Option<VerificationRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT
                code,
                document_kind,
                document_ref,
                subject_name,
                issued_by,
                status,
                issued_at,
                expires_at,
                revoked_at,
                revoked_reason
             FROM verification_record
             WHERE code = ?",
        )
        .bind(code.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(record_from_row).transpose()
    }

    async fn save(&self, record: &VerificationRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE verification_record SET
                status = ?,
                expires_at = ?,
                revoked_at = ?,
                revoked_reason = ?
             WHERE code = ?",
        )
        .bind(record.status.as_str())
        .bind(record.expires_at.map(|value| value.to_rfc3339()))
        .bind(record.revoked_at.map(|value| value.to_rfc3339()))
        .bind(record.revoked_reason.as_deref())
        .bind(record.code.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn record_from_row(row: SqliteRow) -> Result<VerificationRecord, RepositoryError> {
    let status_raw = row.try_get::<String, _>("status")?;
    let status = VerificationStatus::parse(&status_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown verification status `{status_raw}`"))
    })?;

    Ok(VerificationRecord {
        code: VerificationCode(row.try_get("code")?),
        document_kind: row.try_get("document_kind")?,
        document_ref: row.try_get("document_ref")?,
        subject_name: row.try_get("subject_name")?,
        issued_by: row.try_get("issued_by")?,
        status,
        issued_at: parse_timestamp("issued_at", row.try_get("issued_at")?)?,
        expires_at: parse_optional_timestamp("expires_at", row.try_get("expires_at")?)?,
        revoked_at: parse_optional_timestamp("revoked_at", row.try_get("revoked_at")?)?,
        revoked_reason: row.try_get("revoked_reason")?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use kahawa_core::domain::verification::{
        VerificationCode, VerificationOutcome, VerificationRecord,
    };

    use super::SqlVerificationRepository;
    use crate::migrations;
    use crate::repositories::{RepositoryError, VerificationRepository};
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn issued_codes_can_be_looked_up_case_insensitively() {
        let pool = setup_pool().await;
        let repo = SqlVerificationRepository::new(pool.clone());
        let now = Utc::now();
        let record = VerificationRecord::issue(
            "employee_id",
            "EMP-0007",
            "Amina Nakato",
            "hr@kahawa.test",
            Some(365),
            now,
        )
        .expect("issue");

        repo.insert(&record).await.expect("insert");

        let typed = VerificationCode::normalize(&record.code.as_str().to_ascii_lowercase());
        let found = repo.find(&typed).await.expect("find").expect("present");
        assert_eq!(found, record);
        assert_eq!(found.resolve(now), VerificationOutcome::Valid);
        assert_eq!(found.resolve(now + Duration::days(400)), VerificationOutcome::Expired);

        let duplicate = repo.insert(&record).await.expect_err("duplicate code");
        assert!(matches!(duplicate, RepositoryError::Duplicate { .. }));

        pool.close().await;
    }

    #[tokio::test]
    async fn revocation_is_persisted() {
        let pool = setup_pool().await;
        let repo = SqlVerificationRepository::new(pool.clone());
        let now = Utc::now();
        let mut record = VerificationRecord::issue(
            "payment_voucher",
            "REQ-0A1B2C3D4E5F",
            "Cherry purchase advance",
            "carol@kahawa.test",
            None,
            now,
        )
        .expect("issue");
        repo.insert(&record).await.expect("insert");

        record.revoke("voucher reissued", now).expect("revoke");
        repo.save(&record).await.expect("save");

        let found = repo.find(&record.code).await.expect("find").expect("present");
        assert_eq!(found.resolve(now), VerificationOutcome::Revoked);
        assert_eq!(found.revoked_reason.as_deref(), Some("voucher reissued"));
        assert_eq!(
            repo.find(&VerificationCode::normalize("NOPE")).await.expect("missing"),
            None
        );

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }
}

use std::collections::BTreeMap;

use sqlx::{sqlite::SqliteRow, Row};

use kahawa_core::audit::{AuditCategory, AuditEvent, AuditOutcome};
use kahawa_core::domain::request::RequestId;

use super::{encode_json, parse_json, parse_timestamp, AuditRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAuditRepository {
    pool: DbPool,
}

impl SqlAuditRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AuditRepository for SqlAuditRepository {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError> {
        let metadata = encode_json("metadata_json", &event.metadata)?;

        sqlx::query(
            "INSERT INTO audit_event (
                id,
                request_id,
                correlation_id,
                event_type,
                category,
                actor,
                outcome,
                metadata_json,
                occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&event.event_id)
        .bind(event.request_id.as_ref().map(RequestId::as_str))
        .bind(&event.correlation_id)
        .bind(&event.event_type)
        .bind(event.category.as_str())
        .bind(&event.actor)
        .bind(event.outcome.as_str())
        .bind(metadata)
        .bind(event.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AuditEvent>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT
                id,
                request_id,
                correlation_id,
                event_type,
                category,
                actor,
                outcome,
                metadata_json,
                occurred_at
             FROM audit_event
             WHERE request_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(request_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(event_from_row).collect()
    }
}

fn event_from_row(row: SqliteRow) -> Result<AuditEvent, RepositoryError> {
    let category_raw = row.try_get::<String, _>("category")?;
    let category = AuditCategory::parse(&category_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit category `{category_raw}`")))?;
    let outcome_raw = row.try_get::<String, _>("outcome")?;
    let outcome = AuditOutcome::parse(&outcome_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown audit outcome `{outcome_raw}`")))?;
    let metadata_raw = row.try_get::<String, _>("metadata_json")?;
    let metadata: BTreeMap<String, String> = parse_json("metadata_json", &metadata_raw)?;

    Ok(AuditEvent {
        event_id: row.try_get("id")?,
        request_id: row.try_get::<Option<String>, _>("request_id")?.map(RequestId),
        correlation_id: row.try_get("correlation_id")?,
        event_type: row.try_get("event_type")?,
        category,
        actor: row.try_get("actor")?,
        outcome,
        metadata,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use kahawa_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome};
    use kahawa_core::domain::request::RequestId;

    use super::SqlAuditRepository;
    use crate::migrations;
    use crate::repositories::AuditRepository;
    use crate::{connect_with_settings, DbPool};

    #[tokio::test]
    async fn audit_trail_is_listed_per_request_in_order() {
        let pool = setup_pool().await;
        let repo = SqlAuditRepository::new(pool.clone());
        let request_id = RequestId("REQ-AUDIT00001".to_owned());
        let context = AuditContext::new(Some(request_id.clone()), "corr-1", "brian@kahawa.test");

        let submitted = AuditEvent::from_context(
            &context,
            "request.submitted",
            AuditCategory::Ingress,
            AuditOutcome::Success,
        );
        let approved = AuditEvent::from_context(
            &context,
            "workflow.transition_applied",
            AuditCategory::Workflow,
            AuditOutcome::Success,
        )
        .with_metadata("from", "pending")
        .with_metadata("to", "finance_approved");
        let unrelated = AuditEvent::new(
            None,
            "corr-2",
            "server.started",
            AuditCategory::System,
            "system",
            AuditOutcome::Success,
        );

        for event in [&submitted, &approved, &unrelated] {
            repo.append(event).await.expect("append");
        }

        let trail = repo.list_for_request(&request_id).await.expect("list");
        assert_eq!(trail, vec![submitted, approved]);

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }
}

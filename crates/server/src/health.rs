use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use kahawa_db::repositories::SqlOutboxRepository;
use kahawa_db::DbPool;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    sms_enabled: bool,
}

impl HealthState {
    pub fn new(db_pool: DbPool, sms_enabled: bool) -> Self {
        Self { db_pool, sms_enabled }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub sms: HealthCheck,
    /// Queued plus retryable SMS jobs; `None` when the database is unreachable.
    pub outbox_backlog: Option<i64>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";
    let outbox_backlog = if ready { outbox_backlog(&state.db_pool).await } else { None };

    let sms = if state.sms_enabled {
        HealthCheck { status: "ready", detail: "sms provider configured".to_string() }
    } else {
        HealthCheck { status: "disabled", detail: "sms delivery switched off".to_string() }
    };

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "kahawa-server runtime initialized".to_string(),
        },
        database,
        sms,
        outbox_backlog,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

async fn outbox_backlog(pool: &DbPool) -> Option<i64> {
    SqlOutboxRepository::new(pool.clone()).backlog().await.ok()
}

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use kahawa_core::audit::AuditSink;
use kahawa_core::config::{AppConfig, ConfigError, LoadOptions};
use kahawa_db::repositories::{
    SqlArchiveRepository, SqlAuditRepository, SqlEmployeeRepository, SqlOutboxRepository,
    SqlRequestRepository, SqlVerificationRepository,
};
use kahawa_db::{connect_with_config, migrations, DbPool};
use kahawa_notify::{gateway_from_config, SmsError};
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audit_log::{spawn_audit_writer, ChannelAuditSink};
use crate::dispatcher::NotificationDispatcher;
use crate::health::{self, HealthState};
use crate::verification::{self, VerificationState};
use crate::workflow::{NotificationSettings, WorkflowRepositories, WorkflowService};
use crate::{employees, requests};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub workflow: Arc<WorkflowService>,
    pub dispatcher: Arc<NotificationDispatcher>,
    audit: ChannelAuditSink,
    audit_writer: JoinHandle<()>,
    repositories: WorkflowRepositories,
    verifications: Arc<SqlVerificationRepository>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("sms gateway setup failed: {0}")]
    Sms(#[source] SmsError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let gateway = gateway_from_config(&config.sms).map_err(BootstrapError::Sms)?;
    info!(
        event_name = "system.bootstrap.sms_gateway",
        correlation_id = "bootstrap",
        transport_mode = if config.sms.enabled { "provider" } else { "noop" },
        "sms gateway initialized"
    );

    let (audit, audit_writer) = spawn_audit_writer(Arc::new(SqlAuditRepository::new(db_pool.clone())));
    let audit_sink: Arc<dyn AuditSink> = Arc::new(audit.clone());

    let request_repository = Arc::new(SqlRequestRepository::new(db_pool.clone()));
    let outbox = Arc::new(SqlOutboxRepository::new(db_pool.clone()));
    let repositories = WorkflowRepositories {
        requests: request_repository,
        employees: Arc::new(SqlEmployeeRepository::new(db_pool.clone())),
        archive: Arc::new(SqlArchiveRepository::new(db_pool.clone())),
        outbox: outbox.clone(),
    };

    let workflow = Arc::new(WorkflowService::new(
        repositories.clone(),
        audit_sink.clone(),
        NotificationSettings {
            country_code: config.sms.country_code.clone(),
            max_attempts: config.sms.max_attempts,
        },
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        outbox,
        gateway,
        config.sms.retry_policy(),
        audit_sink,
    ));

    Ok(Application {
        verifications: Arc::new(SqlVerificationRepository::new(db_pool.clone())),
        config,
        db_pool,
        workflow,
        dispatcher,
        audit,
        audit_writer,
        repositories,
    })
}

impl Application {
    pub fn router(&self) -> Router {
        let audit: Arc<dyn AuditSink> = Arc::new(self.audit.clone());

        Router::new()
            .merge(health::router(HealthState::new(self.db_pool.clone(), self.config.sms.enabled)))
            .merge(requests::router(self.workflow.clone()))
            .merge(employees::router(self.repositories.employees.clone(), audit.clone()))
            .merge(verification::router(VerificationState::new(
                self.verifications.clone(),
                self.repositories.employees.clone(),
                audit,
                self.config.verification.clone(),
            )))
    }

    /// Drops every audit sink held here, waits for queued audit rows to be
    /// written, then closes the pool.
    pub async fn shutdown(self, grace: Duration) {
        let Self { db_pool, audit_writer, audit, workflow, dispatcher, .. } = self;
        drop(audit);
        drop(workflow);
        drop(dispatcher);

        if tokio::time::timeout(grace, audit_writer).await.is_err() {
            warn!(
                event_name = "system.shutdown.audit_writer_timeout",
                correlation_id = "shutdown",
                "audit writer did not drain before the grace period ended"
            );
        }
        db_pool.close().await;
    }
}

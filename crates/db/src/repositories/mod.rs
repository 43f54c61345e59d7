use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use kahawa_core::audit::AuditEvent;
use kahawa_core::domain::archive::ArchivedRequest;
use kahawa_core::domain::employee::{Employee, EmployeeId};
use kahawa_core::domain::notification::NotificationJob;
use kahawa_core::domain::request::{FundsRequest, RequestFilter, RequestId};
use kahawa_core::domain::verification::{VerificationCode, VerificationRecord};

pub mod archive;
pub mod audit;
pub mod employee;
pub mod memory;
pub mod outbox;
pub mod request;
pub mod verification;

pub use archive::SqlArchiveRepository;
pub use audit::SqlAuditRepository;
pub use employee::SqlEmployeeRepository;
pub use memory::{
    InMemoryArchiveRepository, InMemoryAuditRepository, InMemoryEmployeeRepository,
    InMemoryOutboxRepository, InMemoryRequestRepository, InMemoryVerificationRepository,
};
pub use outbox::SqlOutboxRepository;
pub use request::SqlRequestRepository;
pub use verification::SqlVerificationRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{entity} `{id}` was modified concurrently (expected version {expected_version})")]
    Conflict { entity: &'static str, id: String, expected_version: u32 },
    #[error("{entity} `{id}` already exists")]
    Duplicate { entity: &'static str, id: String },
}

#[async_trait]
pub trait RequestRepository: Send + Sync {
    async fn insert(&self, request: &FundsRequest) -> Result<(), RepositoryError>;
    async fn find_by_id(&self, id: &RequestId) -> Result<Option<FundsRequest>, RepositoryError>;
    async fn list(&self, filter: &RequestFilter) -> Result<Vec<FundsRequest>, RepositoryError>;
    /// Writes `request` if the stored version still equals `request.version`,
    /// returning the row with its bumped version.
    async fn update(&self, request: FundsRequest) -> Result<FundsRequest, RepositoryError>;
    async fn delete(&self, id: &RequestId) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait EmployeeRepository: Send + Sync {
    async fn find_by_id(&self, id: &EmployeeId) -> Result<Option<Employee>, RepositoryError>;
    async fn find_by_identity(&self, identity: &str) -> Result<Option<Employee>, RepositoryError>;
    async fn list(&self) -> Result<Vec<Employee>, RepositoryError>;
    async fn save(&self, employee: Employee) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait ArchiveRepository: Send + Sync {
    /// Stores the snapshot and, when `remove_original` is set, deletes the
    /// live request in the same transaction.
    async fn archive(
        &self,
        archived: &ArchivedRequest,
        remove_original: bool,
    ) -> Result<(), RepositoryError>;
    async fn find(&self, request_id: &RequestId)
        -> Result<Option<ArchivedRequest>, RepositoryError>;
    async fn list(&self) -> Result<Vec<ArchivedRequest>, RepositoryError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    async fn enqueue(&self, jobs: &[NotificationJob]) -> Result<(), RepositoryError>;
    /// Queued or retryable jobs whose `available_at` has passed, oldest first.
    async fn due(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<NotificationJob>, RepositoryError>;
    async fn save(&self, job: &NotificationJob) -> Result<(), RepositoryError>;
    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<NotificationJob>, RepositoryError>;
}

#[async_trait]
pub trait VerificationRepository: Send + Sync {
    async fn insert(&self, record: &VerificationRecord) -> Result<(), RepositoryError>;
    async fn find(
        &self,
        code: &VerificationCode,
    ) -> Result<Option<VerificationRecord>, RepositoryError>;
    async fn save(&self, record: &VerificationRecord) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RepositoryError>;
    async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<AuditEvent>, RepositoryError>;
}

pub(crate) fn parse_u32(column: &str, value: i64) -> Result<u32, RepositoryError> {
    u32::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!(
            "invalid value for `{column}` (expected non-negative u32): {value}"
        ))
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

pub(crate) fn parse_optional_timestamp(
    column: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    value.map(|timestamp| parse_timestamp(column, timestamp)).transpose()
}

pub(crate) fn parse_decimal(column: &str, value: String) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value.trim()).map_err(|error| {
        RepositoryError::Decode(format!("invalid decimal in `{column}`: `{value}` ({error})"))
    })
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    column: &str,
    value: &str,
) -> Result<T, RepositoryError> {
    serde_json::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid json in `{column}`: {error}")))
}

pub(crate) fn encode_json<T: serde::Serialize>(
    column: &str,
    value: &T,
) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|error| RepositoryError::Decode(format!("could not encode `{column}`: {error}")))
}

use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use kahawa_core::approvals::EligibilityFailure;
use kahawa_core::errors::ApplicationError;
use serde::Serialize;
use tracing::{error, warn};
use uuid::Uuid;

use crate::workflow::WorkflowError;

pub const CORRELATION_HEADER: &str = "x-correlation-id";

#[derive(Debug, Serialize)]
pub struct ApiErrorBody {
    pub error: String,
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<EligibilityFailure>,
}

pub type ApiError = (StatusCode, Json<ApiErrorBody>);

/// Caller-supplied correlation id, or a fresh one.
pub fn correlation_id(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

pub fn api_error(status: StatusCode, message: impl Into<String>, correlation_id: &str) -> ApiError {
    (
        status,
        Json(ApiErrorBody {
            error: message.into(),
            correlation_id: correlation_id.to_owned(),
            reason: None,
            failure: None,
        }),
    )
}

pub fn workflow_error(error: WorkflowError, correlation_id: &str) -> ApiError {
    match error {
        WorkflowError::Denied(decision) => (
            StatusCode::FORBIDDEN,
            Json(ApiErrorBody {
                error: "approval denied".to_owned(),
                correlation_id: correlation_id.to_owned(),
                reason: Some(decision.reason),
                failure: decision.failure,
            }),
        ),
        WorkflowError::NotFound(_) => api_error(StatusCode::NOT_FOUND, error.to_string(), correlation_id),
        WorkflowError::Validation(_) => {
            api_error(StatusCode::BAD_REQUEST, error.to_string(), correlation_id)
        }
        WorkflowError::Forbidden { .. } => {
            api_error(StatusCode::FORBIDDEN, error.to_string(), correlation_id)
        }
        WorkflowError::Conflict(_) | WorkflowError::Transition(_) => {
            api_error(StatusCode::CONFLICT, error.to_string(), correlation_id)
        }
        WorkflowError::Repository(repository) => {
            error!(
                event_name = "api.repository_failure",
                correlation_id,
                error = %repository,
                "request failed on storage"
            );
            let interface = ApplicationError::Persistence(repository.to_string())
                .into_interface(correlation_id);
            api_error(StatusCode::SERVICE_UNAVAILABLE, interface.user_message(), correlation_id)
        }
    }
}

/// List views degrade to an empty list when storage is unavailable; every
/// other error still maps through [`workflow_error`].
pub fn list_or_empty<T>(
    result: Result<Vec<T>, WorkflowError>,
    view: &'static str,
    correlation_id: &str,
) -> Result<Vec<T>, ApiError> {
    match result {
        Ok(items) => Ok(items),
        Err(WorkflowError::Repository(repository)) => {
            warn!(
                event_name = "api.list_degraded",
                correlation_id,
                view,
                error = %repository,
                "storage unavailable; returning an empty list"
            );
            Ok(Vec::new())
        }
        Err(other) => Err(workflow_error(other, correlation_id)),
    }
}

//! Document verification codes.
//!
//! Printed documents (payslips, approval letters) carry a short code and a
//! QR image that points at the public `GET /verify/{code}` lookup.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use kahawa_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use kahawa_core::config::VerificationConfig;
use kahawa_core::domain::employee::normalize_identity;
use kahawa_core::domain::verification::{VerificationCode, VerificationOutcome, VerificationRecord};
use kahawa_db::repositories::{EmployeeRepository, VerificationRepository};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{api_error, correlation_id, workflow_error, ApiError};
use crate::workflow::WorkflowError;

const QR_IMAGE_SIZE: &str = "240x240";

#[derive(Clone)]
pub struct VerificationState {
    records: Arc<dyn VerificationRepository>,
    employees: Arc<dyn EmployeeRepository>,
    audit: Arc<dyn AuditSink>,
    config: VerificationConfig,
}

impl VerificationState {
    pub fn new(
        records: Arc<dyn VerificationRepository>,
        employees: Arc<dyn EmployeeRepository>,
        audit: Arc<dyn AuditSink>,
        config: VerificationConfig,
    ) -> Self {
        Self { records, employees, audit, config }
    }
}

#[derive(Debug, Deserialize)]
pub struct IssueBody {
    pub actor: String,
    pub document_kind: String,
    pub document_ref: String,
    pub subject_name: String,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct RevokeBody {
    pub actor: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct QrLinks {
    pub verify_url: String,
    pub qr_image_url: String,
}

#[derive(Debug, Serialize)]
pub struct IssuedCode {
    #[serde(flatten)]
    pub record: VerificationRecord,
    #[serde(flatten)]
    pub links: QrLinks,
}

#[derive(Debug, Serialize)]
pub struct LookupResult {
    pub code: String,
    pub outcome: VerificationOutcome,
    pub document_kind: String,
    pub document_ref: String,
    pub subject_name: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

pub fn router(state: VerificationState) -> Router {
    Router::new()
        .route("/api/v1/verifications", post(issue_code))
        .route("/api/v1/verifications/{code}/revoke", post(revoke_code))
        .route("/api/v1/verifications/{code}/qr", get(qr_for_code))
        .route("/verify/{code}", get(lookup_code))
        .with_state(state)
}

/// Lookup and QR image URLs for `code`. Fails only on a malformed base URL.
pub fn qr_links(config: &VerificationConfig, code: &VerificationCode) -> Result<QrLinks, String> {
    let base = config.public_base_url.trim_end_matches('/');
    let verify_url = Url::parse(&format!("{base}/verify/{}", code.as_str()))
        .map_err(|error| format!("invalid verification.public_base_url `{base}`: {error}"))?;
    let qr_image_url = Url::parse_with_params(
        &config.qr_service_url,
        &[("size", QR_IMAGE_SIZE), ("data", verify_url.as_str())],
    )
    .map_err(|error| {
        format!("invalid verification.qr_service_url `{}`: {error}", config.qr_service_url)
    })?;

    Ok(QrLinks { verify_url: verify_url.to_string(), qr_image_url: qr_image_url.to_string() })
}

async fn require_permission(
    state: &VerificationState,
    actor: &str,
    permission: &'static str,
    correlation_id: &str,
) -> Result<String, ApiError> {
    let actor = normalize_identity(actor);
    let employee = state
        .employees
        .find_by_identity(&actor)
        .await
        .map_err(|error| workflow_error(WorkflowError::from(error), correlation_id))?;
    if employee.is_some_and(|employee| employee.is_active() && employee.can(permission)) {
        Ok(actor)
    } else {
        Err(api_error(
            StatusCode::FORBIDDEN,
            format!("`{actor}` lacks the `{permission}` permission"),
            correlation_id,
        ))
    }
}

async fn find_record(
    state: &VerificationState,
    code: &VerificationCode,
    correlation_id: &str,
) -> Result<VerificationRecord, ApiError> {
    state
        .records
        .find(code)
        .await
        .map_err(|error| workflow_error(WorkflowError::from(error), correlation_id))?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("verification code `{}` is unknown", code.as_str()),
                correlation_id,
            )
        })
}

async fn issue_code(
    State(state): State<VerificationState>,
    headers: HeaderMap,
    Json(body): Json<IssueBody>,
) -> Result<(StatusCode, Json<IssuedCode>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let actor = require_permission(&state, &body.actor, "verification:issue", &correlation_id).await?;

    let record = VerificationRecord::issue(
        &body.document_kind,
        &body.document_ref,
        &body.subject_name,
        &actor,
        body.expires_in_days,
        Utc::now(),
    )
    .map_err(|error| api_error(StatusCode::BAD_REQUEST, error.to_string(), &correlation_id))?;
    let links = qr_links(&state.config, &record.code)
        .map_err(|error| api_error(StatusCode::INTERNAL_SERVER_ERROR, error, &correlation_id))?;

    state
        .records
        .insert(&record)
        .await
        .map_err(|error| workflow_error(WorkflowError::from(error), &correlation_id))?;

    state.audit.emit(
        AuditEvent::new(
            None,
            correlation_id.clone(),
            "verification.issued",
            AuditCategory::Verification,
            actor.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("code", record.code.as_str())
        .with_metadata("document_ref", record.document_ref.clone()),
    );
    info!(
        event_name = "verification.issued",
        correlation_id = %correlation_id,
        code = record.code.as_str(),
        document_kind = %record.document_kind,
        actor = %actor,
        "verification code issued"
    );

    Ok((StatusCode::CREATED, Json(IssuedCode { record, links })))
}

async fn lookup_code(
    State(state): State<VerificationState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<LookupResult>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let code = VerificationCode::normalize(&code);
    let record = find_record(&state, &code, &correlation_id).await?;
    let outcome = record.resolve(Utc::now());

    info!(
        event_name = "verification.looked_up",
        correlation_id = %correlation_id,
        code = code.as_str(),
        outcome = outcome.as_str(),
        "verification lookup"
    );

    Ok(Json(LookupResult {
        code: record.code.0,
        outcome,
        document_kind: record.document_kind,
        document_ref: record.document_ref,
        subject_name: record.subject_name,
        issued_at: record.issued_at,
        expires_at: record.expires_at,
        revoked_reason: record.revoked_reason,
    }))
}

async fn revoke_code(
    State(state): State<VerificationState>,
    headers: HeaderMap,
    Path(code): Path<String>,
    Json(body): Json<RevokeBody>,
) -> Result<Json<VerificationRecord>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let actor =
        require_permission(&state, &body.actor, "verification:revoke", &correlation_id).await?;
    let code = VerificationCode::normalize(&code);
    let mut record = find_record(&state, &code, &correlation_id).await?;

    record
        .revoke(&body.reason, Utc::now())
        .map_err(|error| api_error(StatusCode::CONFLICT, error.to_string(), &correlation_id))?;
    state
        .records
        .save(&record)
        .await
        .map_err(|error| workflow_error(WorkflowError::from(error), &correlation_id))?;

    state.audit.emit(
        AuditEvent::new(
            None,
            correlation_id.clone(),
            "verification.revoked",
            AuditCategory::Verification,
            actor,
            AuditOutcome::Success,
        )
        .with_metadata("code", record.code.as_str())
        .with_metadata("reason", record.revoked_reason.clone().unwrap_or_default()),
    );

    Ok(Json(record))
}

async fn qr_for_code(
    State(state): State<VerificationState>,
    headers: HeaderMap,
    Path(code): Path<String>,
) -> Result<Json<QrLinks>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let code = VerificationCode::normalize(&code);
    let record = find_record(&state, &code, &correlation_id).await?;
    qr_links(&state.config, &record.code)
        .map(Json)
        .map_err(|error| api_error(StatusCode::INTERNAL_SERVER_ERROR, error, &correlation_id))
}

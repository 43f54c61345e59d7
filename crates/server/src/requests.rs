//! Funds request endpoints.
//!
//! - `POST /api/v1/requests`                      submit a request
//! - `GET  /api/v1/requests`                      list, filtered by state/department/requester
//! - `GET  /api/v1/requests/{id}`                 fetch one request
//! - `GET  /api/v1/requests/{id}/eligibility`     can `actor` sign `stage`?
//! - `POST /api/v1/requests/{id}/approve`         sign a stage
//! - `POST /api/v1/requests/{id}/reject`          reject with a reason
//! - `POST /api/v1/requests/{id}/archive`         archive a closed request

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use kahawa_core::approvals::EligibilityDecision;
use kahawa_core::domain::archive::ArchivedRequest;
use kahawa_core::domain::request::{FundsRequest, NewRequest, RequestFilter, RequestId};
use kahawa_core::flows::{ApprovalStage, ApprovalState};
use serde::{Deserialize, Serialize};

use crate::api::{api_error, correlation_id, list_or_empty, workflow_error, ApiError};
use crate::workflow::WorkflowService;

#[derive(Clone)]
pub struct RequestsState {
    workflow: Arc<WorkflowService>,
}

#[derive(Debug, Serialize)]
pub struct RequestView {
    #[serde(flatten)]
    pub request: FundsRequest,
    pub status_label: &'static str,
    pub outstanding_stages: Vec<ApprovalStage>,
}

impl From<FundsRequest> for RequestView {
    fn from(request: FundsRequest) -> Self {
        Self {
            status_label: request.status_label(),
            outstanding_stages: request.state.outstanding_stages(),
            request,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub state: Option<String>,
    pub department: Option<String>,
    pub requester: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct EligibilityQuery {
    pub actor: String,
    pub stage: String,
}

#[derive(Debug, Deserialize)]
pub struct ApproveBody {
    pub actor: String,
    pub stage: String,
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub actor: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ArchiveBody {
    pub actor: String,
    #[serde(default)]
    pub remove_original: bool,
}

pub fn router(workflow: Arc<WorkflowService>) -> Router {
    Router::new()
        .route("/api/v1/requests", post(submit_request).get(list_requests))
        .route("/api/v1/requests/{id}", get(get_request))
        .route("/api/v1/requests/{id}/eligibility", get(check_eligibility))
        .route("/api/v1/requests/{id}/approve", post(approve_request))
        .route("/api/v1/requests/{id}/reject", post(reject_request))
        .route("/api/v1/requests/{id}/archive", post(archive_request))
        .with_state(RequestsState { workflow })
}

fn parse_stage(raw: &str, correlation_id: &str) -> Result<ApprovalStage, ApiError> {
    ApprovalStage::parse(raw).ok_or_else(|| {
        api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown stage `{raw}`; expected `finance` or `admin`"),
            correlation_id,
        )
    })
}

async fn submit_request(
    State(state): State<RequestsState>,
    headers: HeaderMap,
    Json(body): Json<NewRequest>,
) -> Result<(StatusCode, Json<RequestView>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let request = state
        .workflow
        .submit_request(body, &correlation_id)
        .await
        .map_err(|error| workflow_error(error, &correlation_id))?;
    Ok((StatusCode::CREATED, Json(request.into())))
}

async fn list_requests(
    State(state): State<RequestsState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<RequestView>>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let state_filter = match query.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(ApprovalState::parse(raw).ok_or_else(|| {
            api_error(StatusCode::BAD_REQUEST, format!("unknown state `{raw}`"), &correlation_id)
        })?),
        None => None,
    };

    let filter = RequestFilter {
        state: state_filter,
        department: query.department,
        requester: query.requester,
        limit: query.limit,
    };
    let requests =
        list_or_empty(state.workflow.list_requests(&filter).await, "requests", &correlation_id)?;
    Ok(Json(requests.into_iter().map(RequestView::from).collect()))
}

async fn get_request(
    State(state): State<RequestsState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<RequestView>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let request = state
        .workflow
        .get_request(&RequestId(id))
        .await
        .map_err(|error| workflow_error(error, &correlation_id))?;
    Ok(Json(request.into()))
}

async fn check_eligibility(
    State(state): State<RequestsState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<EligibilityQuery>,
) -> Result<Json<EligibilityDecision>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let stage = parse_stage(&query.stage, &correlation_id)?;
    Ok(Json(state.workflow.check_eligibility(&RequestId(id), &query.actor, stage).await))
}

async fn approve_request(
    State(state): State<RequestsState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ApproveBody>,
) -> Result<Json<RequestView>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let stage = parse_stage(&body.stage, &correlation_id)?;
    let request = state
        .workflow
        .approve_stage(&RequestId(id), stage, &body.actor, &correlation_id)
        .await
        .map_err(|error| workflow_error(error, &correlation_id))?;
    Ok(Json(request.into()))
}

async fn reject_request(
    State(state): State<RequestsState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<RejectBody>,
) -> Result<Json<RequestView>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let request = state
        .workflow
        .reject_request(&RequestId(id), &body.actor, &body.reason, &correlation_id)
        .await
        .map_err(|error| workflow_error(error, &correlation_id))?;
    Ok(Json(request.into()))
}

async fn archive_request(
    State(state): State<RequestsState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(body): Json<ArchiveBody>,
) -> Result<Json<ArchivedRequest>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let archived = state
        .workflow
        .archive_request(&RequestId(id), &body.actor, body.remove_original, &correlation_id)
        .await
        .map_err(|error| workflow_error(error, &correlation_id))?;
    Ok(Json(archived))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::router;
    use crate::workflow::tests::{harness, ADMIN, FINANCE, REQUESTER};

    async fn call(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header("x-correlation-id", "test-corr")
            .body(match body {
                Some(body) => Body::from(body.to_string()),
                None => Body::empty(),
            })
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn submission() -> Value {
        json!({
            "kind": "money",
            "title": "Cherry purchase advance",
            "amount": "500000",
            "requester": REQUESTER,
            "requester_name": "Amina Nakato",
            "department": "Procurement"
        })
    }

    #[tokio::test]
    async fn worked_example_over_http() {
        let h = harness().await;
        let app = router(h.service.clone());

        let (status, created) = call(&app, "POST", "/api/v1/requests", Some(submission())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status_label"], "Pending");
        let id = created["id"].as_str().expect("id").to_owned();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some(json!({ "actor": FINANCE, "stage": "finance" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status_label"], "Finance Approved - Awaiting Admin");

        let (status, body) = call(
            &app,
            "GET",
            &format!("/api/v1/requests/{id}/eligibility?actor={FINANCE}&stage=admin"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["can_approve"], false);

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some(json!({ "actor": FINANCE, "stage": "admin" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["reason"].as_str().expect("reason").contains("already approved at a previous stage"));
        assert_eq!(body["failure"]["kind"], "already_approved_at_previous_stage");
        assert_eq!(body["correlation_id"], "test-corr");

        let (status, body) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some(json!({ "actor": ADMIN, "stage": "admin" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status_label"], "Fully Approved");
        assert_eq!(body["outstanding_stages"], json!([]));
    }

    #[tokio::test]
    async fn error_statuses_follow_the_failure() {
        let h = harness().await;
        let app = router(h.service.clone());

        let (status, _) = call(&app, "GET", "/api/v1/requests/REQ-MISSING", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let mut invalid = submission();
        invalid["amount"] = json!("0");
        let (status, body) = call(&app, "POST", "/api/v1/requests", Some(invalid)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().expect("error").contains("amount"));

        let (_, created) = call(&app, "POST", "/api/v1/requests", Some(submission())).await;
        let id = created["id"].as_str().expect("id").to_owned();

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{id}/approve"),
            Some(json!({ "actor": ADMIN, "stage": "treasury" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{id}/reject"),
            Some(json!({ "actor": ADMIN, "reason": "Over budget" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        // A second rejection hits the state machine.
        let (status, _) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{id}/reject"),
            Some(json!({ "actor": ADMIN, "reason": "Again" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, archived) = call(
            &app,
            "POST",
            &format!("/api/v1/requests/{id}/archive"),
            Some(json!({ "actor": ADMIN, "remove_original": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(archived["final_status"], "rejected");
    }

    #[tokio::test]
    async fn listing_filters_by_state() {
        let h = harness().await;
        let app = router(h.service.clone());

        for _ in 0..2 {
            call(&app, "POST", "/api/v1/requests", Some(submission())).await;
        }

        let (status, pending) = call(&app, "GET", "/api/v1/requests?state=pending", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pending.as_array().map(Vec::len), Some(2));

        let (_, approved) = call(&app, "GET", "/api/v1/requests?state=fully_approved", None).await;
        assert_eq!(approved.as_array().map(Vec::len), Some(0));

        let (status, _) = call(&app, "GET", "/api/v1/requests?state=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

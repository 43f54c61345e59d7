use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use chrono::Utc;
use kahawa_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use kahawa_core::domain::employee::{normalize_identity, Employee, NewEmployee};
use kahawa_core::flows::ApprovalStage;
use kahawa_core::notify::select_stage_approvers;
use kahawa_db::repositories::EmployeeRepository;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{api_error, correlation_id, list_or_empty, workflow_error, ApiError};
use crate::workflow::WorkflowError;

#[derive(Clone)]
pub struct EmployeesState {
    employees: Arc<dyn EmployeeRepository>,
    audit: Arc<dyn AuditSink>,
}

#[derive(Debug, Serialize)]
pub struct EmployeeView {
    #[serde(flatten)]
    pub employee: Employee,
    pub effective_permissions: Vec<String>,
}

impl From<Employee> for EmployeeView {
    fn from(employee: Employee) -> Self {
        Self { effective_permissions: employee.effective_permissions(), employee }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateEmployeeBody {
    pub actor: String,
    #[serde(flatten)]
    pub employee: NewEmployee,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproversQuery {
    /// Leaves this identity out, as the workflow does for a request's author.
    pub requester: Option<String>,
}

pub fn router(employees: Arc<dyn EmployeeRepository>, audit: Arc<dyn AuditSink>) -> Router {
    Router::new()
        .route("/api/v1/employees", get(list_employees).post(create_employee))
        .route("/api/v1/employees/approvers/{stage}", get(list_approvers))
        .with_state(EmployeesState { employees, audit })
}

async fn list_employees(
    State(state): State<EmployeesState>,
    headers: HeaderMap,
) -> Result<Json<Vec<EmployeeView>>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let employees = list_or_empty(
        state.employees.list().await.map_err(WorkflowError::from),
        "employees",
        &correlation_id,
    )?;
    Ok(Json(employees.into_iter().map(EmployeeView::from).collect()))
}

async fn create_employee(
    State(state): State<EmployeesState>,
    headers: HeaderMap,
    Json(body): Json<CreateEmployeeBody>,
) -> Result<(StatusCode, Json<EmployeeView>), ApiError> {
    let correlation_id = correlation_id(&headers);
    let actor = normalize_identity(&body.actor);

    let manager = state
        .employees
        .find_by_identity(&actor)
        .await
        .map_err(|error| workflow_error(WorkflowError::from(error), &correlation_id))?;
    if !manager.is_some_and(|manager| manager.is_active() && manager.can("employees:manage")) {
        return Err(api_error(
            StatusCode::FORBIDDEN,
            format!("`{actor}` is not allowed to manage employees"),
            &correlation_id,
        ));
    }

    let employee = body
        .employee
        .into_employee(Utc::now())
        .map_err(|error| api_error(StatusCode::BAD_REQUEST, error.to_string(), &correlation_id))?;
    state
        .employees
        .save(employee.clone())
        .await
        .map_err(|error| workflow_error(WorkflowError::from(error), &correlation_id))?;

    state.audit.emit(
        AuditEvent::new(
            None,
            correlation_id.clone(),
            "employee.created",
            AuditCategory::Ingress,
            actor.clone(),
            AuditOutcome::Success,
        )
        .with_metadata("employee_id", employee.id.0.clone())
        .with_metadata("role", employee.role.clone()),
    );
    info!(
        event_name = "employees.created",
        correlation_id = %correlation_id,
        employee_id = %employee.id.0,
        role = %employee.role,
        actor = %actor,
        "employee created"
    );

    Ok((StatusCode::CREATED, Json(employee.into())))
}

async fn list_approvers(
    State(state): State<EmployeesState>,
    headers: HeaderMap,
    Path(stage): Path<String>,
    Query(query): Query<ApproversQuery>,
) -> Result<Json<Vec<EmployeeView>>, ApiError> {
    let correlation_id = correlation_id(&headers);
    let Some(stage) = ApprovalStage::parse(&stage) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("unknown stage `{stage}`"),
            &correlation_id,
        ));
    };

    let employees = list_or_empty(
        state.employees.list().await.map_err(WorkflowError::from),
        "approvers",
        &correlation_id,
    )?;
    let requester = query.requester.unwrap_or_default();
    let approvers = select_stage_approvers(&employees, stage, &requester)
        .into_iter()
        .cloned()
        .map(EmployeeView::from)
        .collect();
    Ok(Json(approvers))
}

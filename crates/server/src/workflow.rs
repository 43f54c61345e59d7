//! Request lifecycle: submission, stage approvals, rejection and archival.
//!
//! Every collaborator is injected through [`WorkflowRepositories`], so the
//! same service runs against SQLite in production and in-memory stores in
//! tests. Notifications are always best-effort: a failure to plan or enqueue
//! SMS jobs is logged and never undoes the state change that triggered it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kahawa_core::approvals::{evaluate_eligibility, EligibilityDecision};
use kahawa_core::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use kahawa_core::domain::archive::ArchivedRequest;
use kahawa_core::domain::employee::{normalize_identity, Employee};
use kahawa_core::domain::request::{FundsRequest, NewRequest, RequestFilter, RequestId};
use kahawa_core::errors::DomainError;
use kahawa_core::flows::{
    ApprovalEngine, ApprovalEvent, ApprovalStage, ApprovalState, FlowTransitionError,
    TwoStageApproval, WorkflowAction,
};
use kahawa_core::notify::{
    outcome_message, plan_notifications, select_stage_approvers, stage_message,
    submission_message, NotificationRecipient,
};
use kahawa_db::repositories::{
    ArchiveRepository, EmployeeRepository, OutboxRepository, RepositoryError, RequestRepository,
};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

const CHANGE_FEED_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct WorkflowRepositories {
    pub requests: Arc<dyn RequestRepository>,
    pub employees: Arc<dyn EmployeeRepository>,
    pub archive: Arc<dyn ArchiveRepository>,
    pub outbox: Arc<dyn OutboxRepository>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationSettings {
    pub country_code: String,
    pub max_attempts: u32,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { country_code: kahawa_core::notify::DEFAULT_COUNTRY_CODE.to_owned(), max_attempts: 5 }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum RequestChange {
    Submitted { request_id: RequestId },
    StageApproved { request_id: RequestId, stage: ApprovalStage, state: ApprovalState },
    Rejected { request_id: RequestId },
    Archived { request_id: RequestId, removed_original: bool },
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("request `{0}` was not found")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("approval denied: {}", .0.reason)]
    Denied(EligibilityDecision),
    #[error("`{actor}` is not allowed to {action}")]
    Forbidden { actor: String, action: &'static str },
    #[error("request `{0}` changed while this action was in progress; reload and retry")]
    Conflict(String),
    #[error(transparent)]
    Transition(#[from] FlowTransitionError),
    #[error("storage unavailable: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for WorkflowError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Conflict { id, .. } | RepositoryError::Duplicate { id, .. } => {
                Self::Conflict(id)
            }
            other => Self::Repository(other),
        }
    }
}

impl From<DomainError> for WorkflowError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::FlowTransition(error) => Self::Transition(error),
            other => Self::Validation(other.to_string()),
        }
    }
}

pub struct WorkflowService {
    repositories: WorkflowRepositories,
    audit: Arc<dyn AuditSink>,
    engine: ApprovalEngine<TwoStageApproval>,
    notifications: NotificationSettings,
    changes: broadcast::Sender<RequestChange>,
}

impl WorkflowService {
    pub fn new(
        repositories: WorkflowRepositories,
        audit: Arc<dyn AuditSink>,
        notifications: NotificationSettings,
    ) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            repositories,
            audit,
            engine: ApprovalEngine::default(),
            notifications,
            changes,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RequestChange> {
        self.changes.subscribe()
    }

    pub async fn submit_request(
        &self,
        input: NewRequest,
        correlation_id: &str,
    ) -> Result<FundsRequest, WorkflowError> {
        let now = Utc::now();
        let request = input.into_request(now)?;
        self.repositories.requests.insert(&request).await?;

        let context =
            AuditContext::new(Some(request.id.clone()), correlation_id, request.requester.clone());
        self.audit.emit(
            AuditEvent::from_context(
                &context,
                "request.submitted",
                AuditCategory::Ingress,
                AuditOutcome::Success,
            )
            .with_metadata("kind", request.kind.as_str())
            .with_metadata("amount", request.amount.to_string())
            .with_metadata("department", request.department.clone()),
        );
        info!(
            event_name = "workflow.request_submitted",
            correlation_id,
            request_id = %request.id,
            requester = %request.requester,
            "request submitted"
        );

        self.publish(RequestChange::Submitted { request_id: request.id.clone() });
        self.notify_stage_approvers(&request, ApprovalStage::Finance, None, &context, now).await;

        Ok(request)
    }

    /// Never errors: a request or employee that cannot be loaded is a denial.
    pub async fn check_eligibility(
        &self,
        request_id: &RequestId,
        actor: &str,
        stage: ApprovalStage,
    ) -> EligibilityDecision {
        let request = match self.repositories.requests.find_by_id(request_id).await {
            Ok(request) => request,
            Err(error) => {
                warn!(
                    event_name = "workflow.eligibility.request_lookup_failed",
                    request_id = %request_id,
                    error = %error,
                    "treating unreadable request as ineligible"
                );
                None
            }
        };
        let employee = self.find_employee(actor).await;

        evaluate_eligibility(request_id.as_str(), request.as_ref(), employee.as_ref(), actor, stage)
    }

    pub async fn approve_stage(
        &self,
        request_id: &RequestId,
        stage: ApprovalStage,
        actor: &str,
        correlation_id: &str,
    ) -> Result<FundsRequest, WorkflowError> {
        let actor = require_actor(actor)?;
        let mut request = self.load(request_id).await?;
        let employee = self.find_employee(&actor).await;
        let context = AuditContext::new(Some(request.id.clone()), correlation_id, actor.clone());

        let decision =
            evaluate_eligibility(request_id.as_str(), Some(&request), employee.as_ref(), &actor, stage);
        if !decision.can_approve {
            self.audit.emit(
                AuditEvent::from_context(
                    &context,
                    "approval.denied",
                    AuditCategory::Workflow,
                    AuditOutcome::Rejected,
                )
                .with_metadata("stage", stage.as_str())
                .with_metadata("reason", decision.reason.clone()),
            );
            warn!(
                event_name = "workflow.approval_denied",
                correlation_id,
                request_id = %request.id,
                actor = %actor,
                stage = stage.as_str(),
                reason = %decision.reason,
                "approval denied"
            );
            return Err(WorkflowError::Denied(decision));
        }

        let now = Utc::now();
        let outcome = self.engine.apply_with_audit(
            &request.state,
            &ApprovalEvent::StageApproved(stage),
            self.audit.as_ref(),
            &context,
        )?;
        request.record_signoff(stage, &actor, outcome.to, now);
        let saved = self.repositories.requests.update(request).await?;

        info!(
            event_name = "workflow.stage_approved",
            correlation_id,
            request_id = %saved.id,
            actor = %actor,
            stage = stage.as_str(),
            status = saved.status_label(),
            "stage approved"
        );
        self.publish(RequestChange::StageApproved {
            request_id: saved.id.clone(),
            stage,
            state: saved.state,
        });
        self.run_actions(&saved, &outcome.actions, Some(stage), &context, now).await;

        Ok(saved)
    }

    pub async fn reject_request(
        &self,
        request_id: &RequestId,
        actor: &str,
        reason: &str,
        correlation_id: &str,
    ) -> Result<FundsRequest, WorkflowError> {
        let actor = require_actor(actor)?;
        if reason.trim().is_empty() {
            return Err(WorkflowError::Validation("a rejection reason is required".to_owned()));
        }

        let mut request = self.load(request_id).await?;
        let employee = self.find_employee(&actor).await;
        let allowed = employee.as_ref().is_some_and(|employee| {
            employee.is_active()
                && (employee.can("requests:reject")
                    || ApprovalStage::ALL
                        .iter()
                        .any(|stage| employee.can(stage.required_permission())))
        });
        if !allowed {
            return Err(WorkflowError::Forbidden { actor, action: "reject requests" });
        }

        let context = AuditContext::new(Some(request.id.clone()), correlation_id, actor.clone());
        let now = Utc::now();
        let outcome = self.engine.apply_with_audit(
            &request.state,
            &ApprovalEvent::Rejected,
            self.audit.as_ref(),
            &context,
        )?;
        request.record_rejection(&actor, reason, now);
        let saved = self.repositories.requests.update(request).await?;

        info!(
            event_name = "workflow.request_rejected",
            correlation_id,
            request_id = %saved.id,
            actor = %actor,
            "request rejected"
        );
        self.publish(RequestChange::Rejected { request_id: saved.id.clone() });
        self.run_actions(&saved, &outcome.actions, None, &context, now).await;

        Ok(saved)
    }

    pub async fn archive_request(
        &self,
        request_id: &RequestId,
        actor: &str,
        remove_original: bool,
        correlation_id: &str,
    ) -> Result<ArchivedRequest, WorkflowError> {
        let actor = require_actor(actor)?;
        let request = self.load(request_id).await?;
        let allowed = self
            .find_employee(&actor)
            .await
            .is_some_and(|employee| employee.is_active() && employee.can("requests:archive"));
        if !allowed {
            return Err(WorkflowError::Forbidden { actor, action: "archive requests" });
        }

        let archived = ArchivedRequest::from_request(&request, &actor, Utc::now())?;
        self.repositories.archive.archive(&archived, remove_original).await?;

        let context = AuditContext::new(Some(request.id.clone()), correlation_id, actor.clone());
        self.audit.emit(
            AuditEvent::from_context(
                &context,
                "request.archived",
                AuditCategory::Persistence,
                AuditOutcome::Success,
            )
            .with_metadata("final_status", archived.final_status.as_str())
            .with_metadata("removed_original", remove_original.to_string()),
        );
        info!(
            event_name = "workflow.request_archived",
            correlation_id,
            request_id = %request.id,
            actor = %actor,
            removed_original = remove_original,
            "request archived"
        );
        self.publish(RequestChange::Archived {
            request_id: request.id.clone(),
            removed_original: remove_original,
        });

        Ok(archived)
    }

    pub async fn get_request(&self, request_id: &RequestId) -> Result<FundsRequest, WorkflowError> {
        self.load(request_id).await
    }

    pub async fn list_requests(
        &self,
        filter: &RequestFilter,
    ) -> Result<Vec<FundsRequest>, WorkflowError> {
        Ok(self.repositories.requests.list(filter).await?)
    }

    async fn load(&self, request_id: &RequestId) -> Result<FundsRequest, WorkflowError> {
        self.repositories
            .requests
            .find_by_id(request_id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(request_id.to_string()))
    }

    async fn find_employee(&self, identity: &str) -> Option<Employee> {
        match self.repositories.employees.find_by_identity(identity).await {
            Ok(employee) => employee,
            Err(error) => {
                warn!(
                    event_name = "workflow.employee_lookup_failed",
                    actor = %normalize_identity(identity),
                    error = %error,
                    "employee lookup failed"
                );
                None
            }
        }
    }

    fn publish(&self, change: RequestChange) {
        // No subscribers is normal outside the server binary.
        let _ = self.changes.send(change);
    }

    async fn run_actions(
        &self,
        request: &FundsRequest,
        actions: &[WorkflowAction],
        approved_stage: Option<ApprovalStage>,
        context: &AuditContext,
        now: DateTime<Utc>,
    ) {
        for action in actions {
            match action {
                WorkflowAction::NotifyStageApprovers(next) => {
                    self.notify_stage_approvers(request, *next, approved_stage, context, now).await;
                }
                WorkflowAction::NotifyRequester => {
                    self.notify_requester(request, context, now).await;
                }
                WorkflowAction::MarkArchivable => {
                    info!(
                        event_name = "workflow.request_archivable",
                        correlation_id = %context.correlation_id,
                        request_id = %request.id,
                        status = request.status_label(),
                        "request reached a final state"
                    );
                }
            }
        }
    }

    async fn notify_stage_approvers(
        &self,
        request: &FundsRequest,
        stage: ApprovalStage,
        approved_stage: Option<ApprovalStage>,
        context: &AuditContext,
        now: DateTime<Utc>,
    ) {
        let employees = match self.repositories.employees.list().await {
            Ok(employees) => employees,
            Err(error) => {
                warn!(
                    event_name = "notify.approver_lookup_failed",
                    correlation_id = %context.correlation_id,
                    request_id = %request.id,
                    error = %error,
                    "could not load approvers; skipping notifications"
                );
                return;
            }
        };

        let already_signed: Vec<String> =
            request.approver_identities().into_iter().map(|(_, identity)| identity).collect();
        let recipients = select_stage_approvers(&employees, stage, &request.requester)
            .into_iter()
            .filter(|employee| !already_signed.contains(&employee.identity()))
            .map(NotificationRecipient::from)
            .collect::<Vec<_>>();

        let message = match approved_stage {
            Some(approved) => stage_message(request, approved, stage),
            None => submission_message(request, stage),
        };
        self.enqueue(request, recipients, &message, context, now).await;
    }

    async fn notify_requester(
        &self,
        request: &FundsRequest,
        context: &AuditContext,
        now: DateTime<Utc>,
    ) {
        let Some(requester) = self.find_employee(&request.requester).await else {
            warn!(
                event_name = "notify.requester_unknown",
                correlation_id = %context.correlation_id,
                request_id = %request.id,
                requester = %request.requester,
                "requester is not in the employee directory; no outcome sms"
            );
            return;
        };

        let message = outcome_message(request);
        self.enqueue(request, vec![NotificationRecipient::from(&requester)], &message, context, now)
            .await;
    }

    async fn enqueue(
        &self,
        request: &FundsRequest,
        recipients: Vec<NotificationRecipient>,
        message: &str,
        context: &AuditContext,
        now: DateTime<Utc>,
    ) {
        let plan = plan_notifications(
            &request.id,
            recipients,
            message,
            &self.notifications.country_code,
            self.notifications.max_attempts,
            now,
        );
        if plan.jobs.is_empty() {
            return;
        }

        match self.repositories.outbox.enqueue(&plan.jobs).await {
            Ok(()) => self.audit.emit(
                AuditEvent::from_context(
                    context,
                    "notification.queued",
                    AuditCategory::Notification,
                    AuditOutcome::Success,
                )
                .with_metadata("jobs", plan.jobs.len().to_string())
                .with_metadata("skipped", plan.skipped.len().to_string()),
            ),
            Err(error) => {
                warn!(
                    event_name = "notify.enqueue_failed",
                    correlation_id = %context.correlation_id,
                    request_id = %request.id,
                    jobs = plan.jobs.len(),
                    error = %error,
                    "could not queue sms notifications"
                );
                self.audit.emit(
                    AuditEvent::from_context(
                        context,
                        "notification.queue_failed",
                        AuditCategory::Notification,
                        AuditOutcome::Failed,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
    }
}

fn require_actor(actor: &str) -> Result<String, WorkflowError> {
    let actor = normalize_identity(actor);
    if actor.is_empty() {
        return Err(WorkflowError::Validation("actor is required".to_owned()));
    }
    Ok(actor)
}

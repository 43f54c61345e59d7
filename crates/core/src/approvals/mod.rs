//! Separation-of-duties and stage-authority checks.
//!
//! Every check here is pure: callers load the request and the acting
//! employee, and a missing input is treated as a denial.

use serde::{Deserialize, Serialize};

use crate::domain::employee::{normalize_identity, Employee};
use crate::domain::request::FundsRequest;
use crate::flows::{ApprovalStage, ApprovalState};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EligibilityFailure {
    RequestUnavailable { request_id: String },
    RequestClosed { state: ApprovalState },
    StageAlreadyApproved { stage: ApprovalStage, approver: String },
    AlreadyApprovedAtPreviousStage { stage: ApprovalStage },
    RequesterCannotApprove { actor: String },
    ApproverUnknown { actor: String },
    ApproverInactive { actor: String },
    MissingStagePermission { stage: ApprovalStage, permission: String },
}

impl EligibilityFailure {
    pub fn reason(&self) -> String {
        match self {
            Self::RequestUnavailable { request_id } => {
                format!("request `{request_id}` could not be loaded")
            }
            Self::RequestClosed { state } => {
                format!("request is already {}", state.label())
            }
            Self::StageAlreadyApproved { stage, approver } => {
                format!("{} stage was already approved by {approver}", stage.display_name())
            }
            Self::AlreadyApprovedAtPreviousStage { stage } => {
                format!(
                    "you already approved at a previous stage ({}) on this request",
                    stage.display_name()
                )
            }
            Self::RequesterCannotApprove { actor } => {
                format!("`{actor}` submitted this request and cannot approve it")
            }
            Self::ApproverUnknown { actor } => format!("`{actor}` is not a registered employee"),
            Self::ApproverInactive { actor } => format!("employee `{actor}` is inactive"),
            Self::MissingStagePermission { stage, permission } => {
                format!("{} approval requires the `{permission}` permission", stage.display_name())
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityDecision {
    pub can_approve: bool,
    pub reason: String,
    pub failure: Option<EligibilityFailure>,
}

impl EligibilityDecision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self { can_approve: true, reason: reason.into(), failure: None }
    }

    pub fn deny(failure: EligibilityFailure) -> Self {
        Self { can_approve: false, reason: failure.reason(), failure: Some(failure) }
    }
}

pub struct SeparationOfDuties;

impl SeparationOfDuties {
    /// Checks the request's own signoff fields. Does not look at permissions.
    pub fn check(
        request: &FundsRequest,
        stage: ApprovalStage,
        actor: &str,
    ) -> EligibilityDecision {
        if request.state.is_terminal() {
            return EligibilityDecision::deny(EligibilityFailure::RequestClosed {
                state: request.state,
            });
        }

        if let Some(existing) = request.signoff(stage) {
            return EligibilityDecision::deny(EligibilityFailure::StageAlreadyApproved {
                stage,
                approver: existing.approver.clone(),
            });
        }

        let actor = normalize_identity(actor);
        if let Some((previous, _)) = request
            .approver_identities()
            .into_iter()
            .find(|(signed_stage, identity)| *signed_stage != stage && *identity == actor)
        {
            return EligibilityDecision::deny(EligibilityFailure::AlreadyApprovedAtPreviousStage {
                stage: previous,
            });
        }

        if normalize_identity(&request.requester) == actor {
            return EligibilityDecision::deny(EligibilityFailure::RequesterCannotApprove { actor });
        }

        EligibilityDecision::allow(format!(
            "`{actor}` has not signed any other stage of {}",
            request.id
        ))
    }
}

pub struct StageAuthority;

impl StageAuthority {
    pub fn check(
        employee: Option<&Employee>,
        actor: &str,
        stage: ApprovalStage,
    ) -> EligibilityDecision {
        let Some(employee) = employee else {
            return EligibilityDecision::deny(EligibilityFailure::ApproverUnknown {
                actor: normalize_identity(actor),
            });
        };

        if !employee.is_active() {
            return EligibilityDecision::deny(EligibilityFailure::ApproverInactive {
                actor: employee.identity(),
            });
        }

        let permission = stage.required_permission();
        if !employee.can(permission) {
            return EligibilityDecision::deny(EligibilityFailure::MissingStagePermission {
                stage,
                permission: permission.to_owned(),
            });
        }

        EligibilityDecision::allow(format!(
            "`{}` holds `{permission}`",
            employee.identity()
        ))
    }
}

/// Full eligibility check. SoD runs before the permission gate so a second
/// signature by the same person is reported as such.
pub fn evaluate_eligibility(
    request_id: &str,
    request: Option<&FundsRequest>,
    employee: Option<&Employee>,
    actor: &str,
    stage: ApprovalStage,
) -> EligibilityDecision {
    let Some(request) = request else {
        return EligibilityDecision::deny(EligibilityFailure::RequestUnavailable {
            request_id: request_id.to_owned(),
        });
    };

    let separation = SeparationOfDuties::check(request, stage, actor);
    if !separation.can_approve {
        return separation;
    }

    let authority = StageAuthority::check(employee, actor, stage);
    if !authority.can_approve {
        return authority;
    }

    EligibilityDecision::allow(format!(
        "`{}` may approve the {} stage of {}",
        normalize_identity(actor),
        stage.display_name(),
        request.id
    ))
}

pub mod approvals;
pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod notify;
pub mod permissions;

pub use approvals::{
    evaluate_eligibility, EligibilityDecision, EligibilityFailure, SeparationOfDuties,
    StageAuthority,
};
pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use domain::archive::ArchivedRequest;
pub use domain::employee::{normalize_identity, Employee, EmployeeId, EmployeeStatus, NewEmployee};
pub use domain::notification::{NotificationJob, NotificationJobId, NotificationState};
pub use domain::request::{
    FundsRequest, NewRequest, Priority, RequestFilter, RequestId, RequestKind, StageSignoff,
};
pub use domain::verification::{
    VerificationCode, VerificationOutcome, VerificationRecord, VerificationStatus,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use flows::{ApprovalEngine, ApprovalEvent, ApprovalStage, ApprovalState, FlowTransitionError};
pub use notify::{normalize_phone, PhoneError, RetryPolicy};

use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{
    ApprovalEvent, ApprovalStage, ApprovalState, TransitionOutcome, WorkflowAction,
};

/// A named approval chain. The two-stage Finance/Admin chain is the only one
/// in use, but the engine is written against this seam.
pub trait WorkflowDefinition {
    fn initial_state(&self) -> ApprovalState;
    fn transition(
        &self,
        current: &ApprovalState,
        event: &ApprovalEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct TwoStageApproval;

impl WorkflowDefinition for TwoStageApproval {
    fn initial_state(&self) -> ApprovalState {
        ApprovalState::Pending
    }

    fn transition(
        &self,
        current: &ApprovalState,
        event: &ApprovalEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_two_stage(current, event)
    }
}

pub struct ApprovalEngine<W> {
    workflow: W,
}

impl<W> ApprovalEngine<W>
where
    W: WorkflowDefinition,
{
    pub fn new(workflow: W) -> Self {
        Self { workflow }
    }

    pub fn initial_state(&self) -> ApprovalState {
        self.workflow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ApprovalState,
        event: &ApprovalEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.workflow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ApprovalState,
        event: &ApprovalEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "workflow.transition_applied",
                        AuditCategory::Workflow,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "workflow.transition_rejected",
                        AuditCategory::Workflow,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for ApprovalEngine<TwoStageApproval> {
    fn default() -> Self {
        Self::new(TwoStageApproval)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ApprovalState, event: ApprovalEvent },
}

fn transition_two_stage(
    current: &ApprovalState,
    event: &ApprovalEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ApprovalEvent::{Rejected as Reject, StageApproved};
    use ApprovalStage::{Admin, Finance};
    use ApprovalState::{AdminApproved, FinanceApproved, FullyApproved, Pending, Rejected};
    use WorkflowAction::{MarkArchivable, NotifyRequester, NotifyStageApprovers};

    let (to, actions) = match (current, event) {
        (Pending, StageApproved(Finance)) => (FinanceApproved, vec![NotifyStageApprovers(Admin)]),
        (Pending, StageApproved(Admin)) => (AdminApproved, vec![NotifyStageApprovers(Finance)]),
        (FinanceApproved, StageApproved(Admin)) | (AdminApproved, StageApproved(Finance)) => {
            (FullyApproved, vec![NotifyRequester, MarkArchivable])
        }
        (Pending, Reject) | (FinanceApproved, Reject) | (AdminApproved, Reject) => {
            (Rejected, vec![NotifyRequester, MarkArchivable])
        }
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::request::RequestId;
    use crate::flows::engine::{ApprovalEngine, FlowTransitionError, TwoStageApproval};
    use crate::flows::states::{ApprovalEvent, ApprovalStage, ApprovalState, WorkflowAction};

    #[test]
    fn finance_then_admin_reaches_fully_approved() {
        let engine = ApprovalEngine::new(TwoStageApproval);
        let state = engine.initial_state();

        let finance = engine
            .apply(&state, &ApprovalEvent::StageApproved(ApprovalStage::Finance))
            .expect("pending -> finance approved");
        assert_eq!(finance.to, ApprovalState::FinanceApproved);
        assert_eq!(finance.actions, vec![WorkflowAction::NotifyStageApprovers(ApprovalStage::Admin)]);

        let admin = engine
            .apply(&finance.to, &ApprovalEvent::StageApproved(ApprovalStage::Admin))
            .expect("finance approved -> fully approved");
        assert_eq!(admin.to, ApprovalState::FullyApproved);
        assert!(admin.actions.contains(&WorkflowAction::NotifyRequester));
        assert!(admin.actions.contains(&WorkflowAction::MarkArchivable));
    }

    #[test]
    fn stage_order_does_not_change_final_state() {
        let engine = ApprovalEngine::default();

        let admin_first = engine
            .apply(&ApprovalState::Pending, &ApprovalEvent::StageApproved(ApprovalStage::Admin))
            .expect("pending -> admin approved");
        assert_eq!(admin_first.to, ApprovalState::AdminApproved);

        let done = engine
            .apply(&admin_first.to, &ApprovalEvent::StageApproved(ApprovalStage::Finance))
            .expect("admin approved -> fully approved");
        assert_eq!(done.to, ApprovalState::FullyApproved);
    }

    #[test]
    fn repeating_a_stage_is_rejected() {
        let engine = ApprovalEngine::default();
        let error = engine
            .apply(
                &ApprovalState::FinanceApproved,
                &ApprovalEvent::StageApproved(ApprovalStage::Finance),
            )
            .expect_err("finance cannot sign twice");

        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition { state: ApprovalState::FinanceApproved, .. }
        ));
    }

    #[test]
    fn terminal_states_accept_no_events() {
        let engine = ApprovalEngine::default();
        for state in [ApprovalState::FullyApproved, ApprovalState::Rejected] {
            assert!(engine.apply(&state, &ApprovalEvent::Rejected).is_err());
            assert!(engine
                .apply(&state, &ApprovalEvent::StageApproved(ApprovalStage::Admin))
                .is_err());
        }
    }

    #[test]
    fn rejection_is_allowed_from_any_open_state() {
        let engine = ApprovalEngine::default();
        for state in
            [ApprovalState::Pending, ApprovalState::FinanceApproved, ApprovalState::AdminApproved]
        {
            let outcome = engine.apply(&state, &ApprovalEvent::Rejected).expect("reject");
            assert_eq!(outcome.to, ApprovalState::Rejected);
        }
    }

    #[test]
    fn transitions_emit_audit_events() {
        let engine = ApprovalEngine::default();
        let sink = InMemoryAuditSink::default();
        let context =
            AuditContext::new(Some(RequestId("REQ-1".to_owned())), "req-42", "finance@kahawa.test");

        engine
            .apply_with_audit(
                &ApprovalState::Pending,
                &ApprovalEvent::StageApproved(ApprovalStage::Finance),
                &sink,
                &context,
            )
            .expect("transition should succeed");
        let _ = engine.apply_with_audit(
            &ApprovalState::Rejected,
            &ApprovalEvent::Rejected,
            &sink,
            &context,
        );

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "workflow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("finance_approved"));
        assert_eq!(events[1].event_type, "workflow.transition_rejected");
    }
}

pub mod engine;
pub mod states;

pub use engine::{ApprovalEngine, FlowTransitionError, TwoStageApproval, WorkflowDefinition};
pub use states::{ApprovalEvent, ApprovalStage, ApprovalState, TransitionOutcome, WorkflowAction};

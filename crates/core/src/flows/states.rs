use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStage {
    Finance,
    Admin,
}

impl ApprovalStage {
    pub const ALL: [ApprovalStage; 2] = [ApprovalStage::Finance, ApprovalStage::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finance => "finance",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "finance" => Some(Self::Finance),
            "admin" | "management" => Some(Self::Admin),
            _ => None,
        }
    }

    pub fn other(&self) -> Self {
        match self {
            Self::Finance => Self::Admin,
            Self::Admin => Self::Finance,
        }
    }

    /// Permission key an employee must hold to sign off this stage.
    pub fn required_permission(&self) -> &'static str {
        match self {
            Self::Finance => "finance:approve",
            Self::Admin => "admin:approve",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Finance => "Finance",
            Self::Admin => "Admin",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalState {
    Pending,
    FinanceApproved,
    AdminApproved,
    FullyApproved,
    Rejected,
}

impl ApprovalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::FinanceApproved => "finance_approved",
            Self::AdminApproved => "admin_approved",
            Self::FullyApproved => "fully_approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "finance_approved" => Some(Self::FinanceApproved),
            "admin_approved" => Some(Self::AdminApproved),
            "fully_approved" | "approved" => Some(Self::FullyApproved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    /// User-facing status text.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::FinanceApproved => "Finance Approved - Awaiting Admin",
            Self::AdminApproved => "Admin Approved - Awaiting Finance",
            Self::FullyApproved => "Fully Approved",
            Self::Rejected => "Rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::FullyApproved | Self::Rejected)
    }

    /// Stages still waiting for a signoff in this state.
    pub fn outstanding_stages(&self) -> Vec<ApprovalStage> {
        match self {
            Self::Pending => ApprovalStage::ALL.to_vec(),
            Self::FinanceApproved => vec![ApprovalStage::Admin],
            Self::AdminApproved => vec![ApprovalStage::Finance],
            Self::FullyApproved | Self::Rejected => Vec::new(),
        }
    }

    /// Derives a state from stored signoff presence. Used when importing rows
    /// written before the state column existed.
    pub fn from_signoffs(finance_signed: bool, admin_signed: bool, rejected: bool) -> Self {
        if rejected {
            return Self::Rejected;
        }
        match (finance_signed, admin_signed) {
            (true, true) => Self::FullyApproved,
            (true, false) => Self::FinanceApproved,
            (false, true) => Self::AdminApproved,
            (false, false) => Self::Pending,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum ApprovalEvent {
    StageApproved(ApprovalStage),
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stage", rename_all = "snake_case")]
pub enum WorkflowAction {
    NotifyStageApprovers(ApprovalStage),
    NotifyRequester,
    MarkArchivable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ApprovalState,
    pub to: ApprovalState,
    pub event: ApprovalEvent,
    pub actions: Vec<WorkflowAction>,
}

#[cfg(test)]
mod tests {
    use super::{ApprovalStage, ApprovalState};

    #[test]
    fn state_round_trips_from_storage_encoding() {
        let cases = [
            ApprovalState::Pending,
            ApprovalState::FinanceApproved,
            ApprovalState::AdminApproved,
            ApprovalState::FullyApproved,
            ApprovalState::Rejected,
        ];

        for state in cases {
            assert_eq!(ApprovalState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn labels_match_dashboard_wording() {
        assert_eq!(ApprovalState::Pending.label(), "Pending");
        assert_eq!(ApprovalState::FinanceApproved.label(), "Finance Approved - Awaiting Admin");
        assert_eq!(ApprovalState::FullyApproved.label(), "Fully Approved");
    }

    #[test]
    fn derived_state_prefers_rejection_over_signoffs() {
        assert_eq!(ApprovalState::from_signoffs(true, true, true), ApprovalState::Rejected);
        assert_eq!(ApprovalState::from_signoffs(false, true, false), ApprovalState::AdminApproved);
        assert_eq!(ApprovalState::from_signoffs(true, true, false), ApprovalState::FullyApproved);
    }

    #[test]
    fn stage_parse_accepts_management_alias() {
        assert_eq!(ApprovalStage::parse(" Management "), Some(ApprovalStage::Admin));
        assert_eq!(ApprovalStage::parse("hr"), None);
        assert_eq!(ApprovalStage::Finance.other(), ApprovalStage::Admin);
    }
}

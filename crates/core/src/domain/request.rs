use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::employee::normalize_identity;
use crate::errors::DomainError;
use crate::flows::{ApprovalStage, ApprovalState};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(format!("REQ-{}", raw[..12].to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Money,
    Expense,
    Salary,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Money => "money",
            Self::Expense => "expense",
            Self::Salary => "salary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "money" | "money_request" => Some(Self::Money),
            "expense" | "expense_request" => Some(Self::Expense),
            "salary" | "salary_request" | "salary_advance" => Some(Self::Salary),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" | "medium" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSignoff {
    pub approver: String,
    pub approved_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub rejected_by: String,
    pub reason: String,
    pub rejected_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FundsRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub requester: String,
    pub requester_name: String,
    pub department: String,
    pub priority: Priority,
    pub state: ApprovalState,
    pub finance_signoff: Option<StageSignoff>,
    pub admin_signoff: Option<StageSignoff>,
    pub rejection: Option<Rejection>,
    pub details: serde_json::Value,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FundsRequest {
    pub fn signoff(&self, stage: ApprovalStage) -> Option<&StageSignoff> {
        match stage {
            ApprovalStage::Finance => self.finance_signoff.as_ref(),
            ApprovalStage::Admin => self.admin_signoff.as_ref(),
        }
    }

    /// Stages signed so far, paired with the normalised approver identity.
    pub fn approver_identities(&self) -> Vec<(ApprovalStage, String)> {
        ApprovalStage::ALL
            .into_iter()
            .filter_map(|stage| {
                self.signoff(stage).map(|signoff| (stage, normalize_identity(&signoff.approver)))
            })
            .collect()
    }

    pub fn status_label(&self) -> &'static str {
        self.state.label()
    }

    pub fn record_signoff(
        &mut self,
        stage: ApprovalStage,
        approver: &str,
        next_state: ApprovalState,
        at: DateTime<Utc>,
    ) {
        let signoff = StageSignoff { approver: normalize_identity(approver), approved_at: at };
        match stage {
            ApprovalStage::Finance => self.finance_signoff = Some(signoff),
            ApprovalStage::Admin => self.admin_signoff = Some(signoff),
        }
        self.state = next_state;
        self.updated_at = at;
    }

    pub fn record_rejection(&mut self, rejected_by: &str, reason: &str, at: DateTime<Utc>) {
        self.rejection = Some(Rejection {
            rejected_by: normalize_identity(rejected_by),
            reason: reason.trim().to_owned(),
            rejected_at: at,
        });
        self.state = ApprovalState::Rejected;
        self.updated_at = at;
    }

    /// Cross-checks the stored state against the signoff columns.
    pub fn is_consistent(&self) -> bool {
        let derived = ApprovalState::from_signoffs(
            self.finance_signoff.is_some(),
            self.admin_signoff.is_some(),
            self.rejection.is_some(),
        );
        derived == self.state
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewRequest {
    pub kind: RequestKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub amount: Decimal,
    pub requester: String,
    #[serde(default)]
    pub requester_name: String,
    pub department: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl NewRequest {
    /// Returns the names of missing or invalid fields; empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.title.trim().is_empty() {
            problems.push("title".to_owned());
        }
        if self.requester.trim().is_empty() {
            problems.push("requester".to_owned());
        }
        if self.department.trim().is_empty() {
            problems.push("department".to_owned());
        }
        if self.amount <= Decimal::ZERO {
            problems.push("amount".to_owned());
        }
        problems
    }

    pub fn into_request(self, now: DateTime<Utc>) -> Result<FundsRequest, DomainError> {
        let problems = self.validate();
        if !problems.is_empty() {
            return Err(DomainError::InvalidFields(problems));
        }

        let requester = normalize_identity(&self.requester);
        let requester_name = match self.requester_name.trim() {
            "" => requester.clone(),
            name => name.to_owned(),
        };

        Ok(FundsRequest {
            id: RequestId::generate(),
            kind: self.kind,
            title: self.title.trim().to_owned(),
            description: self.description.trim().to_owned(),
            amount: self.amount,
            requester,
            requester_name,
            department: self.department.trim().to_owned(),
            priority: self.priority,
            state: ApprovalState::Pending,
            finance_signoff: None,
            admin_signoff: None,
            rejection: None,
            details: self.details.unwrap_or_else(|| serde_json::json!({})),
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFilter {
    pub state: Option<ApprovalState>,
    pub department: Option<String>,
    pub requester: Option<String>,
    pub limit: Option<u32>,
}

impl RequestFilter {
    pub fn matches(&self, request: &FundsRequest) -> bool {
        if let Some(state) = self.state {
            if request.state != state {
                return false;
            }
        }
        if let Some(department) = &self.department {
            if !request.department.eq_ignore_ascii_case(department.trim()) {
                return false;
            }
        }
        if let Some(requester) = &self.requester {
            if request.requester != normalize_identity(requester) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{NewRequest, Priority, RequestFilter, RequestId, RequestKind};
    use crate::errors::DomainError;
    use crate::flows::{ApprovalStage, ApprovalState};

    fn new_request() -> NewRequest {
        NewRequest {
            kind: RequestKind::Money,
            title: "Drying yard tarpaulins".to_owned(),
            description: String::new(),
            amount: Decimal::new(500_000, 0),
            requester: " Amina@Kahawa.test ".to_owned(),
            requester_name: String::new(),
            department: "Production".to_owned(),
            priority: Priority::High,
            details: None,
        }
    }

    #[test]
    fn generated_ids_have_stable_shape() {
        let id = RequestId::generate();
        assert!(id.as_str().starts_with("REQ-"));
        assert_eq!(id.as_str().len(), 16);
    }

    #[test]
    fn new_requests_start_pending_with_normalised_requester() {
        let request = new_request().into_request(Utc::now()).expect("valid request");

        assert_eq!(request.state, ApprovalState::Pending);
        assert_eq!(request.status_label(), "Pending");
        assert_eq!(request.requester, "amina@kahawa.test");
        assert_eq!(request.requester_name, "amina@kahawa.test");
        assert!(request.approver_identities().is_empty());
        assert!(request.is_consistent());
    }

    #[test]
    fn validation_lists_every_problem_field() {
        let mut input = new_request();
        input.title = "  ".to_owned();
        input.amount = Decimal::ZERO;

        assert_eq!(input.validate(), vec!["title".to_owned(), "amount".to_owned()]);
        let error = input.into_request(Utc::now()).expect_err("invalid request");
        assert!(matches!(error, DomainError::InvalidFields(fields) if fields.len() == 2));
    }

    #[test]
    fn signoffs_record_identity_and_timestamp() {
        let now = Utc::now();
        let mut request = new_request().into_request(now).expect("valid request");
        request.record_signoff(
            ApprovalStage::Finance,
            "Brian@Kahawa.test",
            ApprovalState::FinanceApproved,
            now,
        );

        let signoff = request.signoff(ApprovalStage::Finance).expect("finance signoff");
        assert_eq!(signoff.approver, "brian@kahawa.test");
        assert_eq!(signoff.approved_at, now);
        assert_eq!(request.status_label(), "Finance Approved - Awaiting Admin");
        assert!(request.is_consistent());
    }

    #[test]
    fn filter_matches_on_state_and_requester() {
        let request = new_request().into_request(Utc::now()).expect("valid request");
        let filter = RequestFilter {
            state: Some(ApprovalState::Pending),
            requester: Some("AMINA@kahawa.test".to_owned()),
            ..RequestFilter::default()
        };
        assert!(filter.matches(&request));

        let rejected_only =
            RequestFilter { state: Some(ApprovalState::Rejected), ..RequestFilter::default() };
        assert!(!rejected_only.matches(&request));
    }

    #[test]
    fn kind_parse_accepts_legacy_names() {
        assert_eq!(RequestKind::parse("salary_advance"), Some(RequestKind::Salary));
        assert_eq!(RequestKind::parse("Expense"), Some(RequestKind::Expense));
        assert_eq!(Priority::parse("medium"), Some(Priority::Normal));
    }
}

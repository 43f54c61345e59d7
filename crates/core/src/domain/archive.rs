use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::employee::normalize_identity;
use crate::domain::request::{FundsRequest, RequestId};
use crate::errors::DomainError;
use crate::flows::ApprovalState;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArchivedRequest {
    pub request_id: RequestId,
    pub snapshot: FundsRequest,
    pub final_status: ApprovalState,
    pub archived_by: String,
    pub archived_at: DateTime<Utc>,
}

impl ArchivedRequest {
    /// Only requests that reached a terminal state can be archived.
    pub fn from_request(
        request: &FundsRequest,
        archived_by: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !request.state.is_terminal() {
            return Err(DomainError::NotArchivable { state: request.state });
        }

        Ok(Self {
            request_id: request.id.clone(),
            snapshot: request.clone(),
            final_status: request.state,
            archived_by: normalize_identity(archived_by),
            archived_at: now,
        })
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationJobId(pub String);

impl NotificationJobId {
    pub fn generate() -> Self {
        Self(format!("SMS-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationState {
    Queued,
    Sent,
    RetryableFailed,
    FailedTerminal,
}

impl NotificationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::RetryableFailed => "retryable_failed",
            Self::FailedTerminal => "failed_terminal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "sent" => Some(Self::Sent),
            "retryable_failed" => Some(Self::RetryableFailed),
            "failed_terminal" => Some(Self::FailedTerminal),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Queued | Self::RetryableFailed)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationJob {
    pub id: NotificationJobId,
    pub request_id: RequestId,
    pub recipient_identity: String,
    pub recipient_phone: String,
    pub message: String,
    pub state: NotificationState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub available_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NotificationJob {
    pub fn queued(
        request_id: RequestId,
        recipient_identity: impl Into<String>,
        recipient_phone: impl Into<String>,
        message: impl Into<String>,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationJobId::generate(),
            request_id,
            recipient_identity: recipient_identity.into(),
            recipient_phone: recipient_phone.into(),
            message: message.into(),
            state: NotificationState::Queued,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            available_at: now,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.state.is_pending() && self.available_at <= now
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.attempts += 1;
        self.state = NotificationState::Sent;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Records a failed attempt. `retry_at` is ignored once attempts run out.
    pub fn mark_failed(
        &mut self,
        error: impl Into<String>,
        retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;
        if self.attempts >= self.max_attempts {
            self.state = NotificationState::FailedTerminal;
        } else {
            self.state = NotificationState::RetryableFailed;
            self.available_at = retry_at;
        }
    }

    /// Gives up immediately, for errors a retry cannot fix.
    pub fn mark_failed_terminal(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.attempts += 1;
        self.last_error = Some(error.into());
        self.state = NotificationState::FailedTerminal;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::{NotificationJob, NotificationState};
    use crate::domain::request::RequestId;

    fn job(max_attempts: u32, now: DateTime<Utc>) -> NotificationJob {
        NotificationJob::queued(
            RequestId("REQ-1".to_owned()),
            "brian@kahawa.test",
            "+256781121639",
            "New request",
            max_attempts,
            now,
        )
    }

    #[test]
    fn state_round_trips_from_storage_encoding() {
        for state in [
            NotificationState::Queued,
            NotificationState::Sent,
            NotificationState::RetryableFailed,
            NotificationState::FailedTerminal,
        ] {
            assert_eq!(NotificationState::parse(state.as_str()), Some(state));
        }
    }

    #[test]
    fn failures_retry_until_attempts_are_exhausted() {
        let now = Utc::now();
        let mut job = job(2, now);
        assert!(job.is_due(now));

        job.mark_failed("gateway timeout", now + Duration::seconds(30), now);
        assert_eq!(job.state, NotificationState::RetryableFailed);
        assert!(!job.is_due(now));
        assert!(job.is_due(now + Duration::seconds(30)));

        job.mark_failed("gateway timeout", now + Duration::seconds(60), now);
        assert_eq!(job.state, NotificationState::FailedTerminal);
        assert_eq!(job.attempts, 2);
        assert!(!job.is_due(now + Duration::days(1)));
    }

    #[test]
    fn sent_jobs_clear_last_error() {
        let now = Utc::now();
        let mut job = job(3, now);
        job.mark_failed("boom", now, now);
        job.mark_sent(now);

        assert_eq!(job.state, NotificationState::Sent);
        assert_eq!(job.last_error, None);
        assert_eq!(job.attempts, 2);
    }

    #[test]
    fn permanent_failures_skip_remaining_attempts() {
        let now = Utc::now();
        let mut job = job(5, now);
        job.mark_failed_terminal("invalid destination", now);

        assert_eq!(job.state, NotificationState::FailedTerminal);
        assert_eq!(job.attempts, 1);
        assert!(!job.is_due(now));
    }
}

//! Notification planning: who gets an SMS, what it says, and when a failed
//! send is retried. Sending itself lives in the notify crate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::employee::{normalize_identity, Employee};
use crate::domain::notification::NotificationJob;
use crate::domain::request::{FundsRequest, RequestId};
use crate::flows::{ApprovalStage, ApprovalState};

pub const DEFAULT_COUNTRY_CODE: &str = "256";
const LOCAL_NUMBER_DIGITS: usize = 9;
const MIN_INTERNATIONAL_DIGITS: usize = 8;
const MAX_INTERNATIONAL_DIGITS: usize = 15;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PhoneError {
    #[error("phone number is empty")]
    Empty,
    #[error("phone number `{0}` contains characters other than digits")]
    InvalidCharacters(String),
    #[error("phone number has {digits} digits, which is not a valid length")]
    InvalidLength { digits: usize },
    #[error("country code `{0}` must be 1-3 digits")]
    InvalidCountryCode(String),
}

/// Normalises a phone number to `+<country code><subscriber>`.
///
/// Accepts local (`0781121639`), bare (`781121639`), country-prefixed
/// (`256781121639`, `00256781121639`) and already international
/// (`+256781121639`) forms, with spaces, dashes, dots and parentheses ignored.
pub fn normalize_phone(raw: &str, country_code: &str) -> Result<String, PhoneError> {
    let country_code = country_code.trim().trim_start_matches('+');
    if country_code.is_empty()
        || country_code.len() > 3
        || !country_code.chars().all(|c| c.is_ascii_digit())
    {
        return Err(PhoneError::InvalidCountryCode(country_code.to_owned()));
    }

    let compact: String =
        raw.chars().filter(|c| !matches!(c, ' ' | '-' | '(' | ')' | '.' | '\t')).collect();
    if compact.is_empty() {
        return Err(PhoneError::Empty);
    }

    let (international, digits) = match compact.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => match compact.strip_prefix("00") {
            Some(rest) => (true, rest),
            None => (false, compact.as_str()),
        },
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(PhoneError::InvalidCharacters(raw.trim().to_owned()));
    }

    if international {
        if !(MIN_INTERNATIONAL_DIGITS..=MAX_INTERNATIONAL_DIGITS).contains(&digits.len()) {
            return Err(PhoneError::InvalidLength { digits: digits.len() });
        }
        return Ok(format!("+{digits}"));
    }

    match digits.len() {
        n if n == LOCAL_NUMBER_DIGITS + 1 && digits.starts_with('0') => {
            Ok(format!("+{country_code}{}", &digits[1..]))
        }
        n if n == LOCAL_NUMBER_DIGITS + country_code.len() && digits.starts_with(country_code) => {
            Ok(format!("+{digits}"))
        }
        LOCAL_NUMBER_DIGITS => Ok(format!("+{country_code}{digits}")),
        n => Err(PhoneError::InvalidLength { digits: n }),
    }
}

/// Active employees allowed to sign `stage`, never the requester, ordered by identity.
pub fn select_stage_approvers<'a>(
    employees: &'a [Employee],
    stage: ApprovalStage,
    requester: &str,
) -> Vec<&'a Employee> {
    let requester = normalize_identity(requester);
    let permission = stage.required_permission();
    let mut approvers: Vec<&Employee> = employees
        .iter()
        .filter(|employee| employee.is_active())
        .filter(|employee| employee.identity() != requester)
        .filter(|employee| employee.can(permission))
        .collect();
    approvers.sort_by_key(|employee| employee.identity());
    approvers.dedup_by_key(|employee| employee.identity());
    approvers
}

pub fn format_amount(amount: Decimal) -> String {
    let whole = amount.round_dp(0).abs().to_string();
    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (index, digit) in whole.chars().enumerate() {
        if index > 0 && (whole.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if amount.is_sign_negative() && !amount.is_zero() {
        format!("UGX -{grouped}")
    } else {
        format!("UGX {grouped}")
    }
}

pub fn submission_message(request: &FundsRequest, stage: ApprovalStage) -> String {
    format!(
        "New {} request {} \"{}\" for {} from {} ({}) awaits your {} approval.",
        request.kind.as_str(),
        request.id,
        request.title,
        format_amount(request.amount),
        request.requester_name,
        request.department,
        stage.display_name(),
    )
}

pub fn stage_message(
    request: &FundsRequest,
    approved: ApprovalStage,
    next: ApprovalStage,
) -> String {
    format!(
        "Request {} \"{}\" for {} was approved by {} and awaits your {} approval.",
        request.id,
        request.title,
        format_amount(request.amount),
        approved.display_name(),
        next.display_name(),
    )
}

pub fn outcome_message(request: &FundsRequest) -> String {
    let mut message = format!(
        "Your request {} \"{}\" for {} is now {}.",
        request.id,
        request.title,
        format_amount(request.amount),
        request.status_label(),
    );
    if request.state == ApprovalState::Rejected {
        if let Some(rejection) = &request.rejection {
            message.push_str(&format!(" Reason: {}", rejection.reason));
        }
    }
    message
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecipient {
    pub identity: String,
    pub phone: Option<String>,
}

impl From<&Employee> for NotificationRecipient {
    fn from(employee: &Employee) -> Self {
        Self { identity: employee.identity(), phone: employee.phone.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecipient {
    pub identity: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotificationPlan {
    pub jobs: Vec<NotificationJob>,
    pub skipped: Vec<SkippedRecipient>,
}

/// Builds one queued job per reachable recipient. Recipients without a usable
/// phone are skipped and logged; they never fail the plan.
pub fn plan_notifications<I>(
    request_id: &RequestId,
    recipients: I,
    message: &str,
    country_code: &str,
    max_attempts: u32,
    now: DateTime<Utc>,
) -> NotificationPlan
where
    I: IntoIterator<Item = NotificationRecipient>,
{
    let mut plan = NotificationPlan::default();
    for recipient in recipients {
        let phone = match recipient.phone.as_deref().map(str::trim) {
            None | Some("") => Err("no phone number on file".to_owned()),
            Some(raw) => normalize_phone(raw, country_code).map_err(|error| error.to_string()),
        };

        match phone {
            Ok(phone) => plan.jobs.push(NotificationJob::queued(
                request_id.clone(),
                recipient.identity,
                phone,
                message,
                max_attempts,
                now,
            )),
            Err(reason) => {
                warn!(
                    event_name = "notify.recipient_skipped",
                    request_id = %request_id,
                    recipient = %recipient.identity,
                    reason = %reason,
                    "skipping sms recipient"
                );
                plan.skipped.push(SkippedRecipient { identity: recipient.identity, reason });
            }
        }
    }
    plan
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30 * 60),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next try after `attempt` failed attempts.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1_u32 << exponent).min(self.max_delay)
    }

    pub fn next_attempt_at(&self, attempt: u32, now: DateTime<Utc>) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(attempt))
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        now + delay
    }
}

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

pub const MIN_EXPIRY_DAYS: u32 = 1;
pub const MAX_EXPIRY_DAYS: u32 = 3650;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationCode(pub String);

impl VerificationCode {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..12].to_ascii_uppercase())
    }

    /// Codes are printed in uppercase but people type them however they like.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    Revoked,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Revoked => "revoked",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "verified" => Some(Self::Verified),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationOutcome {
    Valid,
    Revoked,
    Expired,
    NotFound,
}

impl VerificationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Revoked => "revoked",
            Self::Expired => "expired",
            Self::NotFound => "not_found",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
    pub code: VerificationCode,
    pub document_kind: String,
    pub document_ref: String,
    pub subject_name: String,
    pub issued_by: String,
    pub status: VerificationStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revoked_reason: Option<String>,
}

impl VerificationRecord {
    pub fn issue(
        document_kind: &str,
        document_ref: &str,
        subject_name: &str,
        issued_by: &str,
        expires_in_days: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let mut problems = Vec::new();
        if document_kind.trim().is_empty() {
            problems.push("document_kind".to_owned());
        }
        if document_ref.trim().is_empty() {
            problems.push("document_ref".to_owned());
        }
        if subject_name.trim().is_empty() {
            problems.push("subject_name".to_owned());
        }
        if !problems.is_empty() {
            return Err(DomainError::InvalidFields(problems));
        }

        let expires_at = expires_in_days.map(|days| {
            let days = days.clamp(MIN_EXPIRY_DAYS, MAX_EXPIRY_DAYS);
            now + Duration::days(i64::from(days))
        });

        Ok(Self {
            code: VerificationCode::generate(),
            document_kind: document_kind.trim().to_owned(),
            document_ref: document_ref.trim().to_owned(),
            subject_name: subject_name.trim().to_owned(),
            issued_by: issued_by.trim().to_ascii_lowercase(),
            status: VerificationStatus::Verified,
            issued_at: now,
            expires_at,
            revoked_at: None,
            revoked_reason: None,
        })
    }

    pub fn revoke(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status == VerificationStatus::Revoked {
            return Err(DomainError::InvariantViolation(format!(
                "verification code {} is already revoked",
                self.code.as_str()
            )));
        }
        self.status = VerificationStatus::Revoked;
        self.revoked_at = Some(now);
        self.revoked_reason = Some(reason.trim().to_owned()).filter(|r| !r.is_empty());
        Ok(())
    }

    pub fn resolve(&self, now: DateTime<Utc>) -> VerificationOutcome {
        if self.status == VerificationStatus::Revoked {
            return VerificationOutcome::Revoked;
        }
        match self.expires_at {
            Some(expires_at) if expires_at <= now => VerificationOutcome::Expired,
            _ => VerificationOutcome::Valid,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{VerificationCode, VerificationOutcome, VerificationRecord, MAX_EXPIRY_DAYS};

    fn record(expires_in_days: Option<u32>) -> VerificationRecord {
        VerificationRecord::issue(
            "payslip",
            "PAY-2026-10",
            "Grace Namutebi",
            "HR@kahawa.test",
            expires_in_days,
            Utc::now(),
        )
        .expect("valid record")
    }

    #[test]
    fn codes_are_twelve_uppercase_characters() {
        let code = VerificationCode::generate();
        assert_eq!(code.as_str().len(), 12);
        assert_eq!(code.as_str(), code.as_str().to_ascii_uppercase());
        assert_eq!(VerificationCode::normalize(" ab12cd ").as_str(), "AB12CD");
    }

    #[test]
    fn fresh_record_resolves_valid() {
        let record = record(None);
        assert_eq!(record.resolve(Utc::now()), VerificationOutcome::Valid);
        assert_eq!(record.issued_by, "hr@kahawa.test");
    }

    #[test]
    fn expiry_is_clamped_and_enforced() {
        let zero = record(Some(0));
        let expires_at = zero.expires_at.expect("expiry set");
        assert_eq!((expires_at - zero.issued_at).num_days(), 1);
        assert_eq!(zero.resolve(zero.issued_at + Duration::days(2)), VerificationOutcome::Expired);

        let huge = record(Some(u32::MAX));
        let expires_at = huge.expires_at.expect("expiry set");
        assert_eq!((expires_at - huge.issued_at).num_days(), i64::from(MAX_EXPIRY_DAYS));
    }

    #[test]
    fn revoked_records_resolve_revoked_and_cannot_be_revoked_twice() {
        let mut record = record(Some(30));
        record.revoke("issued in error", Utc::now()).expect("first revoke");

        assert_eq!(record.resolve(Utc::now()), VerificationOutcome::Revoked);
        assert_eq!(record.revoked_reason.as_deref(), Some("issued in error"));
        assert!(record.revoke("again", Utc::now()).is_err());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;
use crate::permissions::{derive_permissions, has_permission};

/// Identities are compared as trimmed, lowercased emails everywhere.
pub fn normalize_identity(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmployeeId(pub String);

impl EmployeeId {
    pub fn generate() -> Self {
        Self(format!("EMP-{}", Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmployeeStatus {
    #[default]
    Active,
    Inactive,
}

impl EmployeeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "Active",
            Self::Inactive => "Inactive",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" | "suspended" => Some(Self::Inactive),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: EmployeeId,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: String,
    pub department: String,
    pub permissions: Vec<String>,
    pub status: EmployeeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Employee {
    pub fn identity(&self) -> String {
        normalize_identity(&self.email)
    }

    pub fn is_active(&self) -> bool {
        self.status == EmployeeStatus::Active
    }

    pub fn effective_permissions(&self) -> Vec<String> {
        derive_permissions(&self.role, &self.permissions)
    }

    pub fn can(&self, permission: &str) -> bool {
        has_permission(&self.effective_permissions(), permission)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEmployee {
    pub full_name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub role: String,
    pub department: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub status: EmployeeStatus,
}

impl NewEmployee {
    pub fn into_employee(self, now: DateTime<Utc>) -> Result<Employee, DomainError> {
        let mut problems = Vec::new();
        if self.full_name.trim().is_empty() {
            problems.push("full_name".to_owned());
        }
        if !self.email.contains('@') {
            problems.push("email".to_owned());
        }
        if self.role.trim().is_empty() {
            problems.push("role".to_owned());
        }
        if !problems.is_empty() {
            return Err(DomainError::InvalidFields(problems));
        }

        Ok(Employee {
            id: EmployeeId::generate(),
            full_name: self.full_name.trim().to_owned(),
            email: normalize_identity(&self.email),
            phone: self.phone.map(|phone| phone.trim().to_owned()).filter(|p| !p.is_empty()),
            role: self.role.trim().to_ascii_lowercase().replace(' ', "_"),
            department: self.department.trim().to_owned(),
            permissions: self.permissions,
            status: self.status,
            created_at: now,
            updated_at: now,
        })
    }
}

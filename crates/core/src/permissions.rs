use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub category: &'static str,
}

const CATALOG: &[Permission] = &[
    Permission {
        key: "requests:create",
        name: "Submit requests",
        description: "Submit money, expense and salary requests",
        category: "requests",
    },
    Permission {
        key: "requests:view",
        name: "View requests",
        description: "See requests from every department",
        category: "requests",
    },
    Permission {
        key: "requests:reject",
        name: "Reject requests",
        description: "Reject an open request with a reason",
        category: "requests",
    },
    Permission {
        key: "requests:archive",
        name: "Archive requests",
        description: "Move closed requests into the archive",
        category: "requests",
    },
    Permission {
        key: "finance:approve",
        name: "Finance approval",
        description: "Sign off the Finance stage",
        category: "approvals",
    },
    Permission {
        key: "admin:approve",
        name: "Admin approval",
        description: "Sign off the Admin stage",
        category: "approvals",
    },
    Permission {
        key: "employees:view",
        name: "View employees",
        description: "Read the employee directory",
        category: "employees",
    },
    Permission {
        key: "employees:manage",
        name: "Manage employees",
        description: "Create employees and change roles or status",
        category: "employees",
    },
    Permission {
        key: "verification:issue",
        name: "Issue verification codes",
        description: "Issue codes for printed documents",
        category: "verification",
    },
    Permission {
        key: "verification:revoke",
        name: "Revoke verification codes",
        description: "Revoke a previously issued code",
        category: "verification",
    },
    Permission {
        key: "reports:view",
        name: "View reports",
        description: "Read archived requests and summaries",
        category: "reports",
    },
];

pub fn all_permissions() -> &'static [Permission] {
    CATALOG
}

pub fn is_known_permission(key: &str) -> bool {
    let key = normalize_key(key);
    key == "*" || CATALOG.iter().any(|permission| permission.key == key)
}

/// Default grants for a role key. Unknown roles get nothing.
pub fn role_permissions(role: &str) -> &'static [&'static str] {
    match normalize_key(role).replace([' ', '-'], "_").as_str() {
        "managing_director" | "super_admin" => &["*"],
        "admin" | "administrator" => &[
            "requests:create",
            "requests:view",
            "requests:reject",
            "requests:archive",
            "admin:approve",
            "employees:view",
            "employees:manage",
            "verification:issue",
            "verification:revoke",
            "reports:view",
        ],
        "finance_manager" => &[
            "requests:create",
            "requests:view",
            "requests:reject",
            "requests:archive",
            "finance:approve",
            "reports:view",
        ],
        "accountant" => &["requests:create", "requests:view", "finance:approve", "reports:view"],
        "hr_manager" => &[
            "requests:create",
            "requests:view",
            "employees:view",
            "employees:manage",
            "verification:issue",
            "verification:revoke",
        ],
        "procurement_officer" | "quality_officer" => {
            &["requests:create", "requests:view", "employees:view"]
        }
        "staff" | "user" => &["requests:create"],
        _ => &[],
    }
}

/// Sorted, deduplicated union of role defaults and explicit grants.
pub fn derive_permissions(role: &str, explicit: &[String]) -> Vec<String> {
    role_permissions(role)
        .iter()
        .map(|key| (*key).to_owned())
        .chain(explicit.iter().map(|key| normalize_key(key)))
        .filter(|key| !key.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// `*` grants everything; `area:*` grants every key in that area.
pub fn has_permission(granted: &[String], key: &str) -> bool {
    let key = normalize_key(key);
    granted.iter().map(|grant| normalize_key(grant)).any(|grant| {
        grant == "*"
            || grant == key
            || grant
                .strip_suffix('*')
                .is_some_and(|prefix| prefix.ends_with(':') && key.starts_with(prefix))
    })
}

fn normalize_key(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{all_permissions, derive_permissions, has_permission, is_known_permission, role_permissions};

    #[test]
    fn every_role_grant_is_in_the_catalog() {
        for role in [
            "finance_manager",
            "accountant",
            "managing_director",
            "admin",
            "hr_manager",
            "procurement_officer",
            "quality_officer",
            "staff",
        ] {
            for key in role_permissions(role) {
                assert!(is_known_permission(key), "{role} grants unknown `{key}`");
            }
        }
        assert!(all_permissions().len() >= 10);
    }

    #[test]
    fn derived_permissions_are_sorted_and_deduplicated() {
        let derived = derive_permissions(
            "Accountant",
            &["reports:view".to_owned(), " Verification:Issue ".to_owned(), String::new()],
        );

        assert_eq!(
            derived,
            vec![
                "finance:approve".to_owned(),
                "reports:view".to_owned(),
                "requests:create".to_owned(),
                "requests:view".to_owned(),
                "verification:issue".to_owned(),
            ]
        );
    }

    #[test]
    fn wildcards_grant_whole_areas() {
        assert!(has_permission(&["*".to_owned()], "admin:approve"));
        assert!(has_permission(&["requests:*".to_owned()], "requests:archive"));
        assert!(!has_permission(&["requests:*".to_owned()], "finance:approve"));
        assert!(!has_permission(&["finance*".to_owned()], "finance:approve"));
        assert!(!has_permission(&[], "requests:create"));
    }

    #[test]
    fn unknown_roles_get_no_defaults() {
        assert!(role_permissions("driver").is_empty());
        assert_eq!(role_permissions("Finance Manager"), role_permissions("finance_manager"));
    }
}

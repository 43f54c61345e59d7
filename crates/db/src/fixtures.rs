use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

const SEED_EMPLOYEES: &[SeedEmployee] = &[
    SeedEmployee {
        id: "EMP-SEED-001",
        email: "grace.namutebi@kahawa.test",
        role: "finance_manager",
        active: true,
    },
    SeedEmployee {
        id: "EMP-SEED-002",
        email: "peter.ssemanda@kahawa.test",
        role: "accountant",
        active: true,
    },
    SeedEmployee {
        id: "EMP-SEED-003",
        email: "ruth.akello@kahawa.test",
        role: "admin",
        active: true,
    },
    SeedEmployee {
        id: "EMP-SEED-004",
        email: "samuel.mugisha@kahawa.test",
        role: "managing_director",
        active: true,
    },
    SeedEmployee {
        id: "EMP-SEED-005",
        email: "joel.kato@kahawa.test",
        role: "procurement_officer",
        active: true,
    },
    SeedEmployee {
        id: "EMP-SEED-006",
        email: "irene.nabirye@kahawa.test",
        role: "accountant",
        active: false,
    },
];

const SEED_REQUESTS: &[SeedRequest] = &[
    SeedRequest {
        id: "REQ-SEED00000001",
        state: "pending",
        description: "Cherry purchase advance awaiting both stages",
    },
    SeedRequest {
        id: "REQ-SEED00000002",
        state: "finance_approved",
        description: "Hulling screens signed by Finance, awaiting Admin",
    },
    SeedRequest {
        id: "REQ-SEED00000003",
        state: "fully_approved",
        description: "Salary advance signed by two different approvers",
    },
    SeedRequest {
        id: "REQ-SEED00000004",
        state: "rejected",
        description: "Catering expense rejected by Admin",
    },
];

const SEED_AUDIT_EVENT_IDS: &[&str] = &["ae-seed-001", "ae-seed-002"];

/// Demo directory plus one request in each interesting state.
pub struct SeedDataset;

impl SeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/seed_data.sql");

    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        Ok(SeedResult {
            employees_seeded: SEED_EMPLOYEES.len(),
            requests_seeded: SEED_REQUESTS
                .iter()
                .map(|request| RequestSeedInfo {
                    request_id: request.id,
                    state: request.state,
                    description: request.description,
                })
                .collect(),
        })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for employee in SEED_EMPLOYEES {
            let status = if employee.active { "Active" } else { "Inactive" };
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM employee WHERE id = ?1 AND email = ?2 AND role = ?3 AND status = ?4)",
            )
            .bind(employee.id)
            .bind(employee.email)
            .bind(employee.role)
            .bind(status)
            .fetch_one(pool)
            .await?;
            checks.push((employee.id, present == 1));
        }

        for request in SEED_REQUESTS {
            let present: i64 = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM funds_request WHERE id = ?1 AND state = ?2)",
            )
            .bind(request.id)
            .bind(request.state)
            .fetch_one(pool)
            .await?;
            checks.push((request.id, present == 1));
        }

        let distinct_approvers: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM funds_request
             WHERE id = 'REQ-SEED00000003'
               AND lower(finance_approved_by) <> lower(admin_approved_by)",
        )
        .fetch_one(pool)
        .await?;
        checks.push(("fully-approved-distinct-approvers", distinct_approvers == 1));

        let quoted_audits = sql_array_from_ids(SEED_AUDIT_EVENT_IDS);
        let audit_count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(1) FROM audit_event WHERE id IN {quoted_audits}"
        ))
        .fetch_one(pool)
        .await?;
        checks.push(("audit-events", audit_count == SEED_AUDIT_EVENT_IDS.len() as i64));

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let quoted_audits = sql_array_from_ids(SEED_AUDIT_EVENT_IDS);
        let quoted_requests =
            sql_array_from_ids(&SEED_REQUESTS.iter().map(|request| request.id).collect::<Vec<_>>());
        let quoted_employees = sql_array_from_ids(
            &SEED_EMPLOYEES.iter().map(|employee| employee.id).collect::<Vec<_>>(),
        );

        sqlx::query(&format!("DELETE FROM audit_event WHERE id IN {quoted_audits}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM notification_outbox WHERE request_id IN {quoted_requests}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM funds_request WHERE id IN {quoted_requests}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM employee WHERE id IN {quoted_employees}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedEmployee {
    id: &'static str,
    email: &'static str,
    role: &'static str,
    active: bool,
}

#[derive(Debug, Clone, Copy)]
struct SeedRequest {
    id: &'static str,
    state: &'static str,
    description: &'static str,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{id}'")).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub employees_seeded: usize,
    pub requests_seeded: Vec<RequestSeedInfo>,
}

#[derive(Debug)]
pub struct RequestSeedInfo {
    pub request_id: &'static str,
    pub state: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}

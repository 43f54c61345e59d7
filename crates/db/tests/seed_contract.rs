use std::collections::HashSet;

use kahawa_core::domain::request::RequestFilter;
use kahawa_core::flows::{ApprovalStage, ApprovalState};
use kahawa_core::notify::{normalize_phone, select_stage_approvers, DEFAULT_COUNTRY_CODE};
use kahawa_db::repositories::{
    EmployeeRepository, RequestRepository, SqlEmployeeRepository, SqlRequestRepository,
};
use kahawa_db::{connect_with_settings, migrations, SeedDataset};

type SeedContractTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

async fn seeded_pool() -> SeedContractTestResult<kahawa_db::DbPool> {
    let pool = connect_with_settings("sqlite::memory:", 1, 30)
        .await
        .map_err(|error| format!("connect: {error}"))?;
    migrations::run_pending(&pool).await.map_err(|error| format!("migrate: {error}"))?;
    SeedDataset::load(&pool).await.map_err(|error| format!("seed: {error}"))?;
    Ok(pool)
}

#[tokio::test]
async fn seeded_requests_respect_workflow_rules() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let requests = SqlRequestRepository::new(pool.clone())
        .list(&RequestFilter::default())
        .await
        .map_err(|error| format!("list requests: {error}"))?;
    let employees = SqlEmployeeRepository::new(pool.clone())
        .list()
        .await
        .map_err(|error| format!("list employees: {error}"))?;

    require_eq!(requests.len(), 4);
    let states: HashSet<ApprovalState> = requests.iter().map(|request| request.state).collect();
    require_eq!(states.len(), 4);

    for request in &requests {
        require!(request.is_consistent(), "{} state disagrees with its signoffs", request.id.0);

        let signers: Vec<String> =
            request.approver_identities().into_iter().map(|(_, identity)| identity).collect();
        let distinct: HashSet<&String> = signers.iter().collect();
        require!(
            distinct.len() == signers.len(),
            "{} was signed twice by the same person",
            request.id.0
        );
        require!(
            !signers.contains(&request.requester),
            "{} was approved by its own requester",
            request.id.0
        );

        for (stage, identity) in request.approver_identities() {
            let signer = employees.iter().find(|employee| employee.identity() == identity);
            require!(
                signer.is_some_and(|employee| employee.can(stage.required_permission())),
                "{identity} signed {} of {} without permission",
                stage.as_str(),
                request.id.0
            );
        }

        require!(
            employees.iter().any(|employee| employee.identity() == request.requester),
            "requester {} of {} is not in the directory",
            request.requester,
            request.id.0
        );
    }

    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn seeded_directory_supports_sms_routing() -> SeedContractTestResult {
    let pool = seeded_pool().await?;
    let employees = SqlEmployeeRepository::new(pool.clone())
        .list()
        .await
        .map_err(|error| format!("list employees: {error}"))?;

    for employee in employees.iter().filter(|employee| employee.is_active()) {
        let phone = employee
            .phone
            .as_deref()
            .ok_or_else(|| format!("active employee {} has no phone", employee.email))?;
        let normalized = normalize_phone(phone, DEFAULT_COUNTRY_CODE)
            .map_err(|error| format!("{}: {error}", employee.email))?;
        require!(normalized.starts_with("+256"), "{normalized} is not a Ugandan number");
        require_eq!(normalized.len(), 13);
    }

    let finance: Vec<String> =
        select_stage_approvers(&employees, ApprovalStage::Finance, "joel.kato@kahawa.test")
            .into_iter()
            .map(|employee| employee.identity())
            .collect();
    require_eq!(
        finance,
        vec![
            "grace.namutebi@kahawa.test".to_owned(),
            "peter.ssemanda@kahawa.test".to_owned(),
            "samuel.mugisha@kahawa.test".to_owned(),
        ]
    );

    let admin: Vec<String> =
        select_stage_approvers(&employees, ApprovalStage::Admin, "joel.kato@kahawa.test")
            .into_iter()
            .map(|employee| employee.identity())
            .collect();
    require_eq!(
        admin,
        vec!["ruth.akello@kahawa.test".to_owned(), "samuel.mugisha@kahawa.test".to_owned()]
    );

    pool.close().await;
    Ok(())
}

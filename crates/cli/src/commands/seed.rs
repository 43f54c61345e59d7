use kahawa_db::{RequestSeedInfo, SeedDataset};

use crate::commands::{load_config, open_migrated, runtime, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;

        let outcome = async {
            let seeded = SeedDataset::load(&pool)
                .await
                .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
            let verification = SeedDataset::verify(&pool)
                .await
                .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

            if !verification.all_present {
                return Err(("seed_verification", failed_checks_message(&verification.checks), 6u8));
            }
            Ok::<_, StepFailure>(seeded)
        }
        .await;

        pool.close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success(
            "seed",
            seed_summary(seeded.employees_seeded, &seeded.requests_seeded),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_summary(employees: usize, requests: &[RequestSeedInfo]) -> String {
    let lines: Vec<String> = requests
        .iter()
        .map(|request| {
            format!("  - {}: {} ({})", request.state, request.request_id, request.description)
        })
        .collect();
    format!(
        "demo data loaded: {employees} employees and {} funds requests:\n{}",
        requests.len(),
        lines.join("\n")
    )
}

fn failed_checks_message(checks: &[(&str, bool)]) -> String {
    let failed: Vec<&str> =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect();
    if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use kahawa_db::RequestSeedInfo;

    use super::{failed_checks_message, seed_summary};

    #[test]
    fn verification_message_names_failed_checks() {
        let checks = [
            ("EMP-SEED-001", true),
            ("REQ-SEED00000002", false),
            ("fully-approved-distinct-approvers", false),
        ];

        assert_eq!(
            failed_checks_message(&checks),
            "seed verification failed for checks: REQ-SEED00000002, fully-approved-distinct-approvers"
        );
    }

    #[test]
    fn verification_message_falls_back_to_generic_text() {
        assert_eq!(
            failed_checks_message(&[("audit-events", true)]),
            "some seed data failed to load"
        );
    }

    #[test]
    fn summary_lists_each_request_with_its_state() {
        let summary = seed_summary(
            6,
            &[RequestSeedInfo {
                request_id: "REQ-SEED00000001",
                state: "pending",
                description: "Cherry purchase advance awaiting both stages",
            }],
        );

        assert!(summary.starts_with("demo data loaded: 6 employees and 1 funds requests:"));
        assert!(summary
            .contains("  - pending: REQ-SEED00000001 (Cherry purchase advance awaiting both stages)"));
    }
}

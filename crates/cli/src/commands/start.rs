use kahawa_core::config::AppConfig;
use kahawa_db::repositories::SqlOutboxRepository;

use crate::commands::{load_config, open_migrated, runtime, CommandResult};

/// Checks what `kahawa-server` needs before it binds: a valid config and a
/// reachable, migrated database.
pub fn run() -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("start") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let backlog = SqlOutboxRepository::new(pool.clone()).backlog().await;
        pool.close().await;
        backlog.map_err(|error| ("db_connectivity", error.to_string(), 4u8))
    });

    match result {
        Ok(backlog) => CommandResult::success("start", preflight_summary(&config, backlog)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("start", error_class, message, exit_code)
        }
    }
}

fn preflight_summary(config: &AppConfig, backlog: i64) -> String {
    let sms = if config.sms.enabled { "provider" } else { "disabled (messages stay queued)" };
    format!(
        "preflight passed: listen on {}:{}, sms {sms}, {backlog} notification(s) waiting",
        config.server.bind_address, config.server.port
    )
}

use pollbot_db::migrations;

use crate::commands::{connect, finish, load_config, runtime, CommandResult, StepError, EXIT_MIGRATION};

const COMMAND: &str = "migrate";

pub fn run() -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime(COMMAND) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect(&config).await?;
        let migrated = migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION));
        pool.close().await;
        migrated?;
        Ok::<_, StepError>(format!("applied pending migrations to {}", config.database.url))
    });

    finish(COMMAND, result)
}

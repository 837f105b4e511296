use std::sync::Arc;

use pollbot_core::config::AppConfig;
use pollbot_core::ports::{NoopPollNotifier, PollNotifier};
use pollbot_core::reconciler::sweep_once;
use pollbot_core::service::PollService;
use pollbot_db::{migrations, SqlPollStore};
use pollbot_mattermost::MattermostClient;
use secrecy::SecretString;

use crate::commands::{
    connect, finish, load_config, runtime, CommandResult, StepError, EXIT_MAINTENANCE,
    EXIT_MIGRATION,
};

const COMMAND: &str = "sweep";

/// One expiry sweep followed by one purge pass, the same work the server's
/// background loops do on their schedule.
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
        let notifier = notifier(&config)?;
        let pool = connect(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

        let service = PollService::new(Arc::new(SqlPollStore::new(pool)), config.poll.clone());
        let outcome = maintain(&service, notifier.as_ref(), &config).await;
        if let Err(error) = service.close().await {
            return Err(("maintenance", error.to_string(), EXIT_MAINTENANCE));
        }
        outcome
    });

    finish(COMMAND, result)
}

async fn maintain(
    service: &PollService,
    notifier: &dyn PollNotifier,
    config: &AppConfig,
) -> Result<String, StepError> {
    let closed = sweep_once(service, notifier)
        .await
        .map_err(|error| ("maintenance", error.to_string(), EXIT_MAINTENANCE))?;
    let purged = service
        .purge_deleted_polls(config.poll.deleted_retention())
        .await
        .map_err(|error| ("maintenance", error.to_string(), EXIT_MAINTENANCE))?;

    Ok(format!("closed {closed} expired poll(s), purged {purged} deleted poll(s)"))
}

fn notifier(config: &AppConfig) -> Result<Box<dyn PollNotifier>, StepError> {
    match (&config.mattermost.url, &config.mattermost.bot_token) {
        (Some(url), Some(bot_token)) => MattermostClient::new(url.clone(), SecretString::clone(bot_token))
            .map(|client| Box::new(client) as Box<dyn PollNotifier>)
            .map_err(|error| ("notifier", error.to_string(), EXIT_MAINTENANCE)),
        _ => Ok(Box::new(NoopPollNotifier)),
    }
}

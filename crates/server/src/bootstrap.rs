use std::sync::Arc;

use pollbot_core::config::{AppConfig, ConfigError, LoadOptions};
use pollbot_core::ports::{NoopPollNotifier, NotifyError, PollNotifier};
use pollbot_core::service::PollService;
use pollbot_db::{connect_with_settings, migrations, DbPool, SqlPollStore};
use pollbot_mattermost::MattermostClient;
use secrecy::SecretString;
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: Arc<PollService>,
    pub notifier: Arc<dyn PollNotifier>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("mattermost client setup failed: {0}")]
    Notifier(#[source] NotifyError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let store = Arc::new(SqlPollStore::new(db_pool.clone()));
    let service = Arc::new(PollService::new(store, config.poll.clone()));
    let notifier = build_notifier(&config)?;

    Ok(Application { config, db_pool, service, notifier })
}

fn build_notifier(config: &AppConfig) -> Result<Arc<dyn PollNotifier>, BootstrapError> {
    match (&config.mattermost.url, &config.mattermost.bot_token) {
        (Some(url), Some(bot_token)) => {
            let client = MattermostClient::new(url.clone(), SecretString::clone(bot_token))
                .map_err(BootstrapError::Notifier)?;
            info!(
                event_name = "system.bootstrap.notifier",
                correlation_id = "bootstrap",
                transport = "mattermost",
                "expiry notifications enabled"
            );
            Ok(Arc::new(client))
        }
        _ => {
            info!(
                event_name = "system.bootstrap.notifier",
                correlation_id = "bootstrap",
                transport = "noop",
                "expiry notifications disabled, mattermost.url is not set"
            );
            Ok(Arc::new(NoopPollNotifier))
        }
    }
}

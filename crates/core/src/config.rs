use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub mattermost: MattermostConfig,
    pub poll: PollConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct MattermostConfig {
    /// Verification token Mattermost sends with every slash command.
    pub webhook_token: SecretString,
    /// Base URL of the Mattermost server. Channel notifications are disabled
    /// when unset.
    pub url: Option<String>,
    pub bot_token: Option<SecretString>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    pub default_duration_secs: u64,
    pub max_options: usize,
    pub sweep_interval_secs: u64,
    pub purge_interval_secs: u64,
    pub deleted_retention_days: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub mattermost_webhook_token: Option<String>,
    pub mattermost_url: Option<String>,
    pub mattermost_bot_token: Option<String>,
    pub poll_default_duration_secs: Option<u64>,
    pub poll_max_options: Option<usize>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("`{path}` is not valid TOML: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("config file `{0}` does not exist")]
    MissingConfigFile(PathBuf),
    #[error("config file references unset env var `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("config file has a `${{` without a closing `}}`")]
    UnterminatedInterpolation,
    #[error("env var `{key}` has an unusable value `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 86_400,
            max_options: 10,
            sweep_interval_secs: 60,
            purge_interval_secs: 86_400,
            deleted_retention_days: 30,
        }
    }
}

impl PollConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn deleted_retention(&self) -> Duration {
        Duration::from_secs(self.deleted_retention_days.saturating_mul(24 * 60 * 60))
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://pollbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            mattermost: MattermostConfig {
                webhook_token: String::new().into(),
                url: None,
                bot_token: None,
            },
            poll: PollConfig::default(),
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 8080,
                graceful_shutdown_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "logging.format `{other}` is not one of compact, pretty, json"
            ))),
        }
    }
}

impl AppConfig {
    /// Layers defaults, the TOML file, `POLLBOT_*` env vars and `options.overrides`,
    /// later layers winning, then validates the result.
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        match find_config_file(options.config_path.as_deref()) {
            Some(path) => config.merge_file(read_file_layer(&path)?),
            None if options.require_file => {
                return Err(ConfigError::MissingConfigFile(
                    options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_FILE)),
                ));
            }
            None => {}
        }

        config.merge_env()?;
        config.merge_overrides(options.overrides);
        config.validate()?;
        Ok(config)
    }

    /// Notifications need both the server URL and a bot token.
    pub fn notifications_enabled(&self) -> bool {
        self.mattermost.url.is_some() && self.mattermost.bot_token.is_some()
    }

    fn merge_file(&mut self, file: FileLayer) {
        let database = file.database.unwrap_or_default();
        merge(&mut self.database.url, database.url);
        merge(&mut self.database.max_connections, database.max_connections);
        merge(&mut self.database.timeout_secs, database.timeout_secs);

        let mattermost = file.mattermost.unwrap_or_default();
        merge(&mut self.mattermost.webhook_token, mattermost.webhook_token.map(SecretString::from));
        merge_some(&mut self.mattermost.url, mattermost.url);
        merge_some(&mut self.mattermost.bot_token, mattermost.bot_token.map(SecretString::from));

        let poll = file.poll.unwrap_or_default();
        merge(&mut self.poll.default_duration_secs, poll.default_duration_secs);
        merge(&mut self.poll.max_options, poll.max_options);
        merge(&mut self.poll.sweep_interval_secs, poll.sweep_interval_secs);
        merge(&mut self.poll.purge_interval_secs, poll.purge_interval_secs);
        merge(&mut self.poll.deleted_retention_days, poll.deleted_retention_days);

        let server = file.server.unwrap_or_default();
        merge(&mut self.server.bind_address, server.bind_address);
        merge(&mut self.server.port, server.port);
        merge(&mut self.server.graceful_shutdown_secs, server.graceful_shutdown_secs);

        let logging = file.logging.unwrap_or_default();
        merge(&mut self.logging.level, logging.level);
        merge(&mut self.logging.format, logging.format);
    }

    fn merge_env(&mut self) -> Result<(), ConfigError> {
        merge(&mut self.database.url, env_value(&["POLLBOT_DATABASE_URL"])?);
        merge(&mut self.database.max_connections, env_value(&["POLLBOT_DATABASE_MAX_CONNECTIONS"])?);
        merge(&mut self.database.timeout_secs, env_value(&["POLLBOT_DATABASE_TIMEOUT_SECS"])?);

        merge(
            &mut self.mattermost.webhook_token,
            env_value::<String>(&["POLLBOT_MATTERMOST_WEBHOOK_TOKEN"])?.map(SecretString::from),
        );
        merge_some(&mut self.mattermost.url, env_value(&["POLLBOT_MATTERMOST_URL"])?);
        merge_some(
            &mut self.mattermost.bot_token,
            env_value::<String>(&["POLLBOT_MATTERMOST_BOT_TOKEN"])?.map(SecretString::from),
        );

        merge(&mut self.poll.default_duration_secs, env_value(&["POLLBOT_POLL_DEFAULT_DURATION_SECS"])?);
        merge(&mut self.poll.max_options, env_value(&["POLLBOT_POLL_MAX_OPTIONS"])?);
        merge(&mut self.poll.sweep_interval_secs, env_value(&["POLLBOT_POLL_SWEEP_INTERVAL_SECS"])?);
        merge(&mut self.poll.purge_interval_secs, env_value(&["POLLBOT_POLL_PURGE_INTERVAL_SECS"])?);
        merge(
            &mut self.poll.deleted_retention_days,
            env_value(&["POLLBOT_POLL_DELETED_RETENTION_DAYS"])?,
        );

        merge(&mut self.server.bind_address, env_value(&["POLLBOT_SERVER_BIND_ADDRESS"])?);
        merge(&mut self.server.port, env_value(&["POLLBOT_SERVER_PORT"])?);
        merge(
            &mut self.server.graceful_shutdown_secs,
            env_value(&["POLLBOT_SERVER_GRACEFUL_SHUTDOWN_SECS"])?,
        );

        merge(&mut self.logging.level, env_value(&["POLLBOT_LOGGING_LEVEL", "POLLBOT_LOG_LEVEL"])?);
        merge(&mut self.logging.format, env_value(&["POLLBOT_LOGGING_FORMAT", "POLLBOT_LOG_FORMAT"])?);
        Ok(())
    }

    fn merge_overrides(&mut self, overrides: ConfigOverrides) {
        merge(&mut self.database.url, overrides.database_url);
        merge(&mut self.logging.level, overrides.log_level);
        merge(&mut self.mattermost.webhook_token, overrides.mattermost_webhook_token.map(SecretString::from));
        merge_some(&mut self.mattermost.url, overrides.mattermost_url);
        merge_some(&mut self.mattermost.bot_token, overrides.mattermost_bot_token.map(SecretString::from));
        merge(&mut self.poll.default_duration_secs, overrides.poll_default_duration_secs);
        merge(&mut self.poll.max_options, overrides.poll_max_options);
        merge(&mut self.server.port, overrides.server_port);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let database = &self.database;
        let url = database.url.trim();
        require(
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:",
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...` or `:memory:`)",
        )?;
        require(database.max_connections > 0, "database.max_connections must be greater than zero")?;
        require(
            (1..=300).contains(&database.timeout_secs),
            "database.timeout_secs must be between 1 and 300",
        )?;

        let mattermost = &self.mattermost;
        require(
            !mattermost.webhook_token.expose_secret().trim().is_empty(),
            "mattermost.webhook_token is required. Copy it from Integrations > Slash Commands > /poll in Mattermost",
        )?;
        if let Some(url) = &mattermost.url {
            require(
                url.starts_with("http://") || url.starts_with("https://"),
                "mattermost.url must start with http:// or https://",
            )?;
            require(
                mattermost.bot_token.as_ref().is_some_and(|token| !token.expose_secret().trim().is_empty()),
                "mattermost.bot_token is required when mattermost.url is set",
            )?;
        }

        let poll = &self.poll;
        require(poll.default_duration_secs > 0, "poll.default_duration_secs must be greater than zero")?;
        require(poll.max_options >= 2, "poll.max_options must be at least 2")?;
        require(
            poll.sweep_interval_secs > 0 && poll.purge_interval_secs > 0,
            "poll.sweep_interval_secs and poll.purge_interval_secs must be greater than zero",
        )?;
        require(poll.deleted_retention_days > 0, "poll.deleted_retention_days must be greater than zero")?;

        require(self.server.port > 0, "server.port must be greater than zero")?;
        require(
            self.server.graceful_shutdown_secs > 0,
            "server.graceful_shutdown_secs must be greater than zero",
        )?;

        require(
            matches!(
                self.logging.level.trim().to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            ),
            "logging.level must be one of trace, debug, info, warn, error",
        )
    }
}

const DEFAULT_FILE: &str = "pollbot.toml";

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn merge_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn require(condition: bool, message: &str) -> Result<(), ConfigError> {
    if condition {
        Ok(())
    } else {
        Err(ConfigError::Validation(message.to_owned()))
    }
}

/// First non-blank value among `keys`, parsed. Later keys are aliases.
fn env_value<T: std::str::FromStr>(keys: &[&str]) -> Result<Option<T>, ConfigError> {
    let found = keys.iter().find_map(|key| {
        env::var(key).ok().filter(|value| !value.trim().is_empty()).map(|value| (*key, value))
    });

    match found {
        None => Ok(None),
        Some((key, raw)) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_owned(), value: raw }),
    }
}

fn find_config_file(explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => path.exists().then(|| path.to_path_buf()),
        None => [PathBuf::from(DEFAULT_FILE), Path::new("config").join(DEFAULT_FILE)]
            .into_iter()
            .find(|candidate| candidate.exists()),
    }
}

fn read_file_layer(path: &Path) -> Result<FileLayer, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    let expanded = expand_env_refs(&raw)?;

    toml::from_str(&expanded).map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

/// Replaces every `${NAME}` with the value of env var `NAME`.
fn expand_env_refs(input: &str) -> Result<String, ConfigError> {
    let mut expanded = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        expanded.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let name = &after[..end];
        let value =
            env::var(name).map_err(|_| ConfigError::MissingEnvInterpolation { var: name.to_owned() })?;
        expanded.push_str(&value);
        rest = &after[end + 1..];
    }

    expanded.push_str(rest);
    Ok(expanded)
}

#[derive(Debug, Default, Deserialize)]
struct FileLayer {
    database: Option<DatabaseLayer>,
    mattermost: Option<MattermostLayer>,
    poll: Option<PollLayer>,
    server: Option<ServerLayer>,
    logging: Option<LoggingLayer>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabaseLayer {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct MattermostLayer {
    webhook_token: Option<String>,
    url: Option<String>,
    bot_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PollLayer {
    default_duration_secs: Option<u64>,
    max_options: Option<usize>,
    sweep_interval_secs: Option<u64>,
    purge_interval_secs: Option<u64>,
    deleted_retention_days: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerLayer {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingLayer {
    level: Option<String>,
    format: Option<LogFormat>,
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use pollbot_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

const COMMAND: &str = "config";

/// One reported setting: key path, rendered value, env vars that can set it.
struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run() -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = config_file_path.as_deref().and_then(|path| load_config_file_doc(path).ok());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source =
            field_source(field.key, field.env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(field.key, &field.value, source));
    }

    CommandResult::success(COMMAND, lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let field = |key: &'static str, value: String, env_keys: &'static [&'static str]| Field {
        key,
        value,
        env_keys,
    };

    vec![
        field("database.url", config.database.url.clone(), &["POLLBOT_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["POLLBOT_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["POLLBOT_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "mattermost.webhook_token",
            redact_token(&config.mattermost.webhook_token),
            &["POLLBOT_MATTERMOST_WEBHOOK_TOKEN"],
        ),
        field(
            "mattermost.url",
            config.mattermost.url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["POLLBOT_MATTERMOST_URL"],
        ),
        field(
            "mattermost.bot_token",
            config.mattermost.bot_token.as_ref().map(redact_token).unwrap_or_else(|| "<unset>".to_string()),
            &["POLLBOT_MATTERMOST_BOT_TOKEN"],
        ),
        field(
            "poll.default_duration_secs",
            config.poll.default_duration_secs.to_string(),
            &["POLLBOT_POLL_DEFAULT_DURATION_SECS"],
        ),
        field("poll.max_options", config.poll.max_options.to_string(), &["POLLBOT_POLL_MAX_OPTIONS"]),
        field(
            "poll.sweep_interval_secs",
            config.poll.sweep_interval_secs.to_string(),
            &["POLLBOT_POLL_SWEEP_INTERVAL_SECS"],
        ),
        field(
            "poll.purge_interval_secs",
            config.poll.purge_interval_secs.to_string(),
            &["POLLBOT_POLL_PURGE_INTERVAL_SECS"],
        ),
        field(
            "poll.deleted_retention_days",
            config.poll.deleted_retention_days.to_string(),
            &["POLLBOT_POLL_DELETED_RETENTION_DAYS"],
        ),
        field("server.bind_address", config.server.bind_address.clone(), &["POLLBOT_SERVER_BIND_ADDRESS"]),
        field("server.port", config.server.port.to_string(), &["POLLBOT_SERVER_PORT"]),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["POLLBOT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field("logging.level", config.logging.level.clone(), &["POLLBOT_LOGGING_LEVEL", "POLLBOT_LOG_LEVEL"]),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["POLLBOT_LOGGING_FORMAT", "POLLBOT_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("pollbot.toml"), PathBuf::from("config/pollbot.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> anyhow::Result<Value> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    raw.parse::<Value>().with_context(|| format!("parsing {}", path.display()))
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Keeps the first four characters of long tokens so operators can tell
/// which one is loaded.
fn redact_token(token: &SecretString) -> String {
    let trimmed = token.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.char_indices().nth(4) {
        Some((cut, _)) if trimmed.chars().count() > 8 => format!("{}***", &trimmed[..cut]),
        _ => "<redacted>".to_string(),
    }
}

use std::env;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use pollbot_cli::commands::{config, migrate, sweep};
use pollbot_db::{connect, migrations};
use serde_json::Value;

const VALID_ENV: [(&str, &str); 2] =
    [("POLLBOT_MATTERMOST_WEBHOOK_TOKEN", "hook-test-token"), ("POLLBOT_DATABASE_URL", "sqlite::memory:")];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(&VALID_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["error_class"], Value::Null);
    });
}

#[test]
fn migrate_returns_config_failure_without_webhook_token() {
    with_env(&[("POLLBOT_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn config_reports_sources_and_redacts_tokens() {
    with_env(&[VALID_ENV[0], VALID_ENV[1], ("POLLBOT_LOG_LEVEL", "debug")], || {
        let result = config::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "config");
        let message = payload["message"].as_str().unwrap_or_default();

        assert!(message.contains(
            "- mattermost.webhook_token = hook*** (source: env (POLLBOT_MATTERMOST_WEBHOOK_TOKEN))"
        ));
        assert!(!message.contains("hook-test-token"));
        assert!(message.contains("- mattermost.url = <unset> (source: default)"));
        assert!(message.contains("- logging.level = debug (source: env (POLLBOT_LOG_LEVEL))"));
        assert!(message.contains("- poll.deleted_retention_days = 30 (source: default)"));
    });
}

#[test]
fn sweep_closes_expired_and_purges_old_deleted_polls() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database_url = format!("sqlite://{}", dir.path().join("pollbot.db").display());
    seed_polls(&database_url);

    with_env(&[VALID_ENV[0], ("POLLBOT_DATABASE_URL", database_url.as_str())], || {
        let result = sweep::run();
        assert_eq!(result.exit_code, 0, "unexpected output: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "sweep");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["message"], "closed 1 expired poll(s), purged 1 deleted poll(s)");
    });

    let statuses = poll_statuses(&database_url);
    assert_eq!(
        statuses,
        vec![("expired".to_owned(), "CLOSED".to_owned()), ("fresh".to_owned(), "ACTIVE".to_owned())]
    );
}

#[test]
fn sweep_reports_database_failure() {
    with_env(&[VALID_ENV[0], ("POLLBOT_DATABASE_URL", "sqlite:///nonexistent-dir/pollbot.db")], || {
        let result = sweep::run();
        assert_eq!(result.exit_code, 4);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "db_connectivity");
    });
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs() as i64).unwrap_or_default()
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime")
        .block_on(future)
}

fn seed_polls(database_url: &str) {
    block_on(async {
        let pool = connect(database_url).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrate");

        let now = now();
        let rows = [
            ("expired", now - 7200, now - 3600, "ACTIVE"),
            ("fresh", now, now + 3600, "ACTIVE"),
            ("long-gone", now - 40 * 86_400, now - 39 * 86_400, "DELETED"),
        ];
        for (id, created_at, expires_at, status) in rows {
            sqlx::query(
                "INSERT INTO poll (id, question, options_json, created_by, channel_id, created_at, expires_at, status)
                 VALUES (?, 'Lunch?', '[\"A\",\"B\"]', 'u1', 'c1', ?, ?, ?)",
            )
            .bind(id)
            .bind(created_at)
            .bind(expires_at)
            .bind(status)
            .execute(&pool)
            .await
            .expect("insert poll");
        }
        pool.close().await;
    });
}

fn poll_statuses(database_url: &str) -> Vec<(String, String)> {
    block_on(async {
        let pool = connect(database_url).await.expect("connect");
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, status FROM poll ORDER BY id")
            .fetch_all(&pool)
            .await
            .expect("statuses");
        pool.close().await;
        rows
    })
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "POLLBOT_DATABASE_URL",
        "POLLBOT_DATABASE_MAX_CONNECTIONS",
        "POLLBOT_DATABASE_TIMEOUT_SECS",
        "POLLBOT_MATTERMOST_WEBHOOK_TOKEN",
        "POLLBOT_MATTERMOST_URL",
        "POLLBOT_MATTERMOST_BOT_TOKEN",
        "POLLBOT_POLL_DEFAULT_DURATION_SECS",
        "POLLBOT_POLL_MAX_OPTIONS",
        "POLLBOT_POLL_SWEEP_INTERVAL_SECS",
        "POLLBOT_POLL_PURGE_INTERVAL_SECS",
        "POLLBOT_POLL_DELETED_RETENTION_DAYS",
        "POLLBOT_SERVER_BIND_ADDRESS",
        "POLLBOT_SERVER_PORT",
        "POLLBOT_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "POLLBOT_LOGGING_LEVEL",
        "POLLBOT_LOGGING_FORMAT",
        "POLLBOT_LOG_LEVEL",
        "POLLBOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

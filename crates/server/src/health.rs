use std::time::Instant;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use pollbot_db::{connection, DbPool};
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Ready,
    Degraded,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatabaseProbe {
    pub status: Readiness,
    pub latency_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    pub status: Readiness,
    pub service: ServiceInfo,
    pub database: DatabaseProbe,
    pub checked_at: DateTime<Utc>,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(db_pool)
}

/// 200 while the database answers, 503 otherwise. The body is the same
/// report either way.
pub async fn health(State(db_pool): State<DbPool>) -> (StatusCode, Json<HealthReport>) {
    let database = probe(&db_pool).await;
    let status = database.status;

    let report = HealthReport {
        status,
        service: ServiceInfo { name: "pollbot-server", version: env!("CARGO_PKG_VERSION") },
        database,
        checked_at: Utc::now(),
    };

    let code = match status {
        Readiness::Ready => StatusCode::OK,
        Readiness::Degraded => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(report))
}

async fn probe(db_pool: &DbPool) -> DatabaseProbe {
    let started = Instant::now();
    let result = connection::ping(db_pool).await;
    let latency_ms = started.elapsed().as_millis();

    match result {
        Ok(()) => DatabaseProbe { status: Readiness::Ready, latency_ms, error: None },
        Err(error) => {
            tracing::warn!(event_name = "http.health.db_unreachable", error = %error, "health probe failed");
            DatabaseProbe { status: Readiness::Degraded, latency_ms, error: Some(error.to_string()) }
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::State, http::StatusCode, Json};
    use pollbot_db::connect_with_settings;

    use super::{health, Readiness};

    #[tokio::test]
    async fn reachable_database_is_ready() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");

        let (code, Json(report)) = health(State(pool.clone())).await;

        assert_eq!(code, StatusCode::OK);
        assert_eq!(report.status, Readiness::Ready);
        assert_eq!(report.database.error, None);
        assert_eq!(report.service.name, "pollbot-server");

        pool.close().await;
    }

    #[tokio::test]
    async fn closed_pool_degrades_the_service() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("connect");
        pool.close().await;

        let (code, Json(report)) = health(State(pool)).await;

        assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(report.status, Readiness::Degraded);
        assert_eq!(report.database.status, Readiness::Degraded);
        assert!(report.database.error.is_some());
    }
}

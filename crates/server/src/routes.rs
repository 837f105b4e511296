use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use pollbot_core::service::PollService;
use pollbot_db::DbPool;
use pollbot_mattermost::responses;
use pollbot_mattermost::{CommandRouter, SlashCommandPayload};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::health;

#[derive(Clone)]
pub struct CommandState {
    router: CommandRouter<PollService>,
    webhook_token: Arc<SecretString>,
}

impl CommandState {
    pub fn new(service: Arc<PollService>, webhook_token: SecretString) -> Self {
        Self { router: CommandRouter::new(service), webhook_token: Arc::new(webhook_token) }
    }
}

/// `/command` for Mattermost plus `/health`.
pub fn app(state: CommandState, db_pool: DbPool) -> Router {
    Router::new()
        .route("/command", post(command))
        .with_state(state)
        .merge(health::router(db_pool))
}

/// Compares in constant time for equal-length inputs.
fn token_matches(presented: &str, expected: &SecretString) -> bool {
    presented.as_bytes().ct_eq(expected.expose_secret().as_bytes()).into()
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(responses::error_response(message))).into_response()
}

pub async fn command(
    State(state): State<CommandState>,
    form: Result<Form<SlashCommandPayload>, FormRejection>,
) -> Response {
    let request_id = Uuid::new_v4().to_string();

    let Form(payload) = match form {
        Ok(form) => form,
        Err(rejection) => {
            warn!(
                event_name = "http.command.bad_form",
                correlation_id = %request_id,
                error = %rejection,
                "slash command form could not be decoded"
            );
            return reject(StatusCode::BAD_REQUEST, "invalid request format");
        }
    };

    let missing = payload.missing_fields();
    if !missing.is_empty() {
        warn!(
            event_name = "http.command.missing_fields",
            correlation_id = %request_id,
            missing = ?missing,
            "slash command is missing required fields"
        );
        return reject(StatusCode::BAD_REQUEST, &format!("missing required fields: {}", missing.join(", ")));
    }

    if !token_matches(&payload.token, &state.webhook_token) {
        warn!(
            event_name = "http.command.bad_token",
            correlation_id = %request_id,
            user_id = %payload.user_id,
            team_id = %payload.team_id,
            "slash command token mismatch"
        );
        return reject(StatusCode::UNAUTHORIZED, "invalid token");
    }

    info!(
        event_name = "http.command.received",
        correlation_id = %request_id,
        user_id = %payload.user_id,
        channel_id = %payload.channel_id,
        command = %payload.command,
        "slash command received"
    );

    let context = payload.context(request_id);
    let response = state.router.route(&payload.text, &context).await;
    (StatusCode::OK, Json(response)).into_response()
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;

use pollbot_core::domain::poll::Poll;
use pollbot_core::ports::{NotifyError, PollNotifier};

use crate::responses;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct CreatePost<'a> {
    channel_id: &'a str,
    message: &'a str,
}

/// Minimal Mattermost REST client, authenticated as the bot account.
pub struct MattermostClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: SecretString,
}

impl MattermostClient {
    pub fn new(base_url: impl Into<String>, bot_token: SecretString) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|error| NotifyError::Delivery(error.to_string()))?;

        Ok(Self { http, base_url: base_url.into().trim_end_matches('/').to_owned(), bot_token })
    }

    /// Posts `message` to a channel. Mattermost answers `201 Created` on success.
    pub async fn create_post(&self, channel_id: &str, message: &str) -> Result<(), NotifyError> {
        let url = format!("{}/api/v4/posts", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.bot_token.expose_secret())
            .json(&CreatePost { channel_id, message })
            .send()
            .await
            .map_err(|error| NotifyError::Delivery(error.to_string()))?;

        let status = response.status();
        if status != StatusCode::CREATED {
            return Err(NotifyError::Rejected(status.as_u16()));
        }

        debug!(event_name = "mattermost.post_created", channel_id = %channel_id, "channel post created");
        Ok(())
    }
}

#[async_trait]
impl PollNotifier for MattermostClient {
    async fn poll_expired(&self, poll: &Poll) -> Result<(), NotifyError> {
        self.create_post(&poll.channel_id, &responses::poll_expired_notice(poll)).await
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use serde_json::json;

    use pollbot_core::domain::poll::{Poll, PollId};
    use pollbot_core::ports::{NotifyError, PollNotifier};

    use super::MattermostClient;

    fn client(base_url: String) -> MattermostClient {
        MattermostClient::new(base_url, "bot-token".to_owned().into()).expect("client")
    }

    #[tokio::test]
    async fn posts_expiry_notice_to_poll_channel() {
        let server = MockServer::start();
        let mut poll = Poll::new("Lunch?", vec!["A".to_owned(), "B".to_owned()], "u1", "c-42", 60, 10)
            .expect("poll");
        poll.id = PollId::from("P-1");

        let post_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v4/posts")
                .header("authorization", "Bearer bot-token")
                .json_body(json!({
                    "channel_id": "c-42",
                    "message": "Poll time ended: \"Lunch?\". Use `/poll results P-1` to see the final results."
                }));
            then.status(201).json_body(json!({"id": "post-1"}));
        });

        client(server.base_url()).poll_expired(&poll).await.expect("notify");

        post_mock.assert();
    }

    #[tokio::test]
    async fn non_created_status_is_rejected() {
        let server = MockServer::start();
        let post_mock = server.mock(|when, then| {
            when.method(POST).path("/api/v4/posts");
            then.status(403);
        });

        let result = client(format!("{}/", server.base_url())).create_post("c1", "hi").await;

        post_mock.assert();
        assert_eq!(result, Err(NotifyError::Rejected(403)));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_delivery_error() {
        let result = client("http://127.0.0.1:1".to_owned()).create_post("c1", "hi").await;

        assert!(matches!(result, Err(NotifyError::Delivery(_))));
    }
}

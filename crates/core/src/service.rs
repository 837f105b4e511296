//! Poll lifecycle operations.
//!
//! [`PollService`] is stateless: every call goes through the [`PollStore`],
//! which owns cross-request consistency. Reads may write: [`PollService::get_poll`]
//! closes an ACTIVE poll it finds past its expiry before returning it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::domain::poll::{Poll, PollId, PollStatus};
use crate::domain::vote::Vote;
use crate::errors::PollError;
use crate::ports::PollStore;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionTally {
    pub index: usize,
    pub text: String,
    pub votes: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct VoteResults {
    pub poll_id: PollId,
    pub question: String,
    /// Number of stored votes, including any that point past the option list.
    pub total_votes: u64,
    pub options: Vec<OptionTally>,
    pub is_active: bool,
    pub remaining_time: Option<String>,
}

impl VoteResults {
    /// Options holding the highest count. Empty when nobody voted.
    pub fn leaders(&self) -> Vec<&OptionTally> {
        let top = self.options.iter().map(|option| option.votes).max().unwrap_or(0);
        if top == 0 {
            return Vec::new();
        }
        self.options.iter().filter(|option| option.votes == top).collect()
    }
}

#[derive(Clone)]
pub struct PollService {
    store: Arc<dyn PollStore>,
    config: PollConfig,
}

impl PollService {
    pub fn new(store: Arc<dyn PollStore>, config: PollConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Creates an ACTIVE poll. A non-positive `duration_secs` falls back to
    /// the configured default.
    pub async fn create_poll(
        &self,
        question: &str,
        options: Vec<String>,
        created_by: &str,
        channel_id: &str,
        duration_secs: i64,
    ) -> Result<Poll, PollError> {
        let duration_secs = if duration_secs <= 0 {
            i64::try_from(self.config.default_duration_secs).unwrap_or(i64::MAX)
        } else {
            duration_secs
        };

        if options.len() > self.config.max_options {
            return Err(PollError::TooManyOptions { max: self.config.max_options });
        }

        let poll = Poll::new(
            question,
            options,
            created_by,
            channel_id,
            duration_secs,
            self.config.max_options,
        )?;
        self.store.create_poll(&poll).await?;

        info!(
            event_name = "poll.created",
            poll_id = %poll.id,
            user_id = %poll.created_by,
            channel_id = %poll.channel_id,
            options = poll.options.len(),
            expires_at = poll.expires_at,
            "poll created"
        );
        Ok(poll)
    }

    /// Fetches a poll, closing it first when it is ACTIVE and past expiry.
    /// If that close fails the poll is returned still marked ACTIVE.
    pub async fn get_poll(&self, id: &PollId) -> Result<Poll, PollError> {
        let mut poll = self.store.get_poll(id).await?;

        if poll.is_active() && poll.has_expired() {
            match self.store.update_poll_status(&poll.id, PollStatus::Closed).await {
                Ok(()) => {
                    poll.close();
                    info!(event_name = "poll.closed_on_read", poll_id = %poll.id, "expired poll closed");
                }
                Err(error) => {
                    warn!(
                        event_name = "poll.close_on_read_failed",
                        poll_id = %poll.id,
                        error = %error,
                        "failed to close expired poll"
                    );
                }
            }
        }

        Ok(poll)
    }

    pub async fn vote(&self, poll_id: &PollId, user_id: &str, option_idx: i64) -> Result<(), PollError> {
        let poll = self.get_poll(poll_id).await?;
        if !poll.is_active() {
            return Err(PollError::PollClosed);
        }
        if !poll.is_valid_option_index(option_idx) {
            return Err(PollError::InvalidOption);
        }

        let vote = Vote::new(poll.id.clone(), user_id, option_idx);
        self.store.add_vote(&vote).await.map_err(|error| error.context("error adding vote"))?;

        debug!(
            event_name = "poll.vote_recorded",
            poll_id = %poll.id,
            user_id = %user_id,
            option_idx,
            "vote recorded"
        );
        Ok(())
    }

    pub async fn calculate_results(&self, poll: &Poll) -> Result<VoteResults, PollError> {
        let votes = self
            .store
            .get_votes_by_poll_id(&poll.id)
            .await
            .map_err(|error| error.context("error getting votes"))?;

        let mut counts = vec![0_u64; poll.options.len()];
        for vote in &votes {
            let slot = usize::try_from(vote.option_idx).ok().and_then(|idx| counts.get_mut(idx));
            if let Some(count) = slot {
                *count += 1;
            }
        }

        let options = poll
            .options
            .iter()
            .zip(counts)
            .enumerate()
            .map(|(index, (text, votes))| OptionTally { index, text: text.clone(), votes })
            .collect();

        Ok(VoteResults {
            poll_id: poll.id.clone(),
            question: poll.question.clone(),
            total_votes: votes.len() as u64,
            options,
            is_active: poll.is_active(),
            remaining_time: poll.is_active().then(|| poll.remaining_time()),
        })
    }

    pub async fn get_results(&self, poll_id: &PollId) -> Result<VoteResults, PollError> {
        let poll = self.get_poll(poll_id).await?;
        self.calculate_results(&poll).await
    }

    /// Closes a poll on its creator's request and returns the final tally.
    pub async fn end_poll(&self, poll_id: &PollId, user_id: &str) -> Result<VoteResults, PollError> {
        let mut poll = self.get_poll(poll_id).await?;
        if !poll.is_active() {
            return Err(PollError::PollClosed);
        }
        if !poll.can_be_manipulated_by(user_id) {
            return Err(PollError::NotPollCreator);
        }

        self.store
            .update_poll_status(&poll.id, PollStatus::Closed)
            .await
            .map_err(|error| error.context("error closing poll"))?;
        poll.close();

        info!(event_name = "poll.ended", poll_id = %poll.id, user_id = %user_id, "poll ended by creator");
        self.calculate_results(&poll).await
    }

    /// Soft-deletes a poll. Allowed for the creator whether ACTIVE or CLOSED.
    pub async fn delete_poll(&self, poll_id: &PollId, user_id: &str) -> Result<(), PollError> {
        let poll = self.get_poll(poll_id).await?;
        if !poll.can_be_manipulated_by(user_id) {
            return Err(PollError::NotPollCreator);
        }

        self.store.delete_poll(&poll.id).await.map_err(|error| error.context("error deleting poll"))?;

        info!(event_name = "poll.deleted", poll_id = %poll.id, user_id = %user_id, "poll deleted");
        Ok(())
    }

    /// Closes every ACTIVE poll past its expiry and returns the ones that
    /// were closed. Per-poll failures are logged and skipped.
    pub async fn finish_expired_polls(&self) -> Result<Vec<Poll>, PollError> {
        let expired = self
            .store
            .get_expired_active_polls()
            .await
            .map_err(|error| error.context("error getting expired polls"))?;

        if expired.is_empty() {
            debug!(event_name = "poll.sweep_idle", "no expired polls to close");
            return Ok(Vec::new());
        }

        let mut closed = Vec::with_capacity(expired.len());
        for mut poll in expired {
            match self.store.update_poll_status(&poll.id, PollStatus::Closed).await {
                Ok(()) => {
                    poll.close();
                    info!(event_name = "poll.expired", poll_id = %poll.id, "expired poll closed");
                    closed.push(poll);
                }
                Err(error) => {
                    warn!(
                        event_name = "poll.expire_failed",
                        poll_id = %poll.id,
                        error = %error,
                        "failed to close expired poll"
                    );
                }
            }
        }

        Ok(closed)
    }

    pub async fn purge_deleted_polls(&self, older_than: Duration) -> Result<u64, PollError> {
        let purged = self
            .store
            .purge_deleted_polls(older_than)
            .await
            .map_err(|error| error.context("error purging deleted polls"))?;

        if purged > 0 {
            info!(event_name = "poll.purged", purged, "deleted polls purged");
        }
        Ok(purged)
    }

    pub async fn list_channel_polls(&self, channel_id: &str) -> Result<Vec<Poll>, PollError> {
        self.store.get_polls_by_channel(channel_id).await
    }

    pub async fn list_user_polls(&self, user_id: &str) -> Result<Vec<Poll>, PollError> {
        self.store.get_polls_by_creator(user_id).await
    }

    pub async fn user_vote(&self, poll_id: &PollId, user_id: &str) -> Result<Vote, PollError> {
        self.store.get_vote(poll_id, user_id).await
    }

    pub async fn close(&self) -> Result<(), PollError> {
        self.store.close().await
    }
}

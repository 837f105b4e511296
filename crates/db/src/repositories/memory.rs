use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;

use pollbot_core::domain::poll::{Poll, PollId, PollStatus};
use pollbot_core::domain::vote::Vote;
use pollbot_core::errors::PollError;
use pollbot_core::ports::PollStore;

use super::QUERY_LIMIT;

#[derive(Default)]
struct State {
    polls: HashMap<String, Poll>,
    /// Keyed by `(poll_id, user_id)`.
    votes: HashMap<(String, String), Vote>,
}

/// [`PollStore`] kept in process memory. A single write lock covers each
/// vote check-and-insert, so duplicate votes cannot race.
#[derive(Default)]
pub struct InMemoryPollStore {
    state: RwLock<State>,
}

fn newest_first(mut polls: Vec<Poll>) -> Vec<Poll> {
    polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    polls.truncate(QUERY_LIMIT as usize);
    polls
}

#[async_trait::async_trait]
impl PollStore for InMemoryPollStore {
    async fn create_poll(&self, poll: &Poll) -> Result<(), PollError> {
        let mut state = self.state.write().await;
        state.polls.insert(poll.id.0.clone(), poll.clone());
        Ok(())
    }

    async fn get_poll(&self, id: &PollId) -> Result<Poll, PollError> {
        let state = self.state.read().await;
        state.polls.get(&id.0).cloned().ok_or(PollError::PollNotFound)
    }

    async fn update_poll_status(&self, id: &PollId, status: PollStatus) -> Result<(), PollError> {
        let mut state = self.state.write().await;
        let poll = state.polls.get_mut(&id.0).ok_or(PollError::PollNotFound)?;
        if poll.status.can_transition_to(status) {
            poll.status = status;
        }
        Ok(())
    }

    async fn purge_deleted_polls(&self, older_than: Duration) -> Result<u64, PollError> {
        let older_than = i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(older_than);

        let mut state = self.state.write().await;
        let doomed: Vec<String> = state
            .polls
            .values()
            .filter(|poll| poll.status == PollStatus::Deleted && poll.created_at <= cutoff)
            .map(|poll| poll.id.0.clone())
            .collect();

        for id in &doomed {
            state.polls.remove(id);
        }
        state.votes.retain(|(poll_id, _), _| !doomed.contains(poll_id));

        Ok(doomed.len() as u64)
    }

    async fn get_polls_by_channel(&self, channel_id: &str) -> Result<Vec<Poll>, PollError> {
        let state = self.state.read().await;
        Ok(newest_first(
            state
                .polls
                .values()
                .filter(|poll| poll.channel_id == channel_id && poll.status != PollStatus::Deleted)
                .cloned()
                .collect(),
        ))
    }

    async fn get_polls_by_creator(&self, user_id: &str) -> Result<Vec<Poll>, PollError> {
        let state = self.state.read().await;
        Ok(newest_first(
            state
                .polls
                .values()
                .filter(|poll| poll.created_by == user_id && poll.status != PollStatus::Deleted)
                .cloned()
                .collect(),
        ))
    }

    async fn get_expired_active_polls(&self) -> Result<Vec<Poll>, PollError> {
        let now = Utc::now().timestamp();
        let state = self.state.read().await;
        let mut expired: Vec<Poll> = state
            .polls
            .values()
            .filter(|poll| poll.is_active() && poll.expires_at < now)
            .cloned()
            .collect();
        expired.sort_by_key(|poll| poll.expires_at);
        expired.truncate(QUERY_LIMIT as usize);
        Ok(expired)
    }

    async fn get_vote(&self, poll_id: &PollId, user_id: &str) -> Result<Vote, PollError> {
        let state = self.state.read().await;
        state
            .votes
            .get(&(poll_id.0.clone(), user_id.to_owned()))
            .cloned()
            .ok_or(PollError::VoteNotFound)
    }

    async fn get_votes_by_poll_id(&self, poll_id: &PollId) -> Result<Vec<Vote>, PollError> {
        let state = self.state.read().await;
        let mut votes: Vec<Vote> =
            state.votes.values().filter(|vote| vote.poll_id == *poll_id).cloned().collect();
        votes.sort_by_key(|vote| vote.created_at);
        Ok(votes)
    }

    async fn add_vote(&self, vote: &Vote) -> Result<(), PollError> {
        let mut state = self.state.write().await;

        let poll = state.polls.get_mut(&vote.poll_id.0).ok_or(PollError::PollNotFound)?;
        if !poll.is_active() {
            return Err(PollError::PollClosed);
        }
        if poll.has_expired() {
            poll.close();
            return Err(PollError::PollClosed);
        }
        let valid_option = poll.is_valid_option_index(vote.option_idx);

        let key = (vote.poll_id.0.clone(), vote.user_id.clone());
        if state.votes.contains_key(&key) {
            return Err(PollError::AlreadyVoted);
        }
        if !valid_option {
            return Err(PollError::InvalidOption);
        }

        state.votes.insert(key, vote.clone());
        Ok(())
    }

    async fn close(&self) -> Result<(), PollError> {
        Ok(())
    }
}

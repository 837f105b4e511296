//! Seams between the poll core and the outside world.
//!
//! [`PollStore`] is the persistence contract; concrete stores live in
//! `pollbot-db`. [`PollNotifier`] delivers "poll ended" announcements to the
//! chat platform.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::poll::{Poll, PollId, PollStatus};
use crate::domain::vote::Vote;
use crate::errors::PollError;

/// Persistence contract for polls and votes.
///
/// Implementations must be safe for concurrent use: requests and both
/// background reconcilers share one store. Cross-request consistency is the
/// store's job, in particular:
///
/// * `add_vote` re-validates the poll server-side and must let at most one
///   vote per `(poll_id, user_id)` succeed, reporting the rest as
///   [`PollError::AlreadyVoted`] even under concurrent calls.
/// * `update_poll_status` never moves a poll backwards; a request that would
///   not advance the status is an `Ok(())` no-op.
///
/// Lookups report a missing poll as [`PollError::PollNotFound`] and a missing
/// vote as [`PollError::VoteNotFound`]. Any other failure is
/// [`PollError::Storage`].
#[async_trait]
pub trait PollStore: Send + Sync {
    async fn create_poll(&self, poll: &Poll) -> Result<(), PollError>;

    async fn get_poll(&self, id: &PollId) -> Result<Poll, PollError>;

    async fn update_poll_status(&self, id: &PollId, status: PollStatus) -> Result<(), PollError>;

    async fn delete_poll(&self, id: &PollId) -> Result<(), PollError> {
        self.update_poll_status(id, PollStatus::Deleted).await
    }

    /// Physically removes DELETED polls created at least `older_than` ago,
    /// together with their votes. Returns how many polls were removed.
    async fn purge_deleted_polls(&self, older_than: Duration) -> Result<u64, PollError>;

    /// Non-deleted polls posted in `channel_id`, newest first.
    async fn get_polls_by_channel(&self, channel_id: &str) -> Result<Vec<Poll>, PollError>;

    /// Non-deleted polls created by `user_id`, newest first.
    async fn get_polls_by_creator(&self, user_id: &str) -> Result<Vec<Poll>, PollError>;

    /// ACTIVE polls whose expiry has passed, answered from a status/expiry
    /// index rather than a full scan.
    async fn get_expired_active_polls(&self) -> Result<Vec<Poll>, PollError>;

    async fn get_vote(&self, poll_id: &PollId, user_id: &str) -> Result<Vote, PollError>;

    async fn get_votes_by_poll_id(&self, poll_id: &PollId) -> Result<Vec<Vote>, PollError>;

    async fn add_vote(&self, vote: &Vote) -> Result<(), PollError>;

    /// Releases the underlying connection. Called once at shutdown.
    async fn close(&self) -> Result<(), PollError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
    #[error("notification rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait PollNotifier: Send + Sync {
    async fn poll_expired(&self, poll: &Poll) -> Result<(), NotifyError>;
}

#[derive(Default)]
pub struct NoopPollNotifier;

#[async_trait]
impl PollNotifier for NoopPollNotifier {
    async fn poll_expired(&self, _poll: &Poll) -> Result<(), NotifyError> {
        Ok(())
    }
}

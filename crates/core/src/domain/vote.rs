use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::poll::PollId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VoteId(pub String);

/// A single user's selection in a poll. Range checks against the poll's
/// options happen in the service and again in the store, not here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub id: VoteId,
    pub poll_id: PollId,
    pub user_id: String,
    /// Zero-based.
    pub option_idx: i64,
    /// Unix seconds.
    pub created_at: i64,
}

impl Vote {
    pub fn new(poll_id: PollId, user_id: impl Into<String>, option_idx: i64) -> Self {
        Self {
            id: VoteId(Uuid::new_v4().to_string()),
            poll_id,
            user_id: user_id.into(),
            option_idx,
            created_at: Utc::now().timestamp(),
        }
    }
}

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::PollError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollId(pub String);

impl PollId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PollId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PollStatus {
    Active,
    Closed,
    Deleted,
}

impl PollStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Closed => "CLOSED",
            Self::Deleted => "DELETED",
        }
    }

    /// Status only ever moves forward: ACTIVE -> CLOSED -> DELETED, with
    /// ACTIVE -> DELETED allowed directly.
    pub fn can_transition_to(self, next: PollStatus) -> bool {
        matches!(
            (self, next),
            (Self::Active, Self::Closed) | (Self::Active, Self::Deleted) | (Self::Closed, Self::Deleted)
        )
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PollStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "ACTIVE" => Ok(Self::Active),
            "CLOSED" => Ok(Self::Closed),
            "DELETED" => Ok(Self::Deleted),
            other => Err(format!("unknown poll status `{other}`")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<String>,
    pub created_by: String,
    pub channel_id: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub expires_at: i64,
    pub status: PollStatus,
}

impl Poll {
    pub fn new(
        question: impl Into<String>,
        options: Vec<String>,
        created_by: impl Into<String>,
        channel_id: impl Into<String>,
        duration_secs: i64,
        max_options: usize,
    ) -> Result<Self, PollError> {
        let question = question.into();
        if question.is_empty() {
            return Err(PollError::EmptyQuestion);
        }
        if options.len() < 2 {
            return Err(PollError::TooFewOptions);
        }
        if options.len() > max_options {
            return Err(PollError::TooManyOptions { max: max_options });
        }

        let mut seen = HashSet::with_capacity(options.len());
        if !options.iter().all(|option| seen.insert(option.as_str())) {
            return Err(PollError::DuplicateOption);
        }

        let now = Utc::now().timestamp();
        Ok(Self {
            id: PollId::generate(),
            question,
            options,
            created_by: created_by.into(),
            channel_id: channel_id.into(),
            created_at: now,
            expires_at: now.saturating_add(duration_secs.max(0)),
            status: PollStatus::Active,
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == PollStatus::Active
    }

    /// Strictly past `expires_at`, regardless of status.
    pub fn has_expired(&self) -> bool {
        self.has_expired_at(Utc::now().timestamp())
    }

    pub fn has_expired_at(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn close(&mut self) {
        if self.status.can_transition_to(PollStatus::Closed) {
            self.status = PollStatus::Closed;
        }
    }

    pub fn delete(&mut self) {
        self.status = PollStatus::Deleted;
    }

    pub fn can_be_manipulated_by(&self, user_id: &str) -> bool {
        self.created_by == user_id
    }

    pub fn is_valid_option_index(&self, index: i64) -> bool {
        usize::try_from(index).map(|index| index < self.options.len()).unwrap_or(false)
    }

    pub fn remaining_time(&self) -> String {
        self.remaining_time_at(Utc::now().timestamp())
    }

    pub fn remaining_time_at(&self, now: i64) -> String {
        if !self.is_active() {
            return "Poll has ended".to_owned();
        }
        if now >= self.expires_at {
            return "Time has expired".to_owned();
        }

        let remaining = self.expires_at - now;
        let hours = remaining / 3600;
        let minutes = (remaining % 3600) / 60;

        if hours > 0 {
            format!("{hours} hours {minutes} minutes")
        } else {
            format!("{minutes} minutes")
        }
    }

    pub fn formatted_creation_time(&self) -> String {
        format_timestamp(self.created_at)
    }

    pub fn formatted_expiration_time(&self) -> String {
        format_timestamp(self.expires_at)
    }
}

fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|at| at.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| secs.to_string())
}

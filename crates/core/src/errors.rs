use thiserror::Error;

/// Coarse classification of a [`PollError`], used by the chat layer to pick
/// a user-facing message without matching on error payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    EmptyQuestion,
    TooFewOptions,
    TooManyOptions,
    DuplicateOption,
    InvalidOption,
    PollClosed,
    PollNotFound,
    AlreadyVoted,
    VoteNotFound,
    NotPollCreator,
    Storage,
}

impl ErrorKind {
    /// Caller-input problems. Never retried.
    pub fn is_validation(self) -> bool {
        matches!(
            self,
            Self::EmptyQuestion
                | Self::TooFewOptions
                | Self::TooManyOptions
                | Self::DuplicateOption
                | Self::InvalidOption
        )
    }

    /// Denials caused by the current state of a poll or vote.
    pub fn is_state(self) -> bool {
        matches!(
            self,
            Self::PollClosed
                | Self::PollNotFound
                | Self::AlreadyVoted
                | Self::VoteNotFound
                | Self::NotPollCreator
        )
    }

    pub fn user_message(self) -> &'static str {
        match self {
            Self::EmptyQuestion => "question cannot be empty",
            Self::TooFewOptions => "at least 2 options are required",
            Self::TooManyOptions => "too many options",
            Self::DuplicateOption => "duplicate options detected",
            Self::InvalidOption => "invalid option",
            Self::PollClosed => "poll is already closed",
            Self::PollNotFound => "poll not found",
            Self::AlreadyVoted => "you have already voted in this poll",
            Self::VoteNotFound => "vote not found",
            Self::NotPollCreator => "only the poll creator can perform this action",
            Self::Storage => "the poll service is temporarily unavailable, please try again later",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("question cannot be empty")]
    EmptyQuestion,
    #[error("at least 2 options are required")]
    TooFewOptions,
    #[error("too many options: maximum {max} options allowed")]
    TooManyOptions { max: usize },
    #[error("duplicate options detected")]
    DuplicateOption,
    #[error("invalid option")]
    InvalidOption,
    #[error("poll is already closed")]
    PollClosed,
    #[error("poll not found")]
    PollNotFound,
    #[error("you have already voted in this poll")]
    AlreadyVoted,
    #[error("vote not found")]
    VoteNotFound,
    #[error("only the poll creator can perform this action")]
    NotPollCreator,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl PollError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyQuestion => ErrorKind::EmptyQuestion,
            Self::TooFewOptions => ErrorKind::TooFewOptions,
            Self::TooManyOptions { .. } => ErrorKind::TooManyOptions,
            Self::DuplicateOption => ErrorKind::DuplicateOption,
            Self::InvalidOption => ErrorKind::InvalidOption,
            Self::PollClosed => ErrorKind::PollClosed,
            Self::PollNotFound => ErrorKind::PollNotFound,
            Self::AlreadyVoted => ErrorKind::AlreadyVoted,
            Self::VoteNotFound => ErrorKind::VoteNotFound,
            Self::NotPollCreator => ErrorKind::NotPollCreator,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Prefixes infrastructure failures with `context`. Domain variants pass
    /// through untouched so callers can keep matching on them.
    pub fn context(self, context: &str) -> Self {
        match self {
            Self::Storage(message) => Self::Storage(format!("{context}: {message}")),
            other => other,
        }
    }

    /// Text safe to show to the end user. Storage details are never exposed.
    pub fn user_message(&self) -> String {
        match self {
            Self::TooManyOptions { max } => {
                format!("{}: maximum {max} options allowed", ErrorKind::TooManyOptions.user_message())
            }
            other => other.kind().user_message().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ErrorKind, PollError};

    #[test]
    fn context_wraps_storage_failures_only() {
        let wrapped = PollError::Storage("disk I/O error".to_owned()).context("error adding vote");
        assert_eq!(wrapped, PollError::Storage("error adding vote: disk I/O error".to_owned()));

        let untouched = PollError::AlreadyVoted.context("error adding vote");
        assert_eq!(untouched, PollError::AlreadyVoted);
    }

    #[test]
    fn too_many_options_message_includes_limit() {
        let error = PollError::TooManyOptions { max: 10 };
        assert_eq!(error.user_message(), "too many options: maximum 10 options allowed");
        assert_eq!(error.to_string(), error.user_message());
    }

    #[test]
    fn storage_failures_hide_details_from_users() {
        let error = PollError::Storage("database is locked".to_owned());
        assert_eq!(error.kind(), ErrorKind::Storage);
        assert!(!error.user_message().contains("locked"));
    }

    #[test]
    fn kinds_are_classified() {
        assert!(PollError::DuplicateOption.kind().is_validation());
        assert!(PollError::InvalidOption.kind().is_validation());
        assert!(PollError::NotPollCreator.kind().is_state());
        assert!(PollError::AlreadyVoted.kind().is_state());
        assert!(!PollError::Storage(String::new()).kind().is_validation());
        assert!(!PollError::Storage(String::new()).kind().is_state());
    }
}

use thiserror::Error;

use pollbot_core::errors::PollError;

pub mod memory;
pub mod poll;

pub use memory::InMemoryPollStore;
pub use poll::SqlPollStore;

/// Most polls a single list or sweep query returns.
pub const QUERY_LIMIT: i64 = 100;

/// Most deleted polls removed in one purge batch.
pub const PURGE_BATCH: i64 = 1000;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for PollError {
    fn from(error: RepositoryError) -> Self {
        PollError::Storage(error.to_string())
    }
}

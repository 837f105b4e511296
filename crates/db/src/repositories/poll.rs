use std::time::Duration;

use chrono::Utc;
use sqlx::Row;
use tracing::debug;

use pollbot_core::domain::poll::{Poll, PollId, PollStatus};
use pollbot_core::domain::vote::{Vote, VoteId};
use pollbot_core::errors::PollError;
use pollbot_core::ports::PollStore;

use super::{RepositoryError, PURGE_BATCH, QUERY_LIMIT};
use crate::DbPool;

const POLL_COLUMNS: &str =
    "id, question, options_json, created_by, channel_id, created_at, expires_at, status";

pub struct SqlPollStore {
    pool: DbPool,
}

impl SqlPollStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Transactions that read before they write take the write lock up
    /// front. A deferred transaction that later upgrades fails with
    /// SQLITE_BUSY without waiting on the busy timeout.
    async fn begin_write(&self) -> Result<sqlx::Transaction<'static, sqlx::Sqlite>, PollError> {
        self.pool.begin_with("BEGIN IMMEDIATE").await.storage()
    }
}

trait StorageResultExt<T> {
    fn storage(self) -> Result<T, PollError>;
}

impl<T> StorageResultExt<T> for Result<T, sqlx::Error> {
    fn storage(self) -> Result<T, PollError> {
        self.map_err(|error| RepositoryError::from(error).into())
    }
}

fn decode(error: impl ToString) -> PollError {
    RepositoryError::Decode(error.to_string()).into()
}

fn row_to_poll(row: &sqlx::sqlite::SqliteRow) -> Result<Poll, PollError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let question: String = row.try_get("question").map_err(decode)?;
    let options_json: String = row.try_get("options_json").map_err(decode)?;
    let created_by: String = row.try_get("created_by").map_err(decode)?;
    let channel_id: String = row.try_get("channel_id").map_err(decode)?;
    let created_at: i64 = row.try_get("created_at").map_err(decode)?;
    let expires_at: i64 = row.try_get("expires_at").map_err(decode)?;
    let status: String = row.try_get("status").map_err(decode)?;

    let options: Vec<String> = serde_json::from_str(&options_json).map_err(decode)?;
    let status = status.parse::<PollStatus>().map_err(decode)?;

    Ok(Poll {
        id: PollId(id),
        question,
        options,
        created_by,
        channel_id,
        created_at,
        expires_at,
        status,
    })
}

fn row_to_vote(row: &sqlx::sqlite::SqliteRow) -> Result<Vote, PollError> {
    let id: String = row.try_get("id").map_err(decode)?;
    let poll_id: String = row.try_get("poll_id").map_err(decode)?;
    let user_id: String = row.try_get("user_id").map_err(decode)?;
    let option_idx: i64 = row.try_get("option_idx").map_err(decode)?;
    let created_at: i64 = row.try_get("created_at").map_err(decode)?;

    Ok(Vote { id: VoteId(id), poll_id: PollId(poll_id), user_id, option_idx, created_at })
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_error) if db_error.is_unique_violation())
}

#[async_trait::async_trait]
impl PollStore for SqlPollStore {
    async fn create_poll(&self, poll: &Poll) -> Result<(), PollError> {
        let options_json = serde_json::to_string(&poll.options).map_err(decode)?;

        sqlx::query(
            "INSERT INTO poll (id, question, options_json, created_by, channel_id, created_at, expires_at, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&poll.id.0)
        .bind(&poll.question)
        .bind(options_json)
        .bind(&poll.created_by)
        .bind(&poll.channel_id)
        .bind(poll.created_at)
        .bind(poll.expires_at)
        .bind(poll.status.as_str())
        .execute(&self.pool)
        .await
        .storage()?;

        Ok(())
    }

    async fn get_poll(&self, id: &PollId) -> Result<Poll, PollError> {
        let row = sqlx::query(&format!("SELECT {POLL_COLUMNS} FROM poll WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .storage()?;

        match row {
            Some(ref row) => row_to_poll(row),
            None => Err(PollError::PollNotFound),
        }
    }

    async fn update_poll_status(&self, id: &PollId, status: PollStatus) -> Result<(), PollError> {
        let result = sqlx::query(
            "UPDATE poll SET status = ?
             WHERE id = ? AND (status = 'ACTIVE' OR (status = 'CLOSED' AND ? = 'DELETED'))",
        )
        .bind(status.as_str())
        .bind(&id.0)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .storage()?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM poll WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .storage()?;
        if exists.is_none() {
            return Err(PollError::PollNotFound);
        }

        debug!(event_name = "db.status_update_skipped", poll_id = %id, status = %status, "status already advanced");
        Ok(())
    }

    async fn purge_deleted_polls(&self, older_than: Duration) -> Result<u64, PollError> {
        let older_than = i64::try_from(older_than.as_secs()).unwrap_or(i64::MAX);
        let cutoff = Utc::now().timestamp().saturating_sub(older_than);
        let mut purged = 0_u64;

        loop {
            let mut tx = self.begin_write().await?;

            let ids: Vec<String> = sqlx::query(
                "SELECT id FROM poll
                 WHERE status = 'DELETED' AND created_at <= ?
                 ORDER BY created_at ASC
                 LIMIT ?",
            )
            .bind(cutoff)
            .bind(PURGE_BATCH)
            .fetch_all(&mut *tx)
            .await
            .storage()?
            .iter()
            .map(|row| row.try_get::<String, _>("id").map_err(decode))
            .collect::<Result<_, _>>()?;

            for id in &ids {
                sqlx::query("DELETE FROM vote WHERE poll_id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .storage()?;
                sqlx::query("DELETE FROM poll WHERE id = ?").bind(id).execute(&mut *tx).await.storage()?;
            }

            tx.commit().await.storage()?;
            purged += ids.len() as u64;

            if (ids.len() as i64) < PURGE_BATCH {
                break;
            }
        }

        Ok(purged)
    }

    async fn get_polls_by_channel(&self, channel_id: &str) -> Result<Vec<Poll>, PollError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLL_COLUMNS} FROM poll
             WHERE channel_id = ? AND status != 'DELETED'
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(channel_id)
        .bind(QUERY_LIMIT)
        .fetch_all(&self.pool)
        .await
        .storage()?;

        rows.iter().map(row_to_poll).collect()
    }

    async fn get_polls_by_creator(&self, user_id: &str) -> Result<Vec<Poll>, PollError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLL_COLUMNS} FROM poll
             WHERE created_by = ? AND status != 'DELETED'
             ORDER BY created_at DESC
             LIMIT ?"
        ))
        .bind(user_id)
        .bind(QUERY_LIMIT)
        .fetch_all(&self.pool)
        .await
        .storage()?;

        rows.iter().map(row_to_poll).collect()
    }

    async fn get_expired_active_polls(&self) -> Result<Vec<Poll>, PollError> {
        let rows = sqlx::query(&format!(
            "SELECT {POLL_COLUMNS} FROM poll
             WHERE status = 'ACTIVE' AND expires_at < ?
             ORDER BY expires_at ASC
             LIMIT ?"
        ))
        .bind(Utc::now().timestamp())
        .bind(QUERY_LIMIT)
        .fetch_all(&self.pool)
        .await
        .storage()?;

        rows.iter().map(row_to_poll).collect()
    }

    async fn get_vote(&self, poll_id: &PollId, user_id: &str) -> Result<Vote, PollError> {
        let row = sqlx::query(
            "SELECT id, poll_id, user_id, option_idx, created_at
             FROM vote WHERE poll_id = ? AND user_id = ?",
        )
        .bind(&poll_id.0)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .storage()?;

        match row {
            Some(ref row) => row_to_vote(row),
            None => Err(PollError::VoteNotFound),
        }
    }

    async fn get_votes_by_poll_id(&self, poll_id: &PollId) -> Result<Vec<Vote>, PollError> {
        let rows = sqlx::query(
            "SELECT id, poll_id, user_id, option_idx, created_at
             FROM vote WHERE poll_id = ?
             ORDER BY created_at ASC",
        )
        .bind(&poll_id.0)
        .fetch_all(&self.pool)
        .await
        .storage()?;

        rows.iter().map(row_to_vote).collect()
    }

    async fn add_vote(&self, vote: &Vote) -> Result<(), PollError> {
        let mut tx = self.begin_write().await?;

        let row = sqlx::query(&format!("SELECT {POLL_COLUMNS} FROM poll WHERE id = ?"))
            .bind(&vote.poll_id.0)
            .fetch_optional(&mut *tx)
            .await
            .storage()?;
        let poll = match row {
            Some(ref row) => row_to_poll(row)?,
            None => return Err(PollError::PollNotFound),
        };

        if !poll.is_active() {
            return Err(PollError::PollClosed);
        }

        if poll.has_expired() {
            sqlx::query("UPDATE poll SET status = 'CLOSED' WHERE id = ? AND status = 'ACTIVE'")
                .bind(&poll.id.0)
                .execute(&mut *tx)
                .await
                .storage()?;
            tx.commit().await.storage()?;
            return Err(PollError::PollClosed);
        }

        let existing = sqlx::query("SELECT 1 FROM vote WHERE poll_id = ? AND user_id = ?")
            .bind(&vote.poll_id.0)
            .bind(&vote.user_id)
            .fetch_optional(&mut *tx)
            .await
            .storage()?;
        if existing.is_some() {
            return Err(PollError::AlreadyVoted);
        }

        if !poll.is_valid_option_index(vote.option_idx) {
            return Err(PollError::InvalidOption);
        }

        let inserted = sqlx::query(
            "INSERT INTO vote (id, poll_id, user_id, option_idx, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&vote.id.0)
        .bind(&vote.poll_id.0)
        .bind(&vote.user_id)
        .bind(vote.option_idx)
        .bind(vote.created_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => return Err(PollError::AlreadyVoted),
            Err(error) => return Err(RepositoryError::from(error).into()),
        }

        tx.commit().await.storage()?;
        Ok(())
    }

    async fn close(&self) -> Result<(), PollError> {
        self.pool.close().await;
        Ok(())
    }
}

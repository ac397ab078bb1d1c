//! Message queue with batched sends, backed by SQLite.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use thiserror::Error;
use tracing::instrument;

/// Largest number of entries accepted by one `send_batch` call.
pub const MAX_BATCH_ENTRIES: usize = 10;

/// Largest accepted message body, in bytes.
pub const MAX_BODY_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchEntry {
    pub id: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedEntry {
    pub id: String,
    pub reason: String,
}

/// Per-entry outcome of one batch submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<FailedEntry>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("batch is empty")]
    EmptyBatch,
    #[error("batch has {0} entries, at most {MAX_BATCH_ENTRIES} allowed")]
    TooManyEntries(usize),
    #[error("batch repeats entry id {0:?}")]
    DuplicateId(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Submit up to [`MAX_BATCH_ENTRIES`] entries. Whole-batch problems are
    /// errors; entries the queue could not take are listed in `failed`.
    async fn send_batch(&self, entries: &[BatchEntry]) -> Result<BatchResult, QueueError>;
}

/// Reject batches that no queue would accept.
pub fn validate_batch(entries: &[BatchEntry]) -> Result<(), QueueError> {
    if entries.is_empty() {
        return Err(QueueError::EmptyBatch);
    }
    if entries.len() > MAX_BATCH_ENTRIES {
        return Err(QueueError::TooManyEntries(entries.len()));
    }
    let mut seen = HashSet::new();
    for entry in entries {
        if !seen.insert(entry.id.as_str()) {
            return Err(QueueError::DuplicateId(entry.id.clone()));
        }
    }
    Ok(())
}

/// A message waiting in a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub seq: i64,
    pub message_id: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct SqliteQueue {
    pool: SqlitePool,
    name: String,
}

impl SqliteQueue {
    pub fn new(pool: SqlitePool, name: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
        }
    }

    /// Oldest messages first, without removing them.
    #[instrument(skip_all)]
    pub async fn receive(&self, max: i64) -> Result<Vec<QueueMessage>, QueueError> {
        let rows = sqlx::query(
            "SELECT id, message_id, body FROM queue_messages \
             WHERE queue = ? ORDER BY id ASC LIMIT ?",
        )
        .bind(&self.name)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| QueueMessage {
                seq: row.get("id"),
                message_id: row.get("message_id"),
                body: row.get("body"),
            })
            .collect())
    }

    #[instrument(skip_all)]
    pub async fn delete(&self, seq: i64) -> Result<(), QueueError> {
        sqlx::query("DELETE FROM queue_messages WHERE id = ? AND queue = ?")
            .bind(seq)
            .bind(&self.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn len(&self) -> Result<i64, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_messages WHERE queue = ?")
            .bind(&self.name)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[async_trait]
impl MessageQueue for SqliteQueue {
    #[instrument(skip_all, fields(entries = entries.len()))]
    async fn send_batch(&self, entries: &[BatchEntry]) -> Result<BatchResult, QueueError> {
        validate_batch(entries)?;

        let mut result = BatchResult::default();
        for entry in entries {
            if entry.body.is_empty() {
                result.failed.push(FailedEntry {
                    id: entry.id.clone(),
                    reason: "message body is empty".into(),
                });
                continue;
            }
            if entry.body.len() > MAX_BODY_BYTES {
                result.failed.push(FailedEntry {
                    id: entry.id.clone(),
                    reason: format!("message body exceeds {MAX_BODY_BYTES} bytes"),
                });
                continue;
            }
            // Resending an id already in the queue is accepted without a second copy.
            let insert = sqlx::query(
                "INSERT INTO queue_messages (queue, message_id, body) VALUES (?, ?, ?) \
                 ON CONFLICT (queue, message_id) DO NOTHING",
            )
            .bind(&self.name)
            .bind(&entry.id)
            .bind(&entry.body)
            .execute(&self.pool)
            .await;
            match insert {
                Ok(_) => result.succeeded.push(entry.id.clone()),
                Err(err) => result.failed.push(FailedEntry {
                    id: entry.id.clone(),
                    reason: err.to_string(),
                }),
            }
        }
        Ok(result)
    }
}

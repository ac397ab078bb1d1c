//! Batch dispatcher: hand a set of payloads to a queue until every one is acknowledged.
use crate::queue::{BatchEntry, MessageQueue, QueueError, MAX_BATCH_ENTRIES};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("gave up after {rounds} rounds with {} payloads unacknowledged", .pending.len())]
    GaveUp { rounds: u32, pending: Vec<String> },
}

/// How long to keep resubmitting rejected entries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchPolicy {
    /// `None` keeps submitting until the queue accepts everything.
    pub max_rounds: Option<u32>,
}

impl From<&crate::config::Dispatch> for DispatchPolicy {
    fn from(cfg: &crate::config::Dispatch) -> Self {
        Self {
            max_rounds: cfg.max_rounds,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    /// `(message id, payload)` in submission order. Ids are stable across retries.
    pub messages: Vec<(String, String)>,
    pub rounds: u32,
    pub rejected: u32,
}

/// Deliver every payload to `queue` in batches of at most [`MAX_BATCH_ENTRIES`].
///
/// Each payload gets a random message id once; entries rejected by the queue
/// keep that id and are simply picked up again by the next round. Whole-batch
/// queue errors are returned immediately.
#[instrument(skip_all, fields(payloads = payloads.len()))]
pub async fn send_messages(
    queue: &dyn MessageQueue,
    payloads: &[String],
    policy: DispatchPolicy,
) -> Result<DispatchReport, DispatchError> {
    let messages: Vec<(String, String)> = payloads
        .iter()
        .map(|payload| (Uuid::new_v4().to_string(), payload.clone()))
        .collect();
    let known: HashSet<&str> = messages.iter().map(|(id, _)| id.as_str()).collect();
    let mut confirmed: HashSet<String> = HashSet::new();
    let mut rounds = 0u32;
    let mut rejected = 0u32;

    while confirmed.len() < messages.len() {
        if let Some(max) = policy.max_rounds {
            if rounds >= max {
                let pending = messages
                    .iter()
                    .filter(|(id, _)| !confirmed.contains(id))
                    .map(|(_, payload)| payload.clone())
                    .collect();
                return Err(DispatchError::GaveUp { rounds, pending });
            }
        }

        let batch: Vec<BatchEntry> = messages
            .iter()
            .filter(|(id, _)| !confirmed.contains(id))
            .take(MAX_BATCH_ENTRIES)
            .map(|(id, body)| BatchEntry {
                id: id.clone(),
                body: body.clone(),
            })
            .collect();
        debug!(round = rounds, entries = batch.len(), "send message batch");

        let result = queue.send_batch(&batch).await?;
        rounds += 1;

        confirmed.extend(
            result
                .succeeded
                .into_iter()
                .filter(|id| known.contains(id.as_str())),
        );
        for item in &result.failed {
            rejected += 1;
            warn!(id = %item.id, reason = %item.reason, "send failed item");
        }
    }

    info!(messages = messages.len(), rounds, rejected, "all messages acknowledged");
    Ok(DispatchReport {
        messages,
        rounds,
        rejected,
    })
}

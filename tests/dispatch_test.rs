use async_trait::async_trait;
use devio_index::dispatch::{send_messages, DispatchPolicy};
use devio_index::queue::{
    BatchEntry, BatchResult, FailedEntry, MessageQueue, QueueError, SqliteQueue, MAX_BATCH_ENTRIES,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

/// Fails every entry the first time its id is seen, accepts it afterwards.
#[derive(Clone, Default)]
struct FlakyQueue {
    seen: Arc<Mutex<HashSet<String>>>,
    batches: Arc<Mutex<Vec<Vec<BatchEntry>>>>,
}

#[async_trait]
impl MessageQueue for FlakyQueue {
    async fn send_batch(&self, entries: &[BatchEntry]) -> Result<BatchResult, QueueError> {
        devio_index::queue::validate_batch(entries)?;
        self.batches.lock().await.push(entries.to_vec());
        let mut seen = self.seen.lock().await;
        let mut result = BatchResult::default();
        for entry in entries {
            if seen.insert(entry.id.clone()) {
                result.failed.push(FailedEntry {
                    id: entry.id.clone(),
                    reason: "throttled".into(),
                });
            } else {
                result.succeeded.push(entry.id.clone());
            }
        }
        Ok(result)
    }
}

fn payloads(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("https://blog.example.com/articles/post-{i}/"))
        .collect()
}

#[tokio::test]
async fn test_each_entry_failing_once_still_terminates_with_stable_ids() {
    let queue = FlakyQueue::default();
    let input = payloads(7);

    let report = send_messages(&queue, &input, DispatchPolicy::default())
        .await
        .unwrap();
    assert_eq!(report.rounds, 2);
    assert_eq!(report.rejected, 7);

    // Every id was submitted exactly twice, always with the same payload.
    let batches = queue.batches.lock().await;
    let mut bodies: HashMap<String, Vec<String>> = HashMap::new();
    for entry in batches.iter().flatten() {
        bodies
            .entry(entry.id.clone())
            .or_default()
            .push(entry.body.clone());
    }
    assert_eq!(bodies.len(), 7);
    for (id, payload) in &report.messages {
        assert_eq!(bodies[id], vec![payload.clone(), payload.clone()]);
    }
    let sent: Vec<&String> = report.messages.iter().map(|(_, p)| p).collect();
    assert_eq!(sent, input.iter().collect::<Vec<_>>());
}

#[tokio::test]
async fn test_twenty_five_payloads_never_exceed_batch_limit() {
    let queue = FlakyQueue::default();
    let report = send_messages(&queue, &payloads(25), DispatchPolicy::default())
        .await
        .unwrap();

    let batches = queue.batches.lock().await;
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= MAX_BATCH_ENTRIES));
    let total: usize = batches.iter().map(Vec::len).sum();
    assert_eq!(total, 50);
    assert_eq!(report.messages.len(), 25);
}

#[tokio::test]
async fn test_sqlite_queue_receives_every_payload_once() {
    let pool = setup_pool().await;
    let queue = SqliteQueue::new(pool, "post-urls");
    let input = payloads(25);

    let report = send_messages(&queue, &input, DispatchPolicy::default())
        .await
        .unwrap();
    assert_eq!(report.rounds, 3);
    assert_eq!(queue.len().await.unwrap(), 25);

    let received = queue.receive(100).await.unwrap();
    let bodies: Vec<String> = received.into_iter().map(|m| m.body).collect();
    assert_eq!(bodies, input);
}

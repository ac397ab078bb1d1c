//! Drain the dispatched post urls.
use super::Context;
use anyhow::Result;
use tracing::{info, instrument};

const RECEIVE_BATCH: i64 = 10;

/// Returns every url taken off the queue, oldest first.
#[instrument(skip_all)]
pub async fn handle(ctx: &Context) -> Result<Vec<String>> {
    let mut urls = Vec::new();
    loop {
        let messages = ctx.queue.receive(RECEIVE_BATCH).await?;
        if messages.is_empty() {
            break;
        }
        for message in messages {
            info!(url = %message.body, message_id = %message.message_id, "url");
            ctx.queue.delete(message.seq).await?;
            urls.push(message.body);
        }
    }
    Ok(urls)
}

//! Record new feed posts and queue their links.
use super::feed_checker::fetch_feed;
use super::Context;
use crate::dispatch::{send_messages, DispatchError, DispatchReport};
use crate::gate::{self, WriteOutcome};
use crate::model::FeedEntry;
use crate::stats::instrumented;
use anyhow::{bail, Result};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};

/// Post ids are recorded only after their link is acknowledged by the queue,
/// so a failed dispatch leaves them unseen for the next run to pick up.
#[instrument(skip_all)]
pub async fn handle(ctx: &Context) -> Result<DispatchReport> {
    let entries = fetch_feed(ctx).await?;
    if let Some(bad) = entries.iter().find(|e| e.post_id.parse::<i64>().is_err()) {
        bail!("feed post id {:?} is not an integer", bad.post_id);
    }

    let mut seen = HashSet::new();
    let mut unseen: Vec<&FeedEntry> = Vec::new();
    for entry in &entries {
        if !seen.insert(entry.post_id.as_str()) {
            continue;
        }
        if ctx.post_ids.get_item(&entry.post_id).await?.is_none() {
            unseen.push(entry);
        }
    }

    let links: Vec<String> = unseen.iter().map(|e| e.link.clone()).collect();
    let dispatched = instrumented(
        &ctx.stats,
        "send_messages",
        send_messages(&ctx.queue, &links, ctx.dispatch_policy()),
    )
    .await;

    let pending: HashSet<String> = match &dispatched {
        Ok(_) => HashSet::new(),
        Err(DispatchError::GaveUp { pending, .. }) => pending.iter().cloned().collect(),
        Err(DispatchError::Queue(_)) => links.iter().cloned().collect(),
    };
    for entry in unseen.iter().filter(|e| !pending.contains(&e.link)) {
        let outcome = instrumented(
            &ctx.stats,
            "put_post_id",
            gate::put_post_id_if_absent(&*ctx.post_ids, &entry.post_id),
        )
        .await?;
        if outcome == WriteOutcome::Superseded {
            debug!(post_id = %entry.post_id, "post id recorded by a concurrent run");
        }
    }

    let report = match dispatched {
        Ok(report) => report,
        Err(err) => {
            warn!(unrecorded = pending.len(), "dispatch incomplete, ids left for the next run");
            return Err(err.into());
        }
    };
    info!(entries = entries.len(), dispatched = report.messages.len(), "feed dispatched");
    Ok(report)
}

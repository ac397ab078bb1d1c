//! Record the post ids announced by the feed.
use super::Context;
use crate::feed::parse_feed;
use crate::gate::{self, WriteOutcome};
use crate::model::FeedEntry;
use crate::stats::instrumented;
use anyhow::{Context as _, Result};
use tracing::{info, instrument};

pub(crate) async fn fetch_feed(ctx: &Context) -> Result<Vec<FeedEntry>> {
    let url = &ctx.config.sources.feed_url;
    let body = instrumented(&ctx.stats, "get_feed", ctx.http.get(url)).await?;
    parse_feed(&body).with_context(|| format!("failed to parse feed {url}"))
}

/// Returns the ids that were not recorded before.
#[instrument(skip_all)]
pub async fn handle(ctx: &Context) -> Result<Vec<String>> {
    let entries = fetch_feed(ctx).await?;
    let mut recorded = Vec::new();
    for entry in &entries {
        let outcome = instrumented(
            &ctx.stats,
            "put_post_id",
            gate::put_post_id_if_absent(&*ctx.post_ids, &entry.post_id),
        )
        .await?;
        if outcome == WriteOutcome::Written {
            recorded.push(entry.post_id.clone());
        }
    }
    info!(entries = entries.len(), recorded = recorded.len(), "feed checked");
    Ok(recorded)
}

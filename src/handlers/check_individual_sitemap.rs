//! Gate every post of one sub-sitemap and queue the new or updated ones.
use super::{event, Context};
use crate::gate;
use crate::sitemap::parse_individual_sitemap;
use crate::stats::instrumented;
use anyhow::{Context as _, Result};
use serde_json::Value;
use tracing::{info, instrument};

/// Returns the post ids written to the pending table, in sitemap order.
#[instrument(skip_all)]
pub async fn handle(ctx: &Context, event: &Value) -> Result<Vec<String>> {
    let url = event::url(event)?;
    let body = instrumented(&ctx.stats, "get_sitemap", ctx.http.get(&url)).await?;
    // Parse everything before touching any table so a bad entry writes nothing.
    let entries = parse_individual_sitemap(&body)
        .with_context(|| format!("failed to parse sitemap {url}"))?;

    let mut post_ids = Vec::new();
    for entry in &entries {
        let verdict = instrumented(
            &ctx.stats,
            "check_updated_post",
            gate::check_updated_post(entry, &*ctx.slugs, &ctx.posts),
        )
        .await?;
        if let Some(post_id) = verdict.into_post_id() {
            post_ids.push(post_id);
        }
    }

    instrumented(
        &ctx.stats,
        "put_pending_posts",
        gate::put_pending_posts(&*ctx.post_ids, &post_ids),
    )
    .await?;
    info!(%url, entries = entries.len(), emitted = post_ids.len(), "sitemap checked");
    Ok(post_ids)
}

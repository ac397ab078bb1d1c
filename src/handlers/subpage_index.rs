//! Render and upload `{dir}/index.html` for an archive directory.
use super::Context;
use crate::index_page::{entries_from, render_index, sort_entries};
use crate::stats::instrumented;
use anyhow::Result;
use tracing::{info, instrument};

/// Returns the key of the uploaded page.
#[instrument(skip(ctx))]
pub async fn handle(ctx: &Context, dir: &str) -> Result<String> {
    let dir = dir.trim_matches('/');
    let objects = instrumented(
        &ctx.stats,
        "get_contents",
        ctx.objects.list(ctx.bucket(), &format!("{dir}/")),
    )
    .await?;
    let entries = entries_from(&objects, &ctx.config.storage.index_extension);
    let entries = sort_entries(dir, entries)?;
    let html = render_index(dir, &entries)?;

    let key = format!("{dir}/index.html");
    instrumented(
        &ctx.stats,
        "upload_index",
        ctx.objects
            .put(ctx.bucket(), &key, html.into_bytes(), Some("text/html")),
    )
    .await?;
    info!(%key, entries = entries.len(), "index page uploaded");
    Ok(key)
}

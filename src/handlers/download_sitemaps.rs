//! Snapshot the root sitemap and every sitemap it lists.
use super::Context;
use crate::sitemap::parse_locs;
use crate::stats::instrumented;
use anyhow::{anyhow, Context as _, Result};
use chrono::Utc;
use tracing::{info, instrument};

fn basename(url: &str) -> Result<&str> {
    url.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .ok_or_else(|| anyhow!("no file name in {url:?}"))
}

async fn save(ctx: &Context, url: &str, prefix: &str) -> Result<(String, Vec<u8>)> {
    let body = instrumented(&ctx.stats, "get_xml", ctx.http.get(url)).await?;
    let key = format!("{prefix}/{}", basename(url)?);
    instrumented(
        &ctx.stats,
        "save_xml",
        ctx.objects.put(ctx.bucket(), &key, body.clone(), None),
    )
    .await?;
    Ok((key, body))
}

/// Returns the keys written, root sitemap first.
#[instrument(skip_all)]
pub async fn handle(ctx: &Context) -> Result<Vec<String>> {
    let prefix = format!(
        "{}/{}",
        ctx.config.storage.sitemap_prefix,
        Utc::now().format("%Y-%m-%d %H:%M:%S%.6f%:z")
    );
    let root_url = &ctx.config.sources.root_sitemap_url;
    let (root_key, root) = save(ctx, root_url, &prefix).await?;
    let sub_sitemaps =
        parse_locs(&root).with_context(|| format!("failed to parse root sitemap {root_url}"))?;

    let mut keys = vec![root_key];
    for url in &sub_sitemaps {
        keys.push(save(ctx, url, &prefix).await?.0);
    }
    info!(%prefix, files = keys.len(), "sitemaps downloaded");
    Ok(keys)
}

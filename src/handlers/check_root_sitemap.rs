//! Record every sub-sitemap of the root sitemap index that changed.
use super::Context;
use crate::gate::{self, WriteOutcome};
use crate::sitemap::parse_root_sitemap;
use crate::stats::instrumented;
use anyhow::{Context as _, Result};
use tracing::{info, instrument};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RootSitemapReport {
    /// Urls written because they were new or newer than the stored copy.
    pub written: Vec<String>,
    pub superseded: usize,
}

#[instrument(skip_all)]
pub async fn handle(ctx: &Context) -> Result<RootSitemapReport> {
    let url = &ctx.config.sources.root_sitemap_url;
    let body = instrumented(&ctx.stats, "get_sitemap", ctx.http.get(url)).await?;
    let records = parse_root_sitemap(&body, &ctx.config.sources.target_prefix)
        .with_context(|| format!("failed to parse root sitemap {url}"))?;

    let mut report = RootSitemapReport::default();
    for record in &records {
        let outcome = instrumented(
            &ctx.stats,
            "put_root_sitemap",
            gate::put_root_sitemap(&*ctx.sitemaps, record),
        )
        .await?;
        match outcome {
            WriteOutcome::Written => report.written.push(record.url.clone()),
            WriteOutcome::Superseded => report.superseded += 1,
        }
    }
    info!(
        sitemaps = records.len(),
        written = report.written.len(),
        superseded = report.superseded,
        "root sitemap checked"
    );
    Ok(report)
}

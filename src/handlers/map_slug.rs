//! Map an archived post's slug to its id and modification time.
use super::{event, Context};
use crate::gate::{self, WriteOutcome};
use crate::model::{parse_gmt_millis, SlugMappingRecord};
use crate::stats::instrumented;
use anyhow::{anyhow, Context as _, Result};
use flate2::read::GzDecoder;
use serde_json::Value;
use std::io::Read;
use tracing::{info, instrument};

/// Slug mapping of one archived post body (`slug`, `id`, `modified_gmt`).
pub fn slug_mapping(post: &Value) -> Result<SlugMappingRecord> {
    let slug = post
        .get("slug")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("post has no slug"))?;
    let post_id = match post.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => return Err(anyhow!("post {slug:?} has no id")),
    };
    let modified = post
        .get("modified_gmt")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("post {slug:?} has no modified_gmt"))?;
    Ok(SlugMappingRecord {
        slug: slug.to_string(),
        post_id,
        timestamp: parse_gmt_millis(modified)?,
    })
}

#[instrument(skip_all)]
pub async fn handle(ctx: &Context, event: &Value) -> Result<(SlugMappingRecord, WriteOutcome)> {
    let object = event::created_object(event)?;
    let archive = instrumented(
        &ctx.stats,
        "get_post_data",
        ctx.objects.get(&object.bucket, &object.key),
    )
    .await?;

    let mut raw = Vec::new();
    GzDecoder::new(archive.as_slice())
        .read_to_end(&mut raw)
        .with_context(|| format!("{} is not a gzip archive", object.key))?;
    let post: Value = serde_json::from_slice(&raw)
        .with_context(|| format!("{} does not hold JSON", object.key))?;
    let record = slug_mapping(&post)?;

    let outcome = instrumented(
        &ctx.stats,
        "put_slug_mapping",
        gate::put_slug_mapping(&*ctx.slugs, &record),
    )
    .await?;
    info!(slug = %record.slug, post_id = %record.post_id, ?outcome, "slug mapped");
    Ok((record, outcome))
}

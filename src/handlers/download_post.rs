//! Archive one post's JSON as gzip in the object store.
use super::{event, Context};
use crate::stats::instrumented;
use anyhow::{Context as _, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::StatusCode;
use serde_json::Value;
use std::io::Write;
use tracing::{info, instrument, warn};

pub fn archive_key(prefix: &str, post_id: &str) -> String {
    format!("{prefix}/{post_id}.json.gz")
}

/// Returns the archive key, or `None` when the post is gone or private.
#[instrument(skip_all)]
pub async fn handle(ctx: &Context, event: &Value) -> Result<Option<String>> {
    let post_id = event::post_id(event)?;
    let body = match instrumented(&ctx.stats, "get_post", ctx.posts.fetch_post(&post_id)).await {
        Ok(body) => body,
        Err(err) if err.status().is_some_and(is_missing) => {
            warn!(%post_id, error = %err, "failed to get post data");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let post: Value = serde_json::from_slice(&body)
        .with_context(|| format!("post {post_id} is not valid JSON"))?;
    let archive = gzip(&serde_json::to_vec(&post)?)?;

    let key = archive_key(&ctx.config.storage.archive_prefix, &post_id);
    instrumented(
        &ctx.stats,
        "save_post",
        ctx.objects
            .put(ctx.bucket(), &key, archive, Some("application/gzip")),
    )
    .await?;
    info!(%post_id, %key, "post archived");
    Ok(Some(key))
}

fn is_missing(status: StatusCode) -> bool {
    status == StatusCode::NOT_FOUND || status == StatusCode::UNAUTHORIZED
}

fn gzip(raw: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(raw)?;
    encoder.finish()
}

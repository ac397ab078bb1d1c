use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::AsyncReadExt;
use tracing::info;

use devio_index::config;
use devio_index::db;
use devio_index::handlers::{
    check_individual_sitemap, check_root_sitemap, download_post, download_sitemaps, feed_checker,
    feed_dispatcher, map_slug, notify_error, resolve_post_ids, run, subpage_index, Context,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Blog sitemap/feed ingestion functions")]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// JSON event file, or `-` for stdin. Defaults to `{}`.
    #[arg(long, global = true)]
    event: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record changed sub-sitemaps of the root sitemap index
    CheckRootSitemap,
    /// Gate the posts of one sub-sitemap (event: `{"url": ...}` or a stream record)
    CheckIndividualSitemap,
    /// Record post ids announced by the feed
    FeedChecker,
    /// Record new feed posts and queue their links
    FeedDispatcher,
    /// Archive one post (event: `{"post_id": ...}` or a stream record)
    DownloadPost,
    /// Map an archived post's slug (event: object-created notification)
    MapSlug,
    /// Rebuild `{dir}/index.html`
    SubpageIndex {
        /// Archive directory: `posts` or `archives`
        #[arg(long)]
        dir: String,
    },
    /// Snapshot the root sitemap and its sub-sitemaps
    DownloadSitemaps,
    /// Send a chat alert for a log subscription event
    NotifyError,
    /// Drain and log the dispatched post urls
    ResolvePostIds,
    /// Print an example config file
    ExampleConfig,
}

async fn read_event(source: Option<&str>) -> Result<Value> {
    let raw = match source {
        None => return Ok(Value::Object(Default::default())),
        Some("-") => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read event file {path}"))?,
    };
    serde_json::from_str(&raw).context("event is not valid JSON")
}

fn init_logging(json: bool) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    if let Command::ExampleConfig = args.command {
        print!("{}", config::example());
        return Ok(());
    }

    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let pool = db::init_pool(&cfg.database_url()).await?;
    db::run_migrations(&pool).await?;

    let event = read_event(args.event.as_deref()).await?;
    let ctx = Context::from_config(cfg, pool)?;

    match &args.command {
        Command::CheckRootSitemap => {
            let report = run(
                &ctx,
                "check_root_sitemap",
                &event,
                check_root_sitemap::handle(&ctx),
            )
            .await?;
            info!(written = report.written.len(), "done");
        }
        Command::CheckIndividualSitemap => {
            let ids = run(
                &ctx,
                "check_individual_sitemap",
                &event,
                check_individual_sitemap::handle(&ctx, &event),
            )
            .await?;
            info!(emitted = ids.len(), "done");
        }
        Command::FeedChecker => {
            let ids = run(&ctx, "feed_checker", &event, feed_checker::handle(&ctx)).await?;
            info!(recorded = ids.len(), "done");
        }
        Command::FeedDispatcher => {
            let report =
                run(&ctx, "feed_dispatcher", &event, feed_dispatcher::handle(&ctx)).await?;
            info!(dispatched = report.messages.len(), rounds = report.rounds, "done");
        }
        Command::DownloadPost => {
            let key = run(
                &ctx,
                "download_post",
                &event,
                download_post::handle(&ctx, &event),
            )
            .await?;
            info!(key = key.as_deref().unwrap_or("-"), "done");
        }
        Command::MapSlug => {
            let (record, outcome) =
                run(&ctx, "map_slug", &event, map_slug::handle(&ctx, &event)).await?;
            info!(slug = %record.slug, ?outcome, "done");
        }
        Command::SubpageIndex { dir } => {
            let key = run(&ctx, "subpage_index", &event, subpage_index::handle(&ctx, dir)).await?;
            info!(%key, "done");
        }
        Command::DownloadSitemaps => {
            let keys = run(
                &ctx,
                "download_sitemaps",
                &event,
                download_sitemaps::handle(&ctx),
            )
            .await?;
            info!(files = keys.len(), "done");
        }
        Command::NotifyError => {
            run(&ctx, "notify_error", &event, notify_error::handle(&ctx, &event)).await?;
        }
        Command::ResolvePostIds => {
            let urls = run(
                &ctx,
                "resolve_post_ids",
                &event,
                resolve_post_ids::handle(&ctx),
            )
            .await?;
            info!(urls = urls.len(), "done");
        }
        Command::ExampleConfig => {}
    }
    Ok(())
}

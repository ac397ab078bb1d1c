//! Event handlers, one module per function.
//!
//! Every handler takes a shared [`Context`] holding its collaborators and is
//! driven through [`run`], which logs the event, the failure if any and the
//! per-step timings gathered in the context's [`FunctionStats`].

pub mod check_individual_sitemap;
pub mod check_root_sitemap;
pub mod download_post;
pub mod download_sitemaps;
pub mod event;
pub mod feed_checker;
pub mod feed_dispatcher;
pub mod map_slug;
pub mod notify_error;
pub mod resolve_post_ids;
pub mod subpage_index;

use crate::config::Config;
use crate::db::{KvTable, Pool, SqliteTable};
use crate::dispatch::DispatchPolicy;
use crate::http::{HttpFetcher, ThrottledClient};
use crate::model::attr;
use crate::notify::{self, Notifier};
use crate::posts::PostsApi;
use crate::queue::SqliteQueue;
use crate::stats::{instrumented, FunctionStats};
use crate::storage::{FsObjectStore, ObjectStore};
use anyhow::Result;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Collaborators of one invocation.
pub struct Context {
    pub config: Config,
    pub http: Arc<dyn HttpFetcher>,
    pub posts: PostsApi,
    pub objects: Arc<dyn ObjectStore>,
    pub sitemaps: Arc<dyn KvTable>,
    pub slugs: Arc<dyn KvTable>,
    pub post_ids: Arc<dyn KvTable>,
    pub queue: SqliteQueue,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub stats: FunctionStats,
}

impl Context {
    /// Wire the SQLite, filesystem and HTTP implementations from configuration.
    pub fn from_config(config: Config, pool: Pool) -> Result<Self> {
        let http: Arc<dyn HttpFetcher> =
            Arc::new(ThrottledClient::new(&config.http.user_agent, config.min_interval())?);
        let notifier = match notify::from_config(&config.notify) {
            Ok(sink) => Some(sink),
            Err(notify::NotifyError::NotConfigured) => None,
            Err(err) => return Err(err.into()),
        };
        let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage.root));
        Ok(Self::with_parts(config, http, objects, pool, notifier))
    }

    /// Same wiring as [`Context::from_config`] with the network and object
    /// store supplied by the caller.
    pub fn with_parts(
        config: Config,
        http: Arc<dyn HttpFetcher>,
        objects: Arc<dyn ObjectStore>,
        pool: Pool,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Self {
        let table = |name: &str, key: &str| -> Arc<dyn KvTable> {
            Arc::new(SqliteTable::new(pool.clone(), name, key))
        };
        Self {
            posts: PostsApi::new(http.clone(), config.sources.posts_api_url.clone()),
            sitemaps: table(&config.tables.sitemaps, attr::URL),
            slugs: table(&config.tables.slug_mapping, attr::SLUG),
            post_ids: table(&config.tables.post_id, attr::POST_ID),
            queue: SqliteQueue::new(pool.clone(), config.queue.post_urls.clone()),
            http,
            objects,
            notifier,
            stats: FunctionStats::new(),
            config,
        }
    }

    pub fn dispatch_policy(&self) -> DispatchPolicy {
        DispatchPolicy::from(&self.config.dispatch)
    }

    pub fn bucket(&self) -> &str {
        &self.config.storage.bucket
    }
}

/// Drive one handler invocation: log the event, time the whole run, log a
/// failure before returning it and report the collected step timings.
pub async fn run<T, F>(ctx: &Context, name: &'static str, event: &Value, handler: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    debug!(handler = name, %event, "handler invoked");
    let result = instrumented(&ctx.stats, name, handler).await;
    if let Err(err) = &result {
        error!(handler = name, error = ?err, "handler failed");
    }
    match serde_json::to_string(&ctx.stats.summary()) {
        Ok(summary) => info!(handler = name, stats = %summary, "function stats"),
        Err(err) => debug!(%err, "failed to encode function stats"),
    }
    result
}

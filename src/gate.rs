//! Freshness gate: decide whether a discovered item is new, updated or already seen.
//!
//! All writes here are either conditional puts, whose expected rejection is
//! reported as [`WriteOutcome::Superseded`], or whole-record overwrites of ids
//! that downstream consumers tolerate seeing twice.

use crate::db::{self, Condition, KvTable, StoreError};
use crate::model::{attr, PostIdRecord, RootSitemapRecord, SitemapEntry, SlugMappingRecord};
use crate::posts::{PostSearch, PostsError};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, instrument};

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Search(#[from] PostsError),
}

/// Verdict for one sitemap entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Slug never seen. Carries the id found by searching, if any.
    New { post_id: Option<String> },
    /// Slug seen with an older timestamp.
    Updated { post_id: String },
    /// Slug seen and nothing changed since.
    Stale,
}

impl Freshness {
    /// The id to emit downstream, if any.
    pub fn into_post_id(self) -> Option<String> {
        match self {
            Freshness::New { post_id } => post_id,
            Freshness::Updated { post_id } => Some(post_id),
            Freshness::Stale => None,
        }
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The condition did not hold: another writer got there first or with newer data.
    Superseded,
}

fn swallow_condition(result: Result<(), StoreError>) -> Result<WriteOutcome, StoreError> {
    match result {
        Ok(()) => Ok(WriteOutcome::Written),
        Err(err) if err.is_conditional_check_failed() => {
            debug!(%err, "conditional write skipped");
            Ok(WriteOutcome::Superseded)
        }
        Err(err) => Err(err),
    }
}

/// Classify `entry` against the slug mapping table, searching the posts API
/// only when the slug is unknown.
#[instrument(skip(slugs, search), fields(slug = %entry.slug))]
pub async fn check_updated_post(
    entry: &SitemapEntry,
    slugs: &dyn KvTable,
    search: &dyn PostSearch,
) -> Result<Freshness, GateError> {
    let existing: Option<SlugMappingRecord> = db::get_record(slugs, &entry.slug).await?;
    let verdict = match existing {
        None => Freshness::New {
            post_id: search.search_post_id(&entry.slug).await?,
        },
        Some(record) if record.timestamp < entry.updated_at => Freshness::Updated {
            post_id: record.post_id,
        },
        Some(_) => Freshness::Stale,
    };
    debug!(?verdict, "freshness verdict");
    Ok(verdict)
}

/// Record a sub-sitemap unless the stored copy is as new or newer.
#[instrument(skip(table))]
pub async fn put_root_sitemap(
    table: &dyn KvTable,
    record: &RootSitemapRecord,
) -> Result<WriteOutcome, StoreError> {
    let condition = Condition::not_exists(attr::URL)
        .or(Condition::less_than(attr::UPDATED_AT, record.updated_at));
    swallow_condition(db::put_record(table, record, Some(&condition)).await)
}

/// Record a post id the first time it is seen.
#[instrument(skip(table))]
pub async fn put_post_id_if_absent(
    table: &dyn KvTable,
    post_id: &str,
) -> Result<WriteOutcome, StoreError> {
    let record = PostIdRecord {
        post_id: post_id.to_string(),
    };
    let condition = Condition::not_exists(attr::POST_ID);
    swallow_condition(db::put_record(table, &record, Some(&condition)).await)
}

/// Store a slug mapping unless the stored one is as new or newer, so the
/// timestamp of a slug never moves backwards.
#[instrument(skip(table))]
pub async fn put_slug_mapping(
    table: &dyn KvTable,
    record: &SlugMappingRecord,
) -> Result<WriteOutcome, StoreError> {
    let condition = Condition::not_exists(attr::SLUG)
        .or(Condition::less_than(attr::TIMESTAMP, record.timestamp));
    swallow_condition(db::put_record(table, record, Some(&condition)).await)
}

/// Re-insert emitted ids into the pending table: one pass deleting them all,
/// then one pass putting them all. The passes are not atomic together.
#[instrument(skip_all, fields(ids = post_ids.len()))]
pub async fn put_pending_posts(
    table: &dyn KvTable,
    post_ids: &[String],
) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    let ids: Vec<String> = post_ids
        .iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect();
    if ids.is_empty() {
        return Ok(());
    }

    table.batch_delete(&ids).await?;
    let items = ids
        .iter()
        .map(|post_id| {
            db::to_item(&PostIdRecord {
                post_id: post_id.clone(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    table.batch_put(items).await?;
    info!(count = ids.len(), "pending posts written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SqliteTable;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSearch {
        calls: Arc<Mutex<Vec<String>>>,
        answer: Option<String>,
    }

    #[async_trait]
    impl PostSearch for RecordingSearch {
        async fn search_post_id(&self, slug: &str) -> Result<Option<String>, PostsError> {
            self.calls.lock().unwrap().push(slug.to_string());
            Ok(self.answer.clone())
        }
    }

    async fn table(name: &str, key: &str) -> SqliteTable {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        SqliteTable::new(pool, name, key)
    }

    fn entry(slug: &str, updated_at: i64) -> SitemapEntry {
        SitemapEntry {
            slug: slug.into(),
            updated_at,
        }
    }

    async fn seed(slugs: &SqliteTable, slug: &str, post_id: &str, timestamp: i64) {
        let record = SlugMappingRecord {
            slug: slug.into(),
            post_id: post_id.into(),
            timestamp,
        };
        db::put_record(slugs, &record, None).await.unwrap();
    }

    #[tokio::test]
    async fn newer_entry_is_updated_without_search() {
        let slugs = table("slugs", attr::SLUG).await;
        seed(&slugs, "hello", "42", 100).await;
        let search = RecordingSearch::default();

        let verdict = check_updated_post(&entry("hello", 200), &slugs, &search)
            .await
            .unwrap();
        assert_eq!(
            verdict,
            Freshness::Updated {
                post_id: "42".into()
            }
        );
        assert!(search.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn equal_or_older_entry_is_stale() {
        let slugs = table("slugs", attr::SLUG).await;
        seed(&slugs, "hello", "42", 200).await;
        let search = RecordingSearch::default();

        for ts in [200, 100] {
            let verdict = check_updated_post(&entry("hello", ts), &slugs, &search)
                .await
                .unwrap();
            assert_eq!(verdict, Freshness::Stale);
        }
        assert!(search.calls.lock().unwrap().is_empty());
        let stored: SlugMappingRecord = db::get_record(&slugs, "hello").await.unwrap().unwrap();
        assert_eq!(stored.timestamp, 200);
    }

    #[tokio::test]
    async fn unknown_slug_searches_once() {
        let slugs = table("slugs", attr::SLUG).await;
        let search = RecordingSearch {
            answer: Some("77".into()),
            ..Default::default()
        };
        let verdict = check_updated_post(&entry("fresh", 1), &slugs, &search)
            .await
            .unwrap();
        assert_eq!(verdict.into_post_id(), Some("77".into()));
        assert_eq!(*search.calls.lock().unwrap(), vec!["fresh".to_string()]);

        let empty = RecordingSearch::default();
        let verdict = check_updated_post(&entry("fresh", 1), &slugs, &empty)
            .await
            .unwrap();
        assert_eq!(verdict, Freshness::New { post_id: None });
        assert_eq!(empty.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn root_sitemap_only_moves_forward() {
        let sitemaps = table("sitemaps", attr::URL).await;
        let record = |updated_at| RootSitemapRecord {
            url: "https://x/sitemap-1.xml".into(),
            updated_at,
        };
        assert_eq!(
            put_root_sitemap(&sitemaps, &record(100)).await.unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(
            put_root_sitemap(&sitemaps, &record(100)).await.unwrap(),
            WriteOutcome::Superseded
        );
        assert_eq!(
            put_root_sitemap(&sitemaps, &record(50)).await.unwrap(),
            WriteOutcome::Superseded
        );
        assert_eq!(
            put_root_sitemap(&sitemaps, &record(300)).await.unwrap(),
            WriteOutcome::Written
        );
        let stored: RootSitemapRecord = db::get_record(&sitemaps, "https://x/sitemap-1.xml")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.updated_at, 300);
    }

    #[tokio::test]
    async fn post_id_written_once() {
        let ids = table("post_ids", attr::POST_ID).await;
        assert_eq!(
            put_post_id_if_absent(&ids, "5").await.unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(
            put_post_id_if_absent(&ids, "5").await.unwrap(),
            WriteOutcome::Superseded
        );
    }

    #[tokio::test]
    async fn slug_mapping_never_goes_backwards() {
        let slugs = table("slugs", attr::SLUG).await;
        let record = |post_id: &str, timestamp| SlugMappingRecord {
            slug: "s".into(),
            post_id: post_id.into(),
            timestamp,
        };
        put_slug_mapping(&slugs, &record("1", 200)).await.unwrap();
        assert_eq!(
            put_slug_mapping(&slugs, &record("2", 100)).await.unwrap(),
            WriteOutcome::Superseded
        );
        let stored: SlugMappingRecord = db::get_record(&slugs, "s").await.unwrap().unwrap();
        assert_eq!(stored, record("1", 200));
    }

    #[tokio::test]
    async fn pending_posts_are_rewritten_once_each() {
        let pending = table("post_ids", attr::POST_ID).await;
        let ids: Vec<String> = ["3", "1", "3"].iter().map(|s| s.to_string()).collect();
        put_pending_posts(&pending, &ids).await.unwrap();
        put_pending_posts(&pending, &ids).await.unwrap();
        for id in ["1", "3"] {
            assert!(pending.get_item(id).await.unwrap().is_some());
        }
        put_pending_posts(&pending, &[]).await.unwrap();
    }
}

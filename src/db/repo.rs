use super::model::{Condition, Item, SqlParam, StoreError};
use super::KvTable;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqliteArguments;
use sqlx::query::Query;
use sqlx::{Sqlite, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file. Leaves in-memory URLs
/// untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = match (path_part.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(rest), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), rest),
        _ => path_part.to_string(),
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) if q.contains("mode=") => {
            rebuilt.push('?');
            rebuilt.push_str(q);
        }
        Some(q) => {
            rebuilt.push('?');
            rebuilt.push_str(q);
            rebuilt.push_str("&mode=rwc");
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// One logical table stored in the shared `kv_items` table.
#[derive(Debug, Clone)]
pub struct SqliteTable {
    pool: Pool,
    name: String,
    key_attribute: String,
}

impl SqliteTable {
    pub fn new(pool: Pool, name: impl Into<String>, key_attribute: impl Into<String>) -> Self {
        Self {
            pool,
            name: name.into(),
            key_attribute: key_attribute.into(),
        }
    }

    fn key_of(&self, item: &Item) -> Result<String, StoreError> {
        match item.get(&self.key_attribute) {
            Some(Value::String(key)) if !key.is_empty() => Ok(key.clone()),
            _ => Err(StoreError::MissingKey(self.key_attribute.clone())),
        }
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: Vec<SqlParam>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            SqlParam::Text(text) => query.bind(text),
            SqlParam::Int(value) => query.bind(value),
        };
    }
    query
}

#[async_trait]
impl KvTable for SqliteTable {
    #[instrument(skip_all, fields(key = %key))]
    async fn get_item(&self, key: &str) -> Result<Option<Item>, StoreError> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT item FROM kv_items WHERE table_name = ? AND pk = ?")
                .bind(&self.name)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip_all)]
    async fn put_item(&self, item: Item, condition: Option<&Condition>) -> Result<(), StoreError> {
        let key = self.key_of(&item)?;
        let body = serde_json::to_string(&item)?;

        let Some(condition) = condition else {
            sqlx::query(
                "INSERT INTO kv_items (table_name, pk, item) VALUES (?, ?, ?) \
                 ON CONFLICT (table_name, pk) \
                 DO UPDATE SET item = excluded.item, updated_at = CURRENT_TIMESTAMP",
            )
            .bind(&self.name)
            .bind(&key)
            .bind(&body)
            .execute(&self.pool)
            .await?;
            return Ok(());
        };

        let mut params = Vec::new();
        let predicate = condition.to_sql("kv_items.item", &mut params);

        // An absent item can only be created when the condition allows "no item";
        // otherwise the write is an update of an existing row or nothing at all.
        let result = if condition.holds_for_absent() {
            let sql = format!(
                "INSERT INTO kv_items (table_name, pk, item) VALUES (?, ?, ?) \
                 ON CONFLICT (table_name, pk) \
                 DO UPDATE SET item = excluded.item, updated_at = CURRENT_TIMESTAMP \
                 WHERE {predicate}"
            );
            let query = sqlx::query(&sql).bind(&self.name).bind(&key).bind(&body);
            bind_params(query, params).execute(&self.pool).await?
        } else {
            let sql = format!(
                "UPDATE kv_items SET item = ?, updated_at = CURRENT_TIMESTAMP \
                 WHERE table_name = ? AND pk = ? AND {predicate}"
            );
            let query = sqlx::query(&sql).bind(&body).bind(&self.name).bind(&key);
            bind_params(query, params).execute(&self.pool).await?
        };

        if result.rows_affected() == 0 {
            return Err(StoreError::ConditionalCheckFailed {
                table: self.name.clone(),
                key,
            });
        }
        Ok(())
    }

    #[instrument(skip_all, fields(key = %key))]
    async fn delete_item(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_items WHERE table_name = ? AND pk = ?")
            .bind(&self.name)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_pool() -> Pool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    fn item(value: serde_json::Value) -> Item {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn file_urls_are_normalized() {
        assert_eq!(prepare_sqlite_url("sqlite::memory:"), "sqlite::memory:");
        assert_eq!(
            prepare_sqlite_url("postgres://localhost/db"),
            "postgres://localhost/db"
        );
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("nested/index.db");
        let url = prepare_sqlite_url(&format!("sqlite://{}", path.display()));
        assert_eq!(url, format!("sqlite://{}?mode=rwc", path.display()));
        assert!(path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn put_get_delete() {
        let pool = setup_pool().await;
        let table = SqliteTable::new(pool, "posts", "post_id");

        assert!(table.get_item("1").await.unwrap().is_none());
        table
            .put_item(item(json!({"post_id": "1", "n": 1})), None)
            .await
            .unwrap();
        table
            .put_item(item(json!({"post_id": "1", "n": 2})), None)
            .await
            .unwrap();
        let got = table.get_item("1").await.unwrap().unwrap();
        assert_eq!(got.get("n"), Some(&json!(2)));

        table.delete_item("1").await.unwrap();
        assert!(table.get_item("1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tables_do_not_share_keys() {
        let pool = setup_pool().await;
        let a = SqliteTable::new(pool.clone(), "a", "id");
        let b = SqliteTable::new(pool, "b", "id");
        a.put_item(item(json!({"id": "k"})), None).await.unwrap();
        assert!(b.get_item("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_key_attribute_is_rejected() {
        let pool = setup_pool().await;
        let table = SqliteTable::new(pool, "posts", "post_id");
        let err = table
            .put_item(item(json!({"post_id": 7})), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingKey(attr) if attr == "post_id"));
    }

    #[tokio::test]
    async fn not_exists_condition_writes_once() {
        let pool = setup_pool().await;
        let table = SqliteTable::new(pool, "posts", "post_id");
        let cond = Condition::not_exists("post_id");

        table
            .put_item(item(json!({"post_id": "9", "v": "first"})), Some(&cond))
            .await
            .unwrap();
        let err = table
            .put_item(item(json!({"post_id": "9", "v": "second"})), Some(&cond))
            .await
            .unwrap_err();
        assert!(err.is_conditional_check_failed());

        let got = table.get_item("9").await.unwrap().unwrap();
        assert_eq!(got.get("v"), Some(&json!("first")));
    }

    #[tokio::test]
    async fn less_than_alone_never_creates() {
        let pool = setup_pool().await;
        let table = SqliteTable::new(pool, "sitemaps", "url");
        let cond = Condition::less_than("updated_at", 10);
        let err = table
            .put_item(item(json!({"url": "u", "updated_at": 10})), Some(&cond))
            .await
            .unwrap_err();
        assert!(err.is_conditional_check_failed());
        assert!(table.get_item("u").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn newer_or_absent_condition() {
        let pool = setup_pool().await;
        let table = SqliteTable::new(pool, "sitemaps", "url");
        let put = |ts: i64| {
            let table = table.clone();
            async move {
                let cond = Condition::not_exists("url").or(Condition::less_than("updated_at", ts));
                table
                    .put_item(item(json!({"url": "u", "updated_at": ts})), Some(&cond))
                    .await
            }
        };

        put(100).await.unwrap();
        put(200).await.unwrap();
        assert!(put(200).await.unwrap_err().is_conditional_check_failed());
        assert!(put(150).await.unwrap_err().is_conditional_check_failed());

        let got = table.get_item("u").await.unwrap().unwrap();
        assert_eq!(got.get("updated_at"), Some(&json!(200)));
    }
}

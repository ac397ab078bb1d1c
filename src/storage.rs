//! Object storage: buckets of byte blobs addressed by slash-separated keys.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },
    #[error("invalid object key {0:?}")]
    InvalidKey(String),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    pub key: String,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError>;

    /// Objects whose key starts with `prefix`, sorted by key.
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError>;
}

/// Stores each object as `<root>/<bucket>/<key>`. Content types live in a
/// sidecar tree `<root>/.content-types/<bucket>/<key>` so listings stay clean.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

const CONTENT_TYPES_DIR: &str = ".content-types";

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn check_segment(value: &str) -> Result<(), StorageError> {
    let path = Path::new(value);
    let plain = !value.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(value.to_string()))
    }
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StorageError> {
        check_segment(bucket)?;
        check_segment(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn content_type_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(CONTENT_TYPES_DIR).join(bucket).join(key)
    }

    /// Content type recorded by the last `put`, if any.
    pub async fn content_type(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<String>, StorageError> {
        self.object_path(bucket, key)?;
        let path = self.content_type_path(bucket, key);
        match tokio::fs::read_to_string(&path).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(io_err(&path)(err)),
        }
    }
}

async fn write_file(path: &Path, body: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    tokio::fs::write(path, body).await.map_err(io_err(path))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    #[instrument(skip(self))]
    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(body) => Ok(body),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            Err(err) => Err(io_err(&path)(err)),
        }
    }

    #[instrument(skip(self, body), fields(size = body.len()))]
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StorageError> {
        let path = self.object_path(bucket, key)?;
        write_file(&path, &body).await?;

        let type_path = self.content_type_path(bucket, key);
        match content_type {
            Some(value) => write_file(&type_path, value.as_bytes()).await?,
            None => match tokio::fs::remove_file(&type_path).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(io_err(&type_path)(err)),
            },
        }
        debug!(path = %path.display(), "object stored");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectMeta>, StorageError> {
        check_segment(bucket)?;
        let bucket_dir = self.root.join(bucket);
        let mut pending = vec![(bucket_dir, String::new())];
        let mut objects = Vec::new();

        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&dir)(err)),
            };
            while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir))? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let key = if rel.is_empty() {
                    name
                } else {
                    format!("{rel}/{name}")
                };
                let path = entry.path();
                let meta = entry.metadata().await.map_err(io_err(&path))?;
                if meta.is_dir() {
                    pending.push((path, key));
                } else if key.starts_with(prefix) {
                    let last_modified = meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .map_err(io_err(&path))?;
                    objects.push(ObjectMeta {
                        key,
                        last_modified,
                        size: meta.len(),
                    });
                }
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_list() {
        let td = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(td.path());

        store
            .put("b", "posts/2.json.gz", b"two".to_vec(), Some("application/gzip"))
            .await
            .unwrap();
        store
            .put("b", "posts/1.json.gz", b"one".to_vec(), None)
            .await
            .unwrap();
        store
            .put("b", "archives/x.html", b"x".to_vec(), None)
            .await
            .unwrap();

        assert_eq!(store.get("b", "posts/1.json.gz").await.unwrap(), b"one");
        assert_eq!(
            store.content_type("b", "posts/2.json.gz").await.unwrap().as_deref(),
            Some("application/gzip")
        );
        assert_eq!(store.content_type("b", "posts/1.json.gz").await.unwrap(), None);

        let keys: Vec<_> = store
            .list("b", "posts/")
            .await
            .unwrap()
            .into_iter()
            .map(|m| (m.key, m.size))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("posts/1.json.gz".to_string(), 3),
                ("posts/2.json.gz".to_string(), 3)
            ]
        );
        assert!(store.list("missing", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_and_invalid_keys() {
        let td = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(td.path());
        assert!(matches!(
            store.get("b", "nope").await,
            Err(StorageError::NotFound { .. })
        ));
        assert!(matches!(
            store.get("b", "../escape").await,
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(
            store.put("b", "/abs", Vec::new(), None).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}

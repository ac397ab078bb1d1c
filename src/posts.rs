//! Client for the blog's posts API.
use crate::http::{FetchError, HttpFetcher};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Debug, Error)]
pub enum PostsError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid posts API response: {0}")]
    Json(#[from] serde_json::Error),
    #[error("posts API response is not an array")]
    NotAnArray,
    #[error("search hit for slug {0:?} has no usable id")]
    MissingId(String),
}

/// Look up a post id by slug.
#[async_trait]
pub trait PostSearch: Send + Sync {
    /// `None` when the API knows no post with this slug.
    async fn search_post_id(&self, slug: &str) -> Result<Option<String>, PostsError>;
}

#[derive(Clone)]
pub struct PostsApi {
    http: Arc<dyn HttpFetcher>,
    base_url: String,
}

impl PostsApi {
    pub fn new(http: Arc<dyn HttpFetcher>, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn post_url(&self, post_id: &str) -> String {
        format!("{}/{}", self.base_url, post_id)
    }

    pub fn search_url(&self, slug: &str) -> String {
        format!(
            "{}?context=embed&slug={}",
            self.base_url,
            urlencoding::encode(slug)
        )
    }

    /// Raw JSON of one post.
    #[instrument(skip(self))]
    pub async fn fetch_post(&self, post_id: &str) -> Result<Vec<u8>, FetchError> {
        self.http.get(&self.post_url(post_id)).await
    }
}

#[async_trait]
impl PostSearch for PostsApi {
    #[instrument(skip(self))]
    async fn search_post_id(&self, slug: &str) -> Result<Option<String>, PostsError> {
        let body = self.http.get(&self.search_url(slug)).await?;
        first_post_id(slug, &body)
    }
}

fn first_post_id(slug: &str, body: &[u8]) -> Result<Option<String>, PostsError> {
    let data: Value = serde_json::from_slice(body)?;
    let hits = data.as_array().ok_or(PostsError::NotAnArray)?;
    let Some(first) = hits.first() else {
        return Ok(None);
    };
    match first.get("id") {
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
        _ => Err(PostsError::MissingId(slug.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoHttp;

    #[async_trait]
    impl HttpFetcher for NoHttp {
        async fn get(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
            unreachable!("not used")
        }
    }

    #[test]
    fn urls() {
        let api = PostsApi::new(Arc::new(NoHttp), "https://blog.example.com/wp-json/wp/v2/posts/");
        assert_eq!(
            api.post_url("42"),
            "https://blog.example.com/wp-json/wp/v2/posts/42"
        );
        assert_eq!(
            api.search_url("hello world"),
            "https://blog.example.com/wp-json/wp/v2/posts?context=embed&slug=hello%20world"
        );
    }

    #[test]
    fn first_hit_wins() {
        let body = br#"[{"id": 42, "slug": "a"}, {"id": 43}]"#;
        assert_eq!(first_post_id("a", body).unwrap(), Some("42".into()));
        assert_eq!(first_post_id("a", b"[]").unwrap(), None);
        assert!(matches!(
            first_post_id("a", b"{}"),
            Err(PostsError::NotAnArray)
        ));
        assert!(matches!(
            first_post_id("a", br#"[{"slug": "a"}]"#),
            Err(PostsError::MissingId(_))
        ));
    }
}

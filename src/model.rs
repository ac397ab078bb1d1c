use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Attribute names shared between records and the conditions written against them.
pub mod attr {
    pub const SLUG: &str = "slug";
    pub const POST_ID: &str = "post_id";
    pub const TIMESTAMP: &str = "timestamp";
    pub const URL: &str = "url";
    pub const UPDATED_AT: &str = "updated_at";
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid timestamp {value:?}: {reason}")]
pub struct TimestampError {
    pub value: String,
    pub reason: String,
}

/// Parse an ISO-8601 timestamp carrying a UTC offset into milliseconds since epoch.
///
/// Accepts RFC 3339 (`2023-04-01T12:00:00+09:00`, `...Z`) and the compact
/// `+0900` offset form. Strings without an offset are rejected.
pub fn parse_timestamp_millis(value: &str) -> Result<i64, TimestampError> {
    let trimmed = value.trim();
    let parsed = DateTime::parse_from_rfc3339(trimmed)
        .or_else(|_| DateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%z"));
    match parsed {
        Ok(dt) => Ok(dt.timestamp_millis()),
        Err(err) => Err(TimestampError {
            value: value.to_string(),
            reason: err.to_string(),
        }),
    }
}

/// Parse a GMT timestamp without offset (`2023-04-01T03:00:00`) into milliseconds.
pub fn parse_gmt_millis(value: &str) -> Result<i64, TimestampError> {
    NaiveDateTime::parse_from_str(value.trim(), "%Y-%m-%dT%H:%M:%S")
        .map(|dt| dt.and_utc().timestamp_millis())
        .map_err(|err| TimestampError {
            value: value.to_string(),
            reason: err.to_string(),
        })
}

/// Last known state of a post, keyed by its slug.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlugMappingRecord {
    pub slug: String,
    pub post_id: String,
    pub timestamp: i64,
}

/// Marker that a post id has been seen. Written at most once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostIdRecord {
    pub post_id: String,
}

/// A sub-sitemap listed by the root sitemap index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RootSitemapRecord {
    pub url: String,
    pub updated_at: i64,
}

/// One `<url>` of an individual sitemap, reduced to its slug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub slug: String,
    pub updated_at: i64,
}

/// One `<item>` of the RSS feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub link: String,
    pub post_id: String,
}

//! "Index of /dir" pages listing archived objects.
use crate::storage::ObjectMeta;
use askama::Template;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Reverse;
use thiserror::Error;

static LEADING_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+)\.").expect("valid regex"));

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no index ordering for directory {0:?}")]
    UnknownDir(String),
    #[error("{0:?} does not start with a post number")]
    BadName(String),
    #[error("failed to render index page: {0}")]
    Render(#[from] askama::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct IndexEntry {
    pub name: String,
    pub last_modified: String,
    pub size: u64,
}

#[derive(Template)]
#[template(path = "subpage_index.html")]
struct SubpageIndexTemplate<'a> {
    path: &'a str,
    entries: &'a [IndexEntry],
}

/// Entries for the objects directly named `{dir}/...{extension}`, by base name.
pub fn entries_from(objects: &[ObjectMeta], extension: &str) -> Vec<IndexEntry> {
    objects
        .iter()
        .filter(|o| o.key.ends_with(extension))
        .map(|o| IndexEntry {
            name: o.key.rsplit('/').next().unwrap_or(&o.key).to_string(),
            last_modified: o.last_modified.format("%Y-%m-%d %H:%M:%S").to_string(),
            size: o.size,
        })
        .collect()
}

fn post_number(name: &str) -> Result<u64, IndexError> {
    LEADING_NUMBER
        .captures(name)
        .and_then(|c| c[1].parse().ok())
        .ok_or_else(|| IndexError::BadName(name.to_string()))
}

/// `posts` are ordered by post number, `archives` by name, newest first.
pub fn sort_entries(
    dir: &str,
    mut entries: Vec<IndexEntry>,
) -> Result<Vec<IndexEntry>, IndexError> {
    match dir {
        "posts" => {
            let mut keyed = entries
                .into_iter()
                .map(|e| Ok((post_number(&e.name)?, e)))
                .collect::<Result<Vec<_>, IndexError>>()?;
            keyed.sort_by_key(|(n, _)| Reverse(*n));
            Ok(keyed.into_iter().map(|(_, e)| e).collect())
        }
        "archives" => {
            entries.sort_by(|a, b| b.cmp(a));
            Ok(entries)
        }
        other => Err(IndexError::UnknownDir(other.to_string())),
    }
}

pub fn render_index(dir: &str, entries: &[IndexEntry]) -> Result<String, IndexError> {
    Ok(SubpageIndexTemplate { path: dir, entries }.render()?)
}

//! Sitemap parsing (`<sitemapindex>` and `<urlset>` documents).
use crate::model::{parse_timestamp_millis, RootSitemapRecord, SitemapEntry, TimestampError};
use once_cell::sync::Lazy;
use sxd_document::{parser, Package};
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Factory, Value};
use thiserror::Error;

static XP_FACTORY: Lazy<Factory> = Lazy::new(Factory::new);

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is not UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("malformed XML: {0}")]
    Xml(String),
    #[error("bad XPath {expr:?}: {reason}")]
    XPath { expr: String, reason: String },
    #[error("<{parent}> without <{child}>")]
    MissingElement {
        parent: &'static str,
        child: &'static str,
    },
    #[error("no slug in {0:?}")]
    NoSlug(String),
    #[error(transparent)]
    Timestamp(#[from] TimestampError),
}

pub(crate) fn parse_package(xml: &[u8]) -> Result<Package, ParseError> {
    let text = std::str::from_utf8(xml)?;
    parser::parse(text.trim_start_matches('\u{feff}')).map_err(|e| ParseError::Xml(e.to_string()))
}

/// Evaluate `expr` relative to `node`, returning matches in document order.
pub(crate) fn select<'d>(
    node: impl Into<Node<'d>>,
    expr: &str,
) -> Result<Vec<Node<'d>>, ParseError> {
    let bad = |reason: String| ParseError::XPath {
        expr: expr.to_string(),
        reason,
    };
    let xpath = XP_FACTORY
        .build(expr)
        .map_err(|e| bad(e.to_string()))?
        .ok_or_else(|| bad("empty expression".into()))?;
    let context = Context::new();
    match xpath.evaluate(&context, node).map_err(|e| bad(e.to_string()))? {
        Value::Nodeset(nodes) => Ok(nodes.document_order()),
        _ => Ok(Vec::new()),
    }
}

/// Trimmed text of the first child element named `local` (namespace ignored).
pub(crate) fn child_text<'d>(node: Node<'d>, local: &str) -> Result<Option<String>, ParseError> {
    let expr = format!("*[local-name()='{local}']");
    Ok(select(node, &expr)?
        .first()
        .map(|n| n.string_value().trim().to_string()))
}

fn required_child<'d>(
    node: Node<'d>,
    parent: &'static str,
    child: &'static str,
) -> Result<String, ParseError> {
    child_text(node, child)?.ok_or(ParseError::MissingElement { parent, child })
}

fn elements<'d>(package: &'d Package, local: &str) -> Result<Vec<Node<'d>>, ParseError> {
    select(package.as_document().root(), &format!("//*[local-name()='{local}']"))
}

/// `<sitemap>` entries of a sitemap index whose `<loc>` contains `prefix`.
pub fn parse_root_sitemap(xml: &[u8], prefix: &str) -> Result<Vec<RootSitemapRecord>, ParseError> {
    let package = parse_package(xml)?;
    let mut records = Vec::new();
    for node in elements(&package, "sitemap")? {
        let url = required_child(node, "sitemap", "loc")?;
        if !url.contains(prefix) {
            continue;
        }
        let lastmod = required_child(node, "sitemap", "lastmod")?;
        records.push(RootSitemapRecord {
            url,
            updated_at: parse_timestamp_millis(&lastmod)?,
        });
    }
    Ok(records)
}

/// `<url>` entries of an individual sitemap, keyed by slug.
pub fn parse_individual_sitemap(xml: &[u8]) -> Result<Vec<SitemapEntry>, ParseError> {
    let package = parse_package(xml)?;
    let mut entries = Vec::new();
    for node in elements(&package, "url")? {
        let loc = required_child(node, "url", "loc")?;
        let lastmod = required_child(node, "url", "lastmod")?;
        entries.push(SitemapEntry {
            slug: slug_of(&loc).ok_or_else(|| ParseError::NoSlug(loc.clone()))?,
            updated_at: parse_timestamp_millis(&lastmod)?,
        });
    }
    Ok(entries)
}

/// Every `<loc>` of any sitemap document.
pub fn parse_locs(xml: &[u8]) -> Result<Vec<String>, ParseError> {
    let package = parse_package(xml)?;
    Ok(elements(&package, "loc")?
        .into_iter()
        .map(|n| n.string_value().trim().to_string())
        .collect())
}

/// Last non-empty path segment of a URL.
pub fn slug_of(url: &str) -> Option<String> {
    url.split('/')
        .rev()
        .find(|part| !part.is_empty())
        .map(str::to_string)
}

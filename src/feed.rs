//! RSS/Atom feed parsing down to `(link, post id)` pairs.
use crate::model::FeedEntry;
use crate::sitemap::{child_text, parse_package, select, ParseError};
use sxd_xpath::nodeset::Node;

/// Entries of a feed. Every entry must carry a `post-id` element, as
/// WordPress feeds do (`<post-id xmlns="com-wordpress:feed-additions:1">`).
pub fn parse_feed(xml: &[u8]) -> Result<Vec<FeedEntry>, ParseError> {
    let package = parse_package(xml)?;
    let nodes = select(
        package.as_document().root(),
        "//*[local-name()='item' or local-name()='entry']",
    )?;

    let mut entries = Vec::with_capacity(nodes.len());
    for node in nodes {
        let post_id = child_text(node, "post-id")?.ok_or(ParseError::MissingElement {
            parent: "item",
            child: "post-id",
        })?;
        let link = link_of(node)?.ok_or(ParseError::MissingElement {
            parent: "item",
            child: "link",
        })?;
        entries.push(FeedEntry { link, post_id });
    }
    Ok(entries)
}

/// RSS puts the URL in the element text, Atom in `href`.
fn link_of(node: Node<'_>) -> Result<Option<String>, ParseError> {
    let Some(link) = select(node, "*[local-name()='link']")?.into_iter().next() else {
        return Ok(None);
    };
    let text = link.string_value().trim().to_string();
    if !text.is_empty() {
        return Ok(Some(text));
    }
    Ok(link
        .element()
        .and_then(|e| e.attribute_value("href"))
        .map(|href| href.trim().to_string()))
}

use feed_rs::parser;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Feed body could not be turned into a feed document.
#[derive(Debug, Error)]
#[error("Parse error: {0}")]
pub struct ParseError(pub String);

/// One entry of a poll window.
///
/// Created fresh on every poll. Only [`FeedItem::hash`] survives across
/// polls, through the item cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub raw_id: Option<String>,
    pub link: Option<String>,
    pub title: Option<String>,
    /// Publish (or update) time in unix seconds, if the source gave one.
    pub published: Option<i64>,
    pub hash: String,
}

impl FeedItem {
    pub fn new(
        raw_id: Option<String>,
        link: Option<String>,
        title: Option<String>,
        published: Option<i64>,
    ) -> Self {
        let hash = fingerprint(title.as_deref(), link.as_deref(), raw_id.as_deref());
        Self {
            raw_id,
            link,
            title,
            published,
            hash,
        }
    }
}

/// Parsed feed document: metadata plus the item window.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// Wire-format parser seam.
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError>;
}

/// RSS/Atom/JSON Feed parser backed by `feed-rs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedRsParser;

impl FeedParser for FeedRsParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed, ParseError> {
        let feed = parser::parse(bytes).map_err(|e| ParseError(e.to_string()))?;

        let items = feed
            .entries
            .into_iter()
            .map(|entry| {
                let link = entry.links.first().map(|l| l.href.clone());
                let published = entry.published.or(entry.updated).map(|dt| dt.timestamp());
                let title = entry.title.map(|t| t.content);
                let raw_id = Some(entry.id.trim().to_owned()).filter(|id| !id.is_empty());
                FeedItem::new(raw_id, link, title, published)
            })
            .collect();

        Ok(ParsedFeed {
            title: feed.title.map(|t| t.content),
            items,
        })
    }
}

/// Identity of an item across polls: SHA-256 over title, link and raw id.
pub fn fingerprint(title: Option<&str>, link: Option<&str>, raw_id: Option<&str>) -> String {
    let input = format!(
        "{}|{}|{}",
        title.unwrap_or(""),
        link.unwrap_or(""),
        raw_id.unwrap_or("")
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Example</title>
    <item><guid>a-1</guid><title>First</title><link>https://example.com/1</link>
        <pubDate>Mon, 01 Jan 2024 00:00:00 GMT</pubDate></item>
    <item><title>Second</title><link>https://example.com/2</link></item>
</channel></rss>"#;

    #[test]
    fn test_parse_rss_items() {
        let parsed = FeedRsParser.parse(RSS.as_bytes()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Example"));
        assert_eq!(parsed.items.len(), 2);

        let first = &parsed.items[0];
        assert_eq!(first.raw_id.as_deref(), Some("a-1"));
        assert_eq!(first.title.as_deref(), Some("First"));
        assert_eq!(first.link.as_deref(), Some("https://example.com/1"));
        assert_eq!(first.published, Some(1704067200));

        assert_eq!(parsed.items[1].published, None);
    }

    #[test]
    fn test_parse_garbage_fails() {
        assert!(FeedRsParser.parse(b"<not valid xml").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = fingerprint(Some("t"), Some("https://x/1"), Some("id"));
        let b = fingerprint(Some("t"), Some("https://x/1"), Some("id"));
        let c = fingerprint(Some("t"), Some("https://x/2"), Some("id"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_item_hash_matches_fingerprint() {
        let item = FeedItem::new(None, Some("https://x/1".into()), Some("T".into()), None);
        assert_eq!(item.hash, fingerprint(Some("T"), Some("https://x/1"), None));
    }
}

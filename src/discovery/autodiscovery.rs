use scraper::{Html, Selector};
use serde::Serialize;
use url::Url;

const RSS_MIME: &str = "application/rss+xml";
const ATOM_MIME: &str = "application/atom+xml";

/// Syndication format announced by a `<link>` element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    Rss,
    Atom,
    Unknown,
}

impl FeedType {
    fn from_mime(mime: &str) -> Self {
        match mime {
            RSS_MIME => FeedType::Rss,
            ATOM_MIME => FeedType::Atom,
            _ => FeedType::Unknown,
        }
    }
}

/// A feed link found on a page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredFeed {
    #[serde(rename = "type")]
    pub feed_type: FeedType,
    #[serde(rename = "url")]
    pub feed_url: String,
    pub title: Option<String>,
    #[serde(rename = "page")]
    pub page_url: String,
}

/// Finds every `<link rel="alternate">` with an RSS or Atom type on a page.
///
/// Relative hrefs are resolved against the page's `<base href>` (itself
/// resolved against `page_url`) or `page_url`. Legacy `feed:` URLs are
/// rewritten to http(s). Links without a usable href are skipped. Duplicate
/// links are kept.
pub fn autodiscover(html: &str, page_url: &Url) -> Vec<DiscoveredFeed> {
    let document = Html::parse_document(html);

    let base = Selector::parse("base[href]")
        .ok()
        .and_then(|sel| {
            document
                .select(&sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .and_then(|href| page_url.join(href.trim()).ok())
        })
        .unwrap_or_else(|| page_url.clone());

    let Ok(link_sel) = Selector::parse("link[rel][type]") else {
        return Vec::new();
    };

    document
        .select(&link_sel)
        .filter_map(|el| {
            let el = el.value();
            let rel = el.attr("rel")?;
            if !rel.trim().eq_ignore_ascii_case("alternate") {
                return None;
            }

            let mime = el.attr("type")?.trim().to_ascii_lowercase();
            if mime != RSS_MIME && mime != ATOM_MIME {
                return None;
            }

            let href = el.attr("href").map(str::trim).filter(|h| !h.is_empty())?;
            let feed_url = resolve_href(href, &base)?;

            let title = el
                .attr("title")
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned);

            Some(DiscoveredFeed {
                feed_type: FeedType::from_mime(&mime),
                feed_url,
                title,
                page_url: page_url.to_string(),
            })
        })
        .collect()
}

/// Resolves an href against `base`, rewriting `feed:` URLs first.
fn resolve_href(href: &str, base: &Url) -> Option<String> {
    let href = normalize_feed_scheme(href);
    base.join(&href).ok().map(|u| u.to_string())
}

/// Rewrites the legacy `feed:` scheme to http(s).
///
/// `feed://host/path` becomes `http://host/path`; `feed:https://host/path`
/// becomes `https://host/path`. Anything else is returned unchanged.
pub fn normalize_feed_scheme(href: &str) -> String {
    let Some(prefix) = href.get(..5) else {
        return href.to_owned();
    };
    if !prefix.eq_ignore_ascii_case("feed:") {
        return href.to_owned();
    }

    let rest = &href[5..];
    if let Some(authority) = rest.strip_prefix("//") {
        return format!("http://{authority}");
    }
    let lower = rest.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return rest.to_owned();
    }
    href.to_owned()
}

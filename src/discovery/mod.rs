//! Feed discovery: search queries in, feed URLs out.
//!
//! Queries are optionally expanded with pairwise combinations, sent to a
//! [`SearchProvider`], and every result page is scanned for
//! `<link rel="alternate">` feed announcements. Hits are appended to a
//! [`DiscoverySink`] as they are found.

mod autodiscovery;
mod crawler;
mod queries;
mod search;
mod sink;

pub use autodiscovery::{autodiscover, normalize_feed_scheme, DiscoveredFeed, FeedType};
pub use crawler::{DiscoverySettings, DiscoveryStats, FeedDiscovery};
pub use queries::{combine_queries, combine_queries_with};
pub use search::{BingSearch, NoSearch, SearchError, SearchProvider, DEFAULT_SEARCH_ENDPOINT};
pub use sink::{DiscoverySink, OutputFormat};

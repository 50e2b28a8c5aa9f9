//! Feed polling: one fetch, parse, classify and persist cycle per feed.
//!
//! - [`request`] - conditional GET construction from stored validators
//! - [`transport`] - HTTP transport with timeout and body size limit
//! - [`parser`] - RSS/Atom parsing via `feed-rs` and item fingerprints
//! - [`dedup`] - per-feed cache of fingerprints from the previous window
//! - [`outcome`] - outcome flags and their fixed-priority resolution
//! - [`actions`] - pluggable callbacks run on each outcome
//! - [`poll`] - the poll task and the bounded-concurrency runner

mod actions;
mod dedup;
mod outcome;
mod parser;
mod poll;
mod request;
mod transport;

pub use actions::{ArchiveActions, FeedActions, LoggingActions};
pub use dedup::{distinct_items, ItemCache};
pub use outcome::{OutcomeFlags, PollOutcome};
pub use parser::{fingerprint, FeedItem, FeedParser, FeedRsParser, ParseError, ParsedFeed};
pub use poll::{FeedPoller, PollReport, PollSettings};
pub use request::{build_request, format_http_date, parse_http_date, FetchRequest};
pub use transport::{FetchResponse, HttpTransport, Transport, TransportError, TransportSettings};

use chrono::{DateTime, Utc};

use crate::storage::Feed;

/// A GET request as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    /// `If-None-Match` value
    pub if_none_match: Option<String>,
    /// `If-Modified-Since` value, already formatted as an HTTP-date
    pub if_modified_since: Option<String>,
}

impl FetchRequest {
    /// Plain GET without validators.
    pub fn unconditional(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            if_none_match: None,
            if_modified_since: None,
        }
    }

    pub fn is_conditional(&self) -> bool {
        self.if_none_match.is_some() || self.if_modified_since.is_some()
    }
}

/// Builds the request for the next poll of `feed`.
///
/// Validators are only attached when the previous cycle fetched the feed
/// successfully (`Success`, `Miss` or `ExecutionTimeWarning`) and at least
/// one validator is stored. After a failure, or for a feed that was never
/// polled, the stored validators may not match the server and the request
/// is unconditional.
pub fn build_request(feed: &Feed) -> FetchRequest {
    if !feed.last_outcome.allows_conditional_fetch() || !feed.has_validator() {
        return FetchRequest::unconditional(&feed.url);
    }

    FetchRequest {
        url: feed.url.clone(),
        if_none_match: feed.etag.clone(),
        if_modified_since: feed.last_modified.and_then(format_http_date),
    }
}

/// Formats unix seconds as an RFC 7231 IMF-fixdate.
pub fn format_http_date(timestamp: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(timestamp, 0)
        .map(|dt| dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string())
}

/// Parses a `Last-Modified` header value into unix seconds.
pub fn parse_http_date(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::PollOutcome;

    fn feed_with(outcome: PollOutcome, etag: Option<&str>, last_modified: Option<i64>) -> Feed {
        let mut feed = Feed::new(1, "https://example.com/feed.xml");
        feed.last_outcome = outcome;
        feed.etag = etag.map(str::to_owned);
        feed.last_modified = last_modified;
        feed
    }

    #[test]
    fn test_trusted_outcomes_with_validator_are_conditional() {
        for outcome in [
            PollOutcome::Success,
            PollOutcome::Miss,
            PollOutcome::ExecutionTimeWarning,
        ] {
            let req = build_request(&feed_with(outcome, Some("\"abc\""), None));
            assert!(req.is_conditional(), "{outcome} should be conditional");
            assert_eq!(req.if_none_match.as_deref(), Some("\"abc\""));
            assert_eq!(req.if_modified_since, None);

            let req = build_request(&feed_with(outcome, None, Some(1_704_067_200)));
            assert_eq!(
                req.if_modified_since.as_deref(),
                Some("Mon, 01 Jan 2024 00:00:00 GMT")
            );
        }
    }

    #[test]
    fn test_both_validators_attached() {
        let req = build_request(&feed_with(
            PollOutcome::Success,
            Some("W/\"1\""),
            Some(1_704_067_200),
        ));
        assert!(req.if_none_match.is_some());
        assert!(req.if_modified_since.is_some());
    }

    #[test]
    fn test_untrusted_outcomes_are_unconditional() {
        for outcome in [
            PollOutcome::Open,
            PollOutcome::Unreachable,
            PollOutcome::Unparsable,
            PollOutcome::Error,
        ] {
            let req = build_request(&feed_with(outcome, Some("\"abc\""), Some(1_704_067_200)));
            assert!(!req.is_conditional(), "{outcome} should be unconditional");
            assert_eq!(req.url, "https://example.com/feed.xml");
        }
    }

    #[test]
    fn test_no_validator_is_unconditional() {
        let req = build_request(&feed_with(PollOutcome::Success, None, None));
        assert!(!req.is_conditional());
    }

    #[test]
    fn test_http_date_round_trip() {
        let formatted = format_http_date(1_704_067_200).unwrap();
        assert_eq!(parse_http_date(&formatted), Some(1_704_067_200));
        assert_eq!(parse_http_date("not a date"), None);
    }
}

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::feed::normalize::{entries_from_feed, normalize, parse_timestamp, Article};
use crate::feed::transport::{Transport, TransportError};
use crate::subscription::SubscriptionNode;

/// What went wrong with a single feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Bytes could not be obtained (network, status, timeout, size, URL).
    Transport,
    /// Bytes arrived but are not a feed document.
    Parse,
    /// A category node was passed where a feed was expected.
    NotAFeed,
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FetchErrorKind::Transport => "transport",
            FetchErrorKind::Parse => "parse",
            FetchErrorKind::NotAFeed => "not a feed",
        })
    }
}

/// Per-feed failure. The aggregator records these as data; they never abort
/// sibling fetches.
#[derive(Debug, Error)]
#[error("{feed_title}: {message}")]
pub struct FetchError {
    pub feed_title: String,
    pub kind: FetchErrorKind,
    pub message: String,
    #[source]
    pub source: Option<TransportError>,
}

impl FetchError {
    fn transport(feed_title: &str, err: TransportError) -> Self {
        Self {
            feed_title: feed_title.to_string(),
            kind: FetchErrorKind::Transport,
            message: err.to_string(),
            source: Some(err),
        }
    }

    fn parse(feed_title: &str, message: String) -> Self {
        Self {
            feed_title: feed_title.to_string(),
            kind: FetchErrorKind::Parse,
            message,
            source: None,
        }
    }

    fn not_a_feed(feed_title: &str) -> Self {
        Self {
            feed_title: feed_title.to_string(),
            kind: FetchErrorKind::NotAFeed,
            message: "not a feed".to_string(),
            source: None,
        }
    }
}

/// Fetches one feed and turns it into normalized articles.
#[derive(Clone)]
pub struct FeedFetcher {
    transport: Arc<dyn Transport>,
}

impl FeedFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Retrieves `feed`, parses it as RSS/Atom/JSON Feed and normalizes every
    /// entry with the feed's title as provenance.
    ///
    /// All-or-nothing: any transport or parse failure yields a [`FetchError`]
    /// and no articles. Dropping the future cancels the request.
    pub async fn fetch(&self, feed: &SubscriptionNode) -> Result<Vec<Article>, FetchError> {
        let Some(url) = feed.source_url() else {
            return Err(FetchError::not_a_feed(&feed.title));
        };

        tracing::debug!(feed = %url, title = %feed.title, "Fetching feed");

        let bytes = self
            .transport
            .fetch(url)
            .await
            .map_err(|e| FetchError::transport(&feed.title, e))?;

        let parsed = feed_rs::parser::Builder::new()
            .timestamp_parser(parse_timestamp)
            .build()
            .parse(bytes.as_slice())
            .map_err(|e| FetchError::parse(&feed.title, format!("Parse error: {e}")))?;

        let entries = entries_from_feed(parsed);
        let total = entries.len();
        let articles: Vec<Article> = entries
            .into_iter()
            .filter_map(|entry| normalize(entry, &feed.title))
            .collect();

        if articles.len() < total {
            tracing::warn!(
                feed = %url,
                skipped = total - articles.len(),
                "Skipped entries with nothing to display"
            );
        }
        tracing::debug!(feed = %url, articles = articles.len(), "Feed fetched");

        Ok(articles)
    }
}

//! Fetching feeds and turning them into one sorted article list.
//!
//! - [`transport`] - raw document retrieval; [`HttpTransport`] adds retries,
//!   size limits and URL validation on top of `reqwest`
//! - [`fetcher`] - one feed to normalized articles via `feed-rs`
//! - [`normalize`] - the uniform [`Article`] shape and title cleanup
//! - [`aggregator`] - concurrent loads of a feed or category, generation
//!   tokens for superseding stale loads
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(HttpTransport::new(FetchSettings::default())?);
//! let aggregator = Aggregator::new(transport);
//! let result = aggregator.load(subscriptions.find(&["Tech"]).unwrap()).await?;
//! println!("{}", result.status_line());
//! ```

pub mod aggregator;
pub mod fetcher;
pub mod normalize;
pub mod transport;

pub use aggregator::{
    sort_newest_first, AggregateError, AggregationResult, Aggregator, FeedFailure, LoadProgress,
};
pub use fetcher::{FeedFetcher, FetchError, FetchErrorKind};
pub use normalize::{normalize, parse_timestamp, Article, RawEntry, PUBLISHED_FORMAT};
pub use transport::{FetchSettings, HttpTransport, Transport, TransportError};

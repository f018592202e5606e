//! Canopy: an OPML subscription tree with concurrent feed aggregation.
//!
//! - [`subscription`] - parse an OPML document into a category/feed forest
//! - [`feed`] - fetch, normalize, merge and sort articles for a node
//! - [`config`] - optional TOML configuration
//! - [`util`] - text sanitizing and URL validation shared by both

pub mod config;
pub mod feed;
pub mod subscription;
pub mod util;

pub use config::{Config, ConfigError};
pub use feed::{AggregateError, AggregationResult, Aggregator, Article, HttpTransport};
pub use subscription::{SubscriptionNode, Subscriptions};

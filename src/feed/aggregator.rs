use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::feed::fetcher::{FeedFetcher, FetchError};
use crate::feed::normalize::Article;
use crate::feed::transport::Transport;
use crate::subscription::SubscriptionNode;

/// Load-level failures. Individual feed failures are not errors here; they
/// are reported in [`AggregationResult::failures`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AggregateError {
    /// A newer load started before this one finished; its results were
    /// discarded.
    #[error("Load {generation} superseded by a newer request")]
    Superseded { generation: u64 },
    #[error("'{0}' is a category, not a feed")]
    NotAFeed(String),
    #[error("'{0}' is a feed, not a category")]
    NotACategory(String),
}

/// A feed that could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedFailure {
    pub feed_title: String,
    pub message: String,
}

impl From<FetchError> for FeedFailure {
    fn from(err: FetchError) -> Self {
        Self {
            feed_title: err.feed_title,
            message: err.message,
        }
    }
}

/// Merged outcome of one load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationResult {
    /// Load token this result belongs to.
    pub generation: u64,
    /// Title of the node that was loaded.
    pub target: String,
    /// Newest first; undated articles last.
    pub articles: Vec<Article>,
    pub feeds_attempted: usize,
    pub feeds_failed: usize,
    /// In feed declaration order.
    pub failures: Vec<FeedFailure>,
}

impl AggregationResult {
    /// One-line summary, e.g. `Loaded 42 articles from 7 feeds (1 failed)`.
    pub fn status_line(&self) -> String {
        let mut line = format!(
            "Loaded {} {} from {} {}",
            self.articles.len(),
            plural(self.articles.len(), "article", "articles"),
            self.feeds_attempted,
            plural(self.feeds_attempted, "feed", "feeds"),
        );
        if self.feeds_failed > 0 {
            line.push_str(&format!(" ({} failed)", self.feeds_failed));
        }
        line
    }
}

fn plural<'a>(n: usize, one: &'a str, many: &'a str) -> &'a str {
    if n == 1 {
        one
    } else {
        many
    }
}

/// Sent after each feed of a load completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadProgress {
    pub generation: u64,
    pub completed: usize,
    pub total: usize,
    pub feed_title: String,
    pub failed: bool,
}

/// Stable newest-first ordering. Equal instants keep their input order.
pub fn sort_newest_first(articles: &mut [Article]) {
    articles.sort_by_key(|a| Reverse(a.sort_key()));
}

/// Loads feeds or whole categories concurrently and merges the articles.
///
/// Every `load_*` call takes a new generation token. A load that is
/// overtaken by a newer one drops its in-flight fetches and returns
/// [`AggregateError::Superseded`], so only the latest request can produce a
/// result.
pub struct Aggregator {
    fetcher: FeedFetcher,
    /// 0 means all feeds of a load at once.
    max_concurrent: usize,
    generation: watch::Sender<u64>,
    progress: Option<mpsc::Sender<LoadProgress>>,
}

impl Aggregator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            fetcher: FeedFetcher::new(transport),
            max_concurrent: 0,
            generation,
            progress: None,
        }
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<LoadProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    /// Token of the most recently started load.
    pub fn current_generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Supersedes whatever load is in flight without starting a new one.
    pub fn cancel(&self) {
        let generation = self.next_generation();
        tracing::debug!(generation, "Cancelled in-flight load");
    }

    /// Loads a feed or every feed below a category.
    pub async fn load(&self, node: &SubscriptionNode) -> Result<AggregationResult, AggregateError> {
        if node.is_feed() {
            self.load_feed(node).await
        } else {
            self.load_category(node).await
        }
    }

    pub async fn load_feed(
        &self,
        feed: &SubscriptionNode,
    ) -> Result<AggregationResult, AggregateError> {
        if !feed.is_feed() {
            return Err(AggregateError::NotAFeed(feed.title.clone()));
        }
        self.run(&feed.title, vec![feed]).await
    }

    /// Loads every feed at any depth below `category`.
    pub async fn load_category(
        &self,
        category: &SubscriptionNode,
    ) -> Result<AggregationResult, AggregateError> {
        if !category.is_category() {
            return Err(AggregateError::NotACategory(category.title.clone()));
        }
        self.run(&category.title, category.flatten_feeds()).await
    }

    fn next_generation(&self) -> u64 {
        let mut generation = 0;
        self.generation.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        generation
    }

    async fn run(
        &self,
        target: &str,
        feeds: Vec<&SubscriptionNode>,
    ) -> Result<AggregationResult, AggregateError> {
        let generation = self.next_generation();
        let mut rx = self.generation.subscribe();
        let total = feeds.len();

        tracing::info!(generation, target = %target, feeds = total, "Starting load");

        let limit = if self.max_concurrent == 0 {
            total.max(1)
        } else {
            self.max_concurrent
        };
        let completed = AtomicUsize::new(0);
        let completed = &completed;
        let fetcher = &self.fetcher;
        let progress = self.progress.as_ref();

        let fetch_all = stream::iter(feeds.iter().copied().enumerate())
            .map(|(index, feed)| async move {
                let result = fetcher.fetch(feed).await;

                let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                if let Some(tx) = progress {
                    let update = LoadProgress {
                        generation,
                        completed: done,
                        total,
                        feed_title: feed.title.clone(),
                        failed: result.is_err(),
                    };
                    if let Err(e) = tx.try_send(update) {
                        tracing::debug!(error = %e, done, total, "Progress update dropped");
                    }
                }

                (index, result)
            })
            .buffer_unordered(limit)
            .collect::<Vec<_>>();

        let mut slots = tokio::select! {
            slots = fetch_all => slots,
            _ = wait_superseded(&mut rx, generation) => {
                tracing::info!(generation, target = %target, "Load superseded, dropping in-flight fetches");
                return Err(AggregateError::Superseded { generation });
            }
        };

        if *rx.borrow() != generation {
            tracing::info!(generation, target = %target, "Discarding stale load result");
            return Err(AggregateError::Superseded { generation });
        }

        slots.sort_by_key(|(index, _)| *index);

        let mut articles = Vec::new();
        let mut failures = Vec::new();
        for (_, result) in slots {
            match result {
                Ok(mut feed_articles) => articles.append(&mut feed_articles),
                Err(e) => {
                    tracing::warn!(
                        generation,
                        feed = %e.feed_title,
                        kind = %e.kind,
                        error = %e.message,
                        "Feed failed to load"
                    );
                    failures.push(FeedFailure::from(e));
                }
            }
        }
        sort_newest_first(&mut articles);

        let result = AggregationResult {
            generation,
            target: target.to_string(),
            feeds_attempted: total,
            feeds_failed: failures.len(),
            articles,
            failures,
        };
        tracing::info!(
            generation,
            articles = result.articles.len(),
            failures = result.feeds_failed,
            "Load complete"
        );
        Ok(result)
    }
}

/// Resolves once the current generation moves past `generation`.
async fn wait_superseded(rx: &mut watch::Receiver<u64>, generation: u64) {
    let changed = rx.wait_for(|g| *g != generation).await.is_ok();
    if !changed {
        // Sender lives as long as the aggregator; nothing can supersede us.
        std::future::pending::<()>().await;
    }
}

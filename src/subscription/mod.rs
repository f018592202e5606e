//! Subscription tree: the OPML document model and its import.
//!
//! - [`node`] - [`SubscriptionNode`], the category/feed tree and its traversal
//! - [`parser`] - OPML text to forest, with [`FormatError`] on bad input
//!
//! [`Subscriptions`] owns the forest for a session. Imports replace it
//! atomically: the previous forest survives any failed import.
//!
//! ```
//! use canopy::subscription::Subscriptions;
//!
//! let mut subs = Subscriptions::new();
//! let summary = subs
//!     .import(r#"<opml><body>
//!         <outline text="Tech">
//!           <outline text="Rust" xmlUrl="https://blog.rust-lang.org/feed.xml"/>
//!         </outline>
//!     </body></opml>"#)
//!     .unwrap();
//! assert_eq!(summary.feeds, 1);
//! assert!(subs.find(&["Tech", "Rust"]).unwrap().is_feed());
//! ```

mod node;
mod parser;

use std::fmt;

pub use node::{flatten_forest, find_path, NodeKind, SubscriptionNode, UNCATEGORIZED};
pub use parser::{parse_document, FormatError, MAX_OPML_DEPTH, UNKNOWN_TITLE};

/// The subscription forest held for the current session.
#[derive(Debug, Default)]
pub struct Subscriptions {
    forest: Vec<SubscriptionNode>,
}

/// Counts reported after a successful import.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub categories: usize,
    pub feeds: usize,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loaded {} feeds in {} categories",
            self.feeds, self.categories
        )
    }
}

impl ImportSummary {
    fn of(forest: &[SubscriptionNode]) -> Self {
        fn count_categories(node: &SubscriptionNode) -> usize {
            if node.is_feed() {
                return 0;
            }
            1 + node.children().iter().map(count_categories).sum::<usize>()
        }

        Self {
            categories: forest.iter().map(count_categories).sum(),
            feeds: forest.iter().map(SubscriptionNode::feed_count).sum(),
        }
    }
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a session directly from document text.
    pub fn from_document(document: &str) -> Result<Self, FormatError> {
        Ok(Self {
            forest: parse_document(document)?,
        })
    }

    /// Replaces the forest with the one parsed from `document`.
    ///
    /// The document is parsed completely before anything is swapped, so on
    /// error the current forest is left exactly as it was.
    pub fn import(&mut self, document: &str) -> Result<ImportSummary, FormatError> {
        let forest = match parse_document(document) {
            Ok(forest) => forest,
            Err(e) => {
                tracing::warn!(error = %e, "Subscription import failed, keeping previous tree");
                return Err(e);
            }
        };

        let summary = ImportSummary::of(&forest);
        self.forest = forest;
        tracing::info!(
            feeds = summary.feeds,
            categories = summary.categories,
            "Imported subscription document"
        );
        Ok(summary)
    }

    /// Top-level nodes in document order.
    pub fn forest(&self) -> &[SubscriptionNode] {
        &self.forest
    }

    pub fn is_empty(&self) -> bool {
        self.forest.is_empty()
    }

    /// Every feed in document order.
    pub fn feeds(&self) -> Vec<&SubscriptionNode> {
        flatten_forest(&self.forest)
    }

    /// Looks a node up by its path of titles from the root.
    pub fn find<S: AsRef<str>>(&self, path: &[S]) -> Option<&SubscriptionNode> {
        find_path(&self.forest, path)
    }
}

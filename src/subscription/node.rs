use serde::Serialize;

/// Title of the implicit category that collects top-level feeds.
pub const UNCATEGORIZED: &str = "Uncategorized";

/// One entry of the subscription tree.
///
/// A node is exclusively owned by its parent category (or by the forest for
/// top-level nodes). There are no back-pointers; the enclosing category of a
/// feed is recorded by title in its `category_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionNode {
    pub title: String,
    pub kind: NodeKind,
}

/// Category or feed. Feeds never have children and categories never have a
/// source URL; the enum makes both invariants structural.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    Category {
        children: Vec<SubscriptionNode>,
    },
    Feed {
        source_url: String,
        category_path: String,
    },
}

impl SubscriptionNode {
    pub fn category(title: impl Into<String>, children: Vec<SubscriptionNode>) -> Self {
        Self {
            title: title.into(),
            kind: NodeKind::Category { children },
        }
    }

    pub fn feed(
        title: impl Into<String>,
        source_url: impl Into<String>,
        category_path: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            kind: NodeKind::Feed {
                source_url: source_url.into(),
                category_path: category_path.into(),
            },
        }
    }

    pub fn is_feed(&self) -> bool {
        matches!(self.kind, NodeKind::Feed { .. })
    }

    pub fn is_category(&self) -> bool {
        matches!(self.kind, NodeKind::Category { .. })
    }

    /// Children in document order; always empty for feeds.
    pub fn children(&self) -> &[SubscriptionNode] {
        match &self.kind {
            NodeKind::Category { children } => children,
            NodeKind::Feed { .. } => &[],
        }
    }

    pub fn source_url(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Feed { source_url, .. } => Some(source_url),
            NodeKind::Category { .. } => None,
        }
    }

    pub fn category_path(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Feed { category_path, .. } => Some(category_path),
            NodeKind::Category { .. } => None,
        }
    }

    /// Collects every feed below this node in document order.
    ///
    /// Pre-order walk: categories are descended into and contribute nothing
    /// themselves. A feed flattens to itself.
    pub fn flatten_feeds(&self) -> Vec<&SubscriptionNode> {
        let mut feeds = Vec::new();
        self.collect_feeds(&mut feeds);
        feeds
    }

    fn collect_feeds<'a>(&'a self, out: &mut Vec<&'a SubscriptionNode>) {
        match &self.kind {
            NodeKind::Feed { .. } => out.push(self),
            NodeKind::Category { children } => {
                for child in children {
                    child.collect_feeds(out);
                }
            }
        }
    }

    /// Number of feeds at any depth below this node.
    pub fn feed_count(&self) -> usize {
        match &self.kind {
            NodeKind::Feed { .. } => 1,
            NodeKind::Category { children } => children.iter().map(Self::feed_count).sum(),
        }
    }

    /// First direct child with the given title.
    pub fn find_child(&self, title: &str) -> Option<&SubscriptionNode> {
        self.children().iter().find(|c| c.title == title)
    }
}

/// Every feed in the forest, in document order.
pub fn flatten_forest(forest: &[SubscriptionNode]) -> Vec<&SubscriptionNode> {
    forest.iter().flat_map(|node| node.flatten_feeds()).collect()
}

/// Resolves a path of titles from the forest root, e.g. `["Tech", "Rust Blog"]`.
///
/// Each segment matches the first node with that title at its level.
/// An empty path resolves to nothing.
pub fn find_path<'a, S: AsRef<str>>(
    forest: &'a [SubscriptionNode],
    path: &[S],
) -> Option<&'a SubscriptionNode> {
    let (first, rest) = path.split_first()?;
    let mut node = forest.iter().find(|n| n.title == first.as_ref())?;
    for segment in rest {
        node = node.find_child(segment.as_ref())?;
    }
    Some(node)
}

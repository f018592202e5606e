use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use super::node::{NodeKind, SubscriptionNode, UNCATEGORIZED};
use crate::util::strip_control_chars;

/// Maximum allowed nesting depth for OPML outline elements.
/// The finished tree is walked recursively, so depth is bounded at parse time.
pub const MAX_OPML_DEPTH: usize = 50;

/// Display name for outlines that carry neither `text` nor `title`.
pub const UNKNOWN_TITLE: &str = "Unknown";

/// Errors that make a subscription document unusable.
///
/// Any of these aborts the whole import; no partial tree is produced.
#[derive(Debug, Error)]
pub enum FormatError {
    /// OPML nesting depth exceeds safety limit.
    #[error("OPML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    /// The document is not well-formed XML.
    #[error("XML parse error: {0}")]
    Xml(String),

    /// Well-formed XML, but there is no `<body>` to read outlines from.
    #[error("Invalid OPML format: no body element found")]
    MissingBody,
}

/// Parses OPML text into a forest of subscription nodes.
///
/// Outlines are read from the first `<body>` element. An outline with a
/// non-empty `xmlUrl` becomes a feed; any other outline becomes a category
/// whose nested outlines are its children. Outlines nested inside a feed, or
/// inside elements other than `<body>`/`<outline>`, are ignored.
///
/// Top-level feeds are gathered under a single "Uncategorized" category,
/// created where the first such feed appears.
///
/// # Security
///
/// `quick-xml` (0.37) never expands `<!ENTITY>` declarations. Only
/// the five predefined entities are resolved; anything else in an attribute
/// is reported as [`FormatError::Xml`].
pub fn parse_document(content: &str) -> Result<Vec<SubscriptionNode>, FormatError> {
    let content = content.strip_prefix('\u{FEFF}').unwrap_or(content);
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut builder = TreeBuilder::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => builder.open(&e, &reader)?,
            Ok(Event::Empty(e)) => builder.leaf(&e, &reader)?,
            Ok(Event::End(e)) => builder.close(e.name().as_ref() == b"outline")?,
            Ok(Event::Text(e)) => builder.text(&e)?,
            Ok(Event::CData(e)) => builder.text(&e)?,
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FormatError::Xml(format!(
                    "{} (near byte {})",
                    e,
                    reader.buffer_position()
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    builder.finish()
}

/// One open element while walking the document.
enum Frame {
    /// Outside `<body>`: `<opml>`, `<head>` and their descendants.
    Structural,
    /// The `<body>` whose outlines become the forest.
    Body,
    /// A category outline whose children are still being read.
    Category {
        title: String,
        children: Vec<SubscriptionNode>,
    },
    /// Content that is ignored: children of feeds, foreign elements.
    Skipped,
}

#[derive(Default)]
struct TreeBuilder {
    roots: Vec<SubscriptionNode>,
    frames: Vec<Frame>,
    outline_depth: usize,
    body_seen: bool,
    /// The document element has been closed; nothing but misc may follow.
    root_closed: bool,
}

impl TreeBuilder {
    fn accepts_outlines(&self) -> bool {
        matches!(
            self.frames.last(),
            Some(Frame::Body) | Some(Frame::Category { .. })
        )
    }

    fn check_single_root(&self) -> Result<(), FormatError> {
        if self.root_closed {
            return Err(FormatError::Xml(
                "more than one top-level element".into(),
            ));
        }
        Ok(())
    }

    /// Character data is only allowed inside the document element.
    fn text(&self, content: &[u8]) -> Result<(), FormatError> {
        if self.frames.is_empty() && content.iter().any(|b| !b.is_ascii_whitespace()) {
            return Err(FormatError::Xml(
                "text outside the top-level element".into(),
            ));
        }
        Ok(())
    }

    fn open(&mut self, e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<(), FormatError> {
        self.check_single_root()?;
        let is_outline = e.name().as_ref() == b"outline";
        if is_outline {
            self.outline_depth += 1;
            if self.outline_depth > MAX_OPML_DEPTH {
                return Err(FormatError::MaxDepthExceeded(MAX_OPML_DEPTH));
            }
        }

        let frame = if is_outline && self.accepts_outlines() {
            let outline = read_outline(e, reader)?;
            match outline.xml_url {
                Some(url) => {
                    let feed = self.make_feed(outline.title, url);
                    self.attach(feed);
                    Frame::Skipped
                }
                None => Frame::Category {
                    title: outline.title,
                    children: Vec::new(),
                },
            }
        } else if self.is_body(e) {
            self.body_seen = true;
            Frame::Body
        } else if matches!(self.frames.last(), None | Some(Frame::Structural)) {
            Frame::Structural
        } else {
            Frame::Skipped
        };

        self.frames.push(frame);
        Ok(())
    }

    fn leaf(&mut self, e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<(), FormatError> {
        self.check_single_root()?;
        if self.frames.is_empty() {
            self.root_closed = true;
        }
        if e.name().as_ref() == b"outline" && self.accepts_outlines() {
            let outline = read_outline(e, reader)?;
            let node = match outline.xml_url {
                Some(url) => self.make_feed(outline.title, url),
                None => SubscriptionNode::category(outline.title, Vec::new()),
            };
            self.attach(node);
        } else if self.is_body(e) {
            self.body_seen = true;
        }
        Ok(())
    }

    fn close(&mut self, is_outline: bool) -> Result<(), FormatError> {
        let frame = self
            .frames
            .pop()
            .ok_or_else(|| FormatError::Xml("closing tag without matching opening tag".into()))?;
        if is_outline {
            self.outline_depth = self.outline_depth.saturating_sub(1);
        }
        if self.frames.is_empty() {
            self.root_closed = true;
        }
        if let Frame::Category { title, children } = frame {
            self.attach(SubscriptionNode::category(title, children));
        }
        Ok(())
    }

    fn finish(self) -> Result<Vec<SubscriptionNode>, FormatError> {
        if !self.frames.is_empty() {
            return Err(FormatError::Xml(format!(
                "unexpected end of document with {} unclosed element(s)",
                self.frames.len()
            )));
        }
        if !self.body_seen {
            return Err(FormatError::MissingBody);
        }
        Ok(self.roots)
    }

    fn is_body(&self, e: &BytesStart<'_>) -> bool {
        e.name().as_ref() == b"body"
            && !self.body_seen
            && matches!(self.frames.last(), None | Some(Frame::Structural))
    }

    fn make_feed(&self, title: String, url: String) -> SubscriptionNode {
        let category = match self.frames.last() {
            Some(Frame::Category { title: parent, .. }) => parent.as_str(),
            _ => UNCATEGORIZED,
        };
        SubscriptionNode::feed(title, url, category)
    }

    /// Adds a finished node to whatever is currently open above it.
    fn attach(&mut self, node: SubscriptionNode) {
        match self.frames.last_mut() {
            Some(Frame::Category { children, .. }) => {
                children.push(node);
                return;
            }
            Some(Frame::Body) => {}
            _ => return,
        }
        if node.is_feed() {
            self.push_uncategorized(node);
        } else {
            self.roots.push(node);
        }
    }

    fn push_uncategorized(&mut self, feed: SubscriptionNode) {
        let index = self
            .roots
            .iter()
            .position(|n| n.is_category() && n.title == UNCATEGORIZED)
            .unwrap_or_else(|| {
                self.roots
                    .push(SubscriptionNode::category(UNCATEGORIZED, Vec::new()));
                self.roots.len() - 1
            });
        if let NodeKind::Category { children } = &mut self.roots[index].kind {
            children.push(feed);
        }
    }
}

struct Outline {
    title: String,
    xml_url: Option<String>,
}

/// Reads the display name and feed URL of an outline element.
///
/// Name resolution: `text`, then `title`, then [`UNKNOWN_TITLE`]. Blank
/// attribute values count as absent.
fn read_outline(e: &BytesStart<'_>, reader: &Reader<&[u8]>) -> Result<Outline, FormatError> {
    let mut text = None;
    let mut title = None;
    let mut xml_url = None;

    for attr_result in e.attributes() {
        let attr = attr_result.map_err(|err| FormatError::Xml(err.to_string()))?;
        let slot = match attr.key.as_ref() {
            b"text" => &mut text,
            b"title" => &mut title,
            b"xmlUrl" => &mut xml_url,
            _ => continue,
        };
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| FormatError::Xml(err.to_string()))?;
        let cleaned = strip_control_chars(&value).trim().to_string();
        if !cleaned.is_empty() {
            *slot = Some(cleaned);
        }
    }

    Ok(Outline {
        title: text
            .or(title)
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        xml_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wrap(body: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<opml version="2.0">
  <head><title>Subscriptions</title></head>
  <body>{body}</body>
</opml>"#
        )
    }

    fn shape(nodes: &[SubscriptionNode]) -> Vec<String> {
        fn walk(node: &SubscriptionNode, depth: usize, out: &mut Vec<String>) {
            let marker = if node.is_feed() { "feed" } else { "cat" };
            out.push(format!("{}{}:{}", "  ".repeat(depth), marker, node.title));
            for child in node.children() {
                walk(child, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        for node in nodes {
            walk(node, 0, &mut out);
        }
        out
    }

    #[test]
    fn test_nested_categories_keep_depth_and_order() {
        let doc = wrap(
            r#"
    <outline text="Tech">
      <outline text="Rust">
        <outline text="This Week" xmlUrl="https://this-week-in-rust.org/rss.xml"/>
        <outline text="Deep">
          <outline text="Deeper" xmlUrl="https://deep.example/feed"/>
        </outline>
      </outline>
      <outline text="Hacker News" xmlUrl="https://news.ycombinator.com/rss"/>
    </outline>
    <outline text="News"/>"#,
        );

        let forest = parse_document(&doc).unwrap();
        assert_eq!(
            shape(&forest),
            vec![
                "cat:Tech",
                "  cat:Rust",
                "    feed:This Week",
                "    cat:Deep",
                "      feed:Deeper",
                "  feed:Hacker News",
                "cat:News",
            ]
        );
    }

    #[test]
    fn test_top_level_feeds_share_one_uncategorized() {
        let doc = wrap(
            r#"
    <outline text="First" xmlUrl="https://one.example/feed"/>
    <outline text="Blogs">
      <outline text="Blog" xmlUrl="https://blog.example/feed"/>
    </outline>
    <outline text="Second" xmlUrl="https://two.example/feed"></outline>"#,
        );

        let forest = parse_document(&doc).unwrap();
        assert_eq!(
            shape(&forest),
            vec![
                "cat:Uncategorized",
                "  feed:First",
                "  feed:Second",
                "cat:Blogs",
                "  feed:Blog",
            ]
        );
        let uncategorized = forest.iter().filter(|n| n.title == UNCATEGORIZED).count();
        assert_eq!(uncategorized, 1);
    }

    #[test]
    fn test_category_path_is_immediate_parent() {
        let doc = wrap(
            r#"
    <outline text="Outer">
      <outline text="Inner">
        <outline text="Feed" xmlUrl="https://feed.example/rss"/>
      </outline>
    </outline>
    <outline text="Loose" xmlUrl="https://loose.example/rss"/>"#,
        );

        let forest = parse_document(&doc).unwrap();
        let feeds: Vec<_> = forest.iter().flat_map(|n| n.flatten_feeds()).collect();
        assert_eq!(feeds[0].category_path(), Some("Inner"));
        assert_eq!(feeds[1].category_path(), Some(UNCATEGORIZED));
        assert_eq!(feeds[0].source_url(), Some("https://feed.example/rss"));
    }

    #[test]
    fn test_display_name_resolution() {
        let doc = wrap(
            r#"
    <outline text="Text wins" title="Title loses" xmlUrl="https://a.example/feed"/>
    <outline title="Title only" xmlUrl="https://b.example/feed"/>
    <outline xmlUrl="https://c.example/feed"/>
    <outline text="   " title="Blank text" xmlUrl="https://d.example/feed"/>"#,
        );

        let forest = parse_document(&doc).unwrap();
        let titles: Vec<_> = forest[0].children().iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["Text wins", "Title only", UNKNOWN_TITLE, "Blank text"]);
    }

    #[test]
    fn test_blank_xml_url_is_category() {
        let doc = wrap(r#"<outline text="Folder" xmlUrl="  "><outline text="F" xmlUrl="https://f.example/"/></outline>"#);
        let forest = parse_document(&doc).unwrap();
        assert!(forest[0].is_category());
        assert_eq!(forest[0].title, "Folder");
        assert_eq!(forest[0].children().len(), 1);
    }

    #[test]
    fn test_children_of_feed_outline_are_ignored() {
        let doc = wrap(
            r#"
    <outline text="Cat">
      <outline text="Feed" xmlUrl="https://feed.example/">
        <outline text="Hidden" xmlUrl="https://hidden.example/"/>
      </outline>
    </outline>"#,
        );
        let forest = parse_document(&doc).unwrap();
        assert_eq!(shape(&forest), vec!["cat:Cat", "  feed:Feed"]);
    }

    #[test]
    fn test_outlines_outside_body_are_ignored() {
        let doc = r#"<opml version="2.0">
  <head><outline text="Stray" xmlUrl="https://stray.example/"/></head>
  <body><outline text="Kept" xmlUrl="https://kept.example/"/></body>
</opml>"#;
        let forest = parse_document(doc).unwrap();
        assert_eq!(shape(&forest), vec!["cat:Uncategorized", "  feed:Kept"]);
    }

    #[test]
    fn test_entities_in_attributes_are_unescaped() {
        let doc = wrap(r#"<outline text="Tom &amp; Jerry" xmlUrl="https://example.com/feed?a=1&amp;b=2"/>"#);
        let forest = parse_document(&doc).unwrap();
        let feed = &forest[0].children()[0];
        assert_eq!(feed.title, "Tom & Jerry");
        assert_eq!(feed.source_url(), Some("https://example.com/feed?a=1&b=2"));
    }

    #[test]
    fn test_empty_body() {
        assert!(parse_document(&wrap("")).unwrap().is_empty());
        assert!(parse_document(r#"<opml><body/></opml>"#).unwrap().is_empty());
    }

    #[test]
    fn test_missing_body_rejected() {
        let doc = r#"<?xml version="1.0"?><opml version="2.0"><head/></opml>"#;
        assert!(matches!(parse_document(doc), Err(FormatError::MissingBody)));
        assert!(matches!(parse_document(""), Err(FormatError::MissingBody)));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        assert!(parse_document("<not valid xml").is_err());
        assert!(matches!(
            parse_document("<opml><body><outline text=\"a\"></body></opml>"),
            Err(FormatError::Xml(_))
        ));
        assert!(matches!(
            parse_document("<opml><body><outline text=\"a\">"),
            Err(FormatError::Xml(_))
        ));
    }

    #[test]
    fn test_content_outside_root_rejected() {
        for doc in [
            r#"<opml><body><outline text="A" xmlUrl="https://a/"/></body></opml><second/>"#,
            r#"<opml><body/></opml><opml><body/></opml>"#,
            "<opml><body/></opml>trailing garbage",
            "garbage<opml><body/></opml>",
            "<opml><body/></opml><![CDATA[x]]>",
        ] {
            assert!(
                matches!(parse_document(doc), Err(FormatError::Xml(_))),
                "{doc} should be rejected"
            );
        }
    }

    #[test]
    fn test_prolog_and_trailing_misc_allowed() {
        let doc = "<?xml version=\"1.0\"?>\n<!-- exported -->\n<opml><body/></opml>\n<!-- end -->\n";
        assert_eq!(parse_document(doc).unwrap(), Vec::<SubscriptionNode>::new());
    }

    #[test]
    fn test_deeply_nested_opml_rejected() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..100 {
            opml.push_str(r#"<outline text="level">"#);
        }
        for _ in 0..100 {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let err = parse_document(&opml).unwrap_err();
        assert!(matches!(err, FormatError::MaxDepthExceeded(MAX_OPML_DEPTH)));
        assert!(err.to_string().contains("50"));
    }

    #[test]
    fn test_nesting_at_depth_limit_allowed() {
        let mut opml = String::from(r#"<?xml version="1.0"?><opml version="2.0"><body>"#);
        for _ in 0..MAX_OPML_DEPTH {
            opml.push_str(r#"<outline text="level">"#);
        }
        opml.push_str(r#"<outline text="Deep Feed" xmlUrl="https://deep.example.com/feed"/>"#);
        for _ in 0..MAX_OPML_DEPTH {
            opml.push_str("</outline>");
        }
        opml.push_str("</body></opml>");

        let forest = parse_document(&opml).unwrap();
        let feeds = forest[0].flatten_feeds();
        assert_eq!(feeds.len(), 1);
        assert_eq!(feeds[0].title, "Deep Feed");
        assert_eq!(feeds[0].category_path(), Some("level"));
    }

    #[test]
    fn test_xxe_entity_not_expanded() {
        // Either rejected or left unexpanded, never file contents.
        let malicious = r#"<?xml version="1.0"?>
<!DOCTYPE opml [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<opml version="2.0">
    <body>
        <outline text="&xxe;" xmlUrl="https://example.com/feed.xml"/>
    </body>
</opml>"#;

        if let Ok(forest) = parse_document(malicious) {
            for feed in forest.iter().flat_map(|n| n.flatten_feeds()) {
                assert!(!feed.title.contains("root:"));
            }
        }
    }

    #[test]
    fn test_control_chars_stripped_from_titles() {
        let doc = wrap("<outline text=\"\x1b[31mRed\x1b[0m\" xmlUrl=\"https://red.example/\"/>");
        let forest = parse_document(&doc).unwrap();
        assert_eq!(forest[0].children()[0].title, "Red");
    }
}

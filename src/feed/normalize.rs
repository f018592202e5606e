use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

use crate::util::{sanitize_title, NO_TITLE};

/// Display format for publish timestamps (UTC, minute precision).
pub const PUBLISHED_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Fallback formats tried after RFC 3339 and RFC 2822, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// A syndication entry as delivered by the feed parser, before cleanup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    pub title: Option<String>,
    pub links: Vec<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    /// Publish time as resolved by the feed parser through [`parse_timestamp`].
    pub published: Option<DateTime<Utc>>,
    pub authors: Vec<String>,
}

/// Uniform article shape shared by every feed format.
///
/// Built once per fetch and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    /// Sanitized, never empty.
    pub title: String,
    /// First link of the entry, or empty. Handed to viewers unmodified.
    pub link: String,
    pub summary: String,
    /// Full body when present, otherwise the summary.
    pub content: String,
    /// Display timestamp in `PUBLISHED_FORMAT`, empty when undated.
    pub published: String,
    /// RFC 3339 rendering of the instant, empty when undated.
    pub published_raw: String,
    /// Effective instant used for ordering; `None` when absent or unparseable.
    pub published_at: Option<DateTime<Utc>>,
    pub author: String,
    /// Title of the subscription this article came from.
    pub feed_title: String,
}

impl Article {
    /// Instant used for newest-first ordering. Undated articles sort as the
    /// oldest possible instant.
    pub fn sort_key(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

/// Converts one raw entry into an [`Article`] attributed to `feed_title`.
///
/// Returns `None` for an entry with no title, link, summary or content: it
/// has nothing to display and is dropped without failing the feed.
pub fn normalize(entry: RawEntry, feed_title: &str) -> Option<Article> {
    let RawEntry {
        title,
        links,
        summary,
        content,
        published,
        authors,
    } = entry;

    let link = first_non_blank(links);
    let summary = summary.filter(|s| !s.trim().is_empty());
    let content = content.filter(|c| !c.trim().is_empty());

    if title.is_none() && link.is_none() && summary.is_none() && content.is_none() {
        return None;
    }

    let (published, published_raw, published_at) = resolve_published(published);
    let content = content.or_else(|| summary.clone()).unwrap_or_default();

    Some(Article {
        title: sanitize_title(title.as_deref().unwrap_or(NO_TITLE)),
        link: link.unwrap_or_default(),
        summary: summary.unwrap_or_default(),
        content,
        published,
        published_raw,
        published_at,
        author: first_non_blank(authors).unwrap_or_default(),
        feed_title: feed_title.to_string(),
    })
}

/// Adapts the `feed-rs` model. Publish time falls back to the updated time.
pub fn entries_from_feed(feed: feed_rs::model::Feed) -> Vec<RawEntry> {
    feed.entries
        .into_iter()
        .map(|entry| RawEntry {
            title: entry.title.map(|t| t.content),
            links: entry.links.into_iter().map(|l| l.href).collect(),
            summary: entry.summary.map(|s| s.content),
            content: entry.content.and_then(|c| c.body),
            published: entry.published.or(entry.updated),
            authors: entry.authors.into_iter().map(|p| p.name).collect(),
        })
        .collect()
}

/// Parses a textual timestamp: RFC 3339, RFC 2822, then a few naive
/// formats taken as UTC.
///
/// Installed as the `feed-rs` timestamp parser, so it sees every date string
/// of a fetched feed.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn resolve_published(at: Option<DateTime<Utc>>) -> (String, String, Option<DateTime<Utc>>) {
    match at {
        Some(at) => (at.format(PUBLISHED_FORMAT).to_string(), at.to_rfc3339(), Some(at)),
        None => (String::new(), String::new(), None),
    }
}

fn first_non_blank(values: Vec<String>) -> Option<String> {
    values
        .into_iter()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_full_entry() {
        let entry = RawEntry {
            title: Some("  Release\u{A0}notes\n".into()),
            links: vec!["".into(), "https://example.com/post".into(), "https://example.com/alt".into()],
            summary: Some("Short".into()),
            content: Some("<p>Long</p>".into()),
            published: Some(at("2024-03-01T09:30:15Z")),
            authors: vec!["Ferris".into(), "Other".into()],
        };

        let article = normalize(entry, "Rust Blog").unwrap();
        assert_eq!(article.title, "Release notes");
        assert_eq!(article.link, "https://example.com/post");
        assert_eq!(article.summary, "Short");
        assert_eq!(article.content, "<p>Long</p>");
        assert_eq!(article.published, "2024-03-01 09:30");
        assert_eq!(article.published_raw, "2024-03-01T09:30:15+00:00");
        assert_eq!(article.published_at, Some(at("2024-03-01T09:30:15Z")));
        assert_eq!(article.author, "Ferris");
        assert_eq!(article.feed_title, "Rust Blog");
    }

    #[test]
    fn test_missing_fields_fall_back() {
        let entry = RawEntry {
            summary: Some("Only a summary".into()),
            ..Default::default()
        };

        let article = normalize(entry, "Feed").unwrap();
        assert_eq!(article.title, NO_TITLE);
        assert_eq!(article.link, "");
        assert_eq!(article.content, "Only a summary");
        assert_eq!(article.author, "");
        assert_eq!(article.published, "");
        assert_eq!(article.published_at, None);
    }

    #[test]
    fn test_control_only_title_becomes_placeholder() {
        let entry = RawEntry {
            title: Some("\u{1}\u{2}\u{3}".into()),
            links: vec!["https://example.com/x".into()],
            ..Default::default()
        };
        assert_eq!(normalize(entry, "Feed").unwrap().title, NO_TITLE);
    }

    #[test]
    fn test_empty_entry_skipped() {
        let entry = RawEntry {
            summary: Some("   ".into()),
            authors: vec!["Someone".into()],
            ..Default::default()
        };
        assert!(normalize(entry, "Feed").is_none());
    }

    #[test]
    fn test_undated_entry() {
        let entry = RawEntry {
            title: Some("Undated".into()),
            ..Default::default()
        };
        let article = normalize(entry, "Feed").unwrap();
        assert_eq!(article.published, "");
        assert_eq!(article.published_raw, "");
        assert_eq!(article.sort_key(), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = at("2024-01-02T03:04:00Z");
        assert_eq!(parse_timestamp("2024-01-02T03:04:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02T05:04:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("Tue, 02 Jan 2024 03:04:00 +0000"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-02 03:04"), Some(expected));
        assert_eq!(parse_timestamp(" 2024-01-02 03:04:00 "), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
        assert_eq!(parse_timestamp(""), None);
    }

    #[test]
    fn test_entries_from_rss() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:content="http://purl.org/rss/1.0/modules/content/">
<channel><title>Example</title>
  <item>
    <title>First post</title>
    <link>https://example.com/1</link>
    <description>Summary one</description>
    <content:encoded><![CDATA[<p>Body one</p>]]></content:encoded>
    <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
  </item>
  <item>
    <title>Second post</title>
    <link>https://example.com/2</link>
  </item>
</channel></rss>"#;

        let feed = feed_rs::parser::parse(rss.as_bytes()).unwrap();
        let entries = entries_from_feed(feed);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("First post"));
        assert_eq!(entries[0].links, vec!["https://example.com/1".to_string()]);
        assert_eq!(entries[0].summary.as_deref(), Some("Summary one"));
        assert_eq!(entries[0].content.as_deref(), Some("<p>Body one</p>"));
        assert_eq!(entries[0].published, Some(at("2024-01-01T10:00:00Z")));
        assert_eq!(entries[1].published, None);
    }

    #[test]
    fn test_entries_from_atom_use_updated_and_author() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <id>urn:example</id>
  <updated>2024-02-02T12:00:00Z</updated>
  <entry>
    <title>Atom entry</title>
    <id>urn:example:1</id>
    <link href="https://example.org/a"/>
    <updated>2024-02-02T12:00:00Z</updated>
    <author><name>Jane</name></author>
    <summary>Atom summary</summary>
  </entry>
</feed>"#;

        let feed = feed_rs::parser::parse(atom.as_bytes()).unwrap();
        let article = entries_from_feed(feed)
            .into_iter()
            .filter_map(|e| normalize(e, "Atom"))
            .next()
            .unwrap();
        assert_eq!(article.title, "Atom entry");
        assert_eq!(article.link, "https://example.org/a");
        assert_eq!(article.author, "Jane");
        assert_eq!(article.content, "Atom summary");
        assert_eq!(article.published, "2024-02-02 12:00");
    }
}

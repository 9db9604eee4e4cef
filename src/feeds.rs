//! RSS 2.0, RSS 1.0 (RDF) and Atom feed parsing.
//!
//! Only the fields the crawler needs are read: the entry link, title and
//! author. Entries keep the order the feed delivered them in, which by
//! convention is newest first.

use crate::errors::FeedError;
use crate::models::FeedEntry;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: RssChannel,
}

#[derive(Debug, Deserialize)]
struct RssChannel {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// RSS 1.0: items are siblings of the channel.
#[derive(Debug, Deserialize)]
struct Rdf {
    #[serde(rename = "item", default)]
    items: Vec<RssItem>,
}

/// Every field is a list: feeds repeat `dc:creator`, `author` and even
/// `link` inside one item.
#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    link: Vec<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(default)]
    author: Vec<String>,
    #[serde(rename = "dc:creator", alias = "creator", default)]
    creator: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct AtomFeed {
    #[serde(rename = "entry", default)]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    #[serde(rename = "link", default)]
    links: Vec<AtomLink>,
    #[serde(default)]
    title: Vec<AtomText>,
    #[serde(rename = "author", default)]
    authors: Vec<AtomAuthor>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AtomText {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct AtomAuthor {
    name: Option<String>,
}

/// An entry before link resolution.
struct RawEntry {
    link: Option<String>,
    title: Option<String>,
    author: Option<String>,
}

impl From<RssItem> for RawEntry {
    fn from(item: RssItem) -> Self {
        Self {
            link: first_non_empty(item.link),
            title: first_non_empty(item.title),
            author: first_non_empty(item.creator).or_else(|| first_non_empty(item.author)),
        }
    }
}

impl From<AtomEntry> for RawEntry {
    fn from(entry: AtomEntry) -> Self {
        let link = entry
            .links
            .iter()
            .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
            .or_else(|| entry.links.first())
            .and_then(|l| l.href.clone());
        Self {
            link,
            title: first_non_empty(entry.title.into_iter().map(|t| t.value)),
            author: first_non_empty(entry.authors.into_iter().filter_map(|a| a.name)),
        }
    }
}

/// Parse a feed body into entries, resolving relative links against
/// `base_url`. Entries without a usable link are skipped.
#[instrument(level = "debug", skip(bytes), fields(bytes = bytes.len()))]
pub fn parse_feed(bytes: &[u8], base_url: &str) -> Result<Vec<FeedEntry>, FeedError> {
    let text = String::from_utf8_lossy(bytes);
    let xml = text.trim_start_matches('\u{feff}');

    let root = root_element(xml)?;
    let local = root.rsplit(':').next().unwrap_or(&root);
    let raw: Vec<RawEntry> = match local {
        "rss" => quick_xml::de::from_str::<Rss>(xml)?
            .channel
            .items
            .into_iter()
            .map(RawEntry::from)
            .collect(),
        "RDF" => quick_xml::de::from_str::<Rdf>(xml)?
            .items
            .into_iter()
            .map(RawEntry::from)
            .collect(),
        "feed" => quick_xml::de::from_str::<AtomFeed>(xml)?
            .entries
            .into_iter()
            .map(RawEntry::from)
            .collect(),
        _ => return Err(FeedError::UnknownFormat(root.clone())),
    };

    let base = Url::parse(base_url).ok();
    let entries: Vec<FeedEntry> = raw
        .into_iter()
        .filter_map(|entry| {
            let link = non_empty(entry.link)?;
            match resolve_url(base.as_ref(), &link) {
                Some(url) => Some((url, entry.title, entry.author)),
                None => {
                    warn!(%link, "Skipping feed entry with malformed link");
                    None
                }
            }
        })
        .enumerate()
        .map(|(i, (url, title, author))| FeedEntry {
            title: non_empty(title),
            author: non_empty(author),
            ..FeedEntry::new(url, i)
        })
        .collect();

    debug!(root = %root, count = entries.len(), "Parsed feed");
    Ok(entries)
}

/// Resolve `link` against `base`, accepting absolute links as-is.
pub fn resolve_url(base: Option<&Url>, link: &str) -> Option<String> {
    match Url::parse(link) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            base.and_then(|b| b.join(link).ok()).map(|u| u.to_string())
        }
        Err(_) => None,
    }
}

fn first_non_empty(values: impl IntoIterator<Item = String>) -> Option<String> {
    values.into_iter().find_map(|v| non_empty(Some(v)))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn root_element(xml: &str) -> Result<String, FeedError> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                return Ok(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Event::Eof => return Err(FeedError::NoRoot),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <title>Example</title>
    <link>https://example.com/</link>
    <item>
      <title>Newest &amp; best</title>
      <link>https://example.com/u1</link>
      <dc:creator><![CDATA[Jane Roe]]></dc:creator>
    </item>
    <item>
      <title>Second</title>
      <link>/u2</link>
      <author>john@example.com (John Doe)</author>
    </item>
    <item>
      <title></title>
      <link>https://example.com/u3</link>
    </item>
    <item>
      <title>No link</title>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Example Atom</title>
  <entry>
    <title type="html">Atom one</title>
    <link rel="enclosure" href="https://cdn.example.com/a.mp3"/>
    <link rel="alternate" href="https://example.com/a1"/>
    <author><name>Ferris</name></author>
  </entry>
  <entry>
    <title>Atom two</title>
    <link href="a2"/>
  </entry>
</feed>"#;

    const RDF: &str = r#"<?xml version="1.0"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel><title>RDF</title></channel>
  <item><title>R1</title><link>https://example.com/r1</link></item>
  <item><title>R2</title><link>https://example.com/r2</link></item>
</rdf:RDF>"#;

    #[test]
    fn test_parse_rss_in_feed_order() {
        let entries = parse_feed(RSS.as_bytes(), "https://example.com/").unwrap();
        let urls: Vec<&str> = entries.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/u1",
                "https://example.com/u2",
                "https://example.com/u3"
            ]
        );
        assert_eq!(entries[0].title.as_deref(), Some("Newest & best"));
        assert_eq!(entries[0].author.as_deref(), Some("Jane Roe"));
        assert_eq!(entries[1].author.as_deref(), Some("john@example.com (John Doe)"));
        assert_eq!(entries[2].title, None);
        assert_eq!(entries[2].author, None);
        assert_eq!(
            entries.iter().map(|e| e.published_order).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn test_parse_atom_prefers_alternate_link() {
        let entries = parse_feed(ATOM.as_bytes(), "https://example.com/blog/").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/a1");
        assert_eq!(entries[0].title.as_deref(), Some("Atom one"));
        assert_eq!(entries[0].author.as_deref(), Some("Ferris"));
        assert_eq!(entries[1].url, "https://example.com/blog/a2");
        assert_eq!(entries[1].author, None);
    }

    #[test]
    fn test_parse_rdf() {
        let entries = parse_feed(RDF.as_bytes(), "https://example.com/").unwrap();
        let titles: Vec<_> = entries.iter().filter_map(|e| e.title.clone()).collect();
        assert_eq!(titles, vec!["R1", "R2"]);
    }

    #[test]
    fn test_rss_item_with_repeated_metadata() {
        let xml = r#"<rss version="2.0" xmlns:dc="http://purl.org/dc/elements/1.1/">
  <channel>
    <item>
      <title>Co-written</title>
      <link>https://example.com/m1</link>
      <dc:creator>Ann Lee</dc:creator>
      <dc:creator>Bob Park</dc:creator>
      <category>politics</category>
      <category>world</category>
    </item>
    <item>
      <title>Two bylines</title>
      <link>https://example.com/m2</link>
      <author>ann@example.com (Ann Lee)</author>
      <author>bob@example.com (Bob Park)</author>
    </item>
  </channel>
</rss>"#;
        let entries = parse_feed(xml.as_bytes(), "https://example.com/").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].url, "https://example.com/m1");
        assert_eq!(entries[0].author.as_deref(), Some("Ann Lee"));
        assert_eq!(entries[1].url, "https://example.com/m2");
        assert_eq!(entries[1].author.as_deref(), Some("ann@example.com (Ann Lee)"));
    }

    #[test]
    fn test_atom_entry_with_several_authors() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
  <entry>
    <title>Joint piece</title>
    <link href="https://example.com/j1"/>
    <author><name>Ferris</name></author>
    <author><name>Corro</name></author>
  </entry>
  <entry>
    <title>Solo</title>
    <link href="https://example.com/j2"/>
    <author><name>Corro</name></author>
  </entry>
</feed>"#;
        let entries = parse_feed(xml.as_bytes(), "https://example.com/").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title.as_deref(), Some("Joint piece"));
        assert_eq!(entries[0].author.as_deref(), Some("Ferris"));
        assert_eq!(entries[1].author.as_deref(), Some("Corro"));
    }

    #[test]
    fn test_unknown_format_and_garbage() {
        assert!(matches!(
            parse_feed(b"<html><body/></html>", "https://example.com/"),
            Err(FeedError::UnknownFormat(name)) if name == "html"
        ));
        assert!(matches!(
            parse_feed(b"", "https://example.com/"),
            Err(FeedError::NoRoot)
        ));
    }

    #[test]
    fn test_empty_channel() {
        let xml = "<rss><channel><title>t</title></channel></rss>";
        assert!(parse_feed(xml.as_bytes(), "https://example.com/").unwrap().is_empty());
    }

    #[test]
    fn test_resolve_url() {
        let base = Url::parse("https://example.com/news/").unwrap();
        assert_eq!(
            resolve_url(Some(&base), "story/1").as_deref(),
            Some("https://example.com/news/story/1")
        );
        assert_eq!(
            resolve_url(Some(&base), "https://other.org/x").as_deref(),
            Some("https://other.org/x")
        );
        assert_eq!(resolve_url(None, "story/1"), None);
        assert_eq!(resolve_url(Some(&base), "http://[::1"), None);
    }
}

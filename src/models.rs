//! Data models for feed entries and extracted articles.
//!
//! - [`FeedEntry`]: one item of a fetched feed, ephemeral per run
//! - [`Article`]: the structured result of extracting one article page
//! - [`ArticleRecord`]: the wire shape shared by the queue and relational sinks

use serde::{Deserialize, Serialize};

/// An entry as delivered by an RSS/Atom feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    /// Absolute article URL.
    pub url: String,
    /// Entry title, if the feed carried a non-empty one.
    pub title: Option<String>,
    /// Entry author, if the feed carried a non-empty one.
    pub author: Option<String>,
    /// Position in the feed, 0 being the newest.
    pub published_order: usize,
}

impl FeedEntry {
    pub fn new(url: impl Into<String>, published_order: usize) -> Self {
        Self {
            url: url.into(),
            title: None,
            author: None,
            published_order,
        }
    }
}

/// Values known before the page is fetched (usually from the feed entry) that
/// take precedence over the selector rules.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub author: Option<String>,
    pub headline: Option<String>,
}

impl From<&FeedEntry> for Overrides {
    fn from(entry: &FeedEntry) -> Self {
        Self {
            author: entry.author.clone(),
            headline: entry.title.clone(),
        }
    }
}

/// An extracted article.
///
/// `raw_content` is `None` when the content rule failed to match; such an
/// article is invalid and never reaches a sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub author: String,
    pub url: String,
    pub headline: String,
    pub raw_content: Option<String>,
    pub clean_content: String,
    pub source_name: String,
}

impl Article {
    /// Whether every mandatory field is present.
    pub fn is_valid(&self) -> bool {
        self.raw_content.is_some() && !self.url.is_empty() && !self.source_name.is_empty()
    }

    /// Short description used in logs.
    pub fn dump(&self) -> String {
        format!("'{}' by {} on {}", self.headline, self.author, self.source_name)
    }
}

/// Serialized article with the field names consumers of the queue expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleRecord {
    pub author: String,
    pub link: String,
    pub headline: String,
    pub content: String,
    pub clean_content: String,
    pub news_vendor: String,
}

impl ArticleRecord {
    /// Build the record for a valid article. Returns `None` for invalid ones.
    pub fn from_article(article: &Article) -> Option<Self> {
        let content = article.raw_content.as_ref()?;
        Some(Self {
            author: article.author.clone(),
            link: article.url.clone(),
            headline: article.headline.clone(),
            content: content.clone(),
            clean_content: article.clean_content.clone(),
            news_vendor: article.source_name.clone(),
        })
    }
}

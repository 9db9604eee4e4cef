//! YAML configuration: vendors, their extraction rules, worker counts and the
//! sink selection.
//!
//! Layout:
//!
//! ```yaml
//! feeds: [techcrunch]
//! vendors:
//!   techcrunch:
//!     feed-url: http://feeds.feedburner.com/TechCrunch/
//!     url: http://techcrunch.com/
//!     scraping:
//!       headline: {type: CSS, path: "h1.headline"}
//!       author: {type: XPath, path: "//a[@rel='author']"}
//!       content: {type: CSS, path: "div.article-entry"}
//!     archive-links:
//!       archive-url: http://techcrunch.com/page/page_num/
//!       max: 3
//!       type: CSS
//!       path: "h2.headline a"
//! sink:
//!   kind: file
//!   dir: ./articles
//! ```

use crate::errors::ConfigError;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// Placeholder replaced by the page number in `archive-url`.
pub const PAGE_NUM_PLACEHOLDER: &str = "page_num";

/// How a [`SelectorRule`] path is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RuleKind {
    #[serde(rename = "CSS", alias = "css")]
    Css,
    #[serde(rename = "XPath", alias = "xpath")]
    XPath,
    /// Any other `type` value; always evaluates to "no match".
    #[serde(other)]
    Unsupported,
}

/// One extraction rule: a CSS selector or XPath expression.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelectorRule {
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub path: String,
}

impl SelectorRule {
    pub fn css(path: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Css,
            path: path.into(),
        }
    }

    pub fn xpath(path: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::XPath,
            path: path.into(),
        }
    }
}

/// Per-field rules of the `scraping` block. A missing rule behaves like a rule
/// that never matches.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractionRules {
    pub headline: Option<SelectorRule>,
    pub author: Option<SelectorRule>,
    pub content: Option<SelectorRule>,
}

/// Pagination-based crawling of a vendor's archive pages.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveListing {
    /// Listing URL containing the `page_num` placeholder.
    pub archive_url: String,
    /// Highest page number to crawl (pages start at 1).
    pub max: u32,
    /// Rule selecting the article links on a listing page.
    #[serde(flatten)]
    pub links: SelectorRule,
}

impl ArchiveListing {
    /// Listing page URLs for pages `1..=max`.
    pub fn page_urls(&self) -> Vec<String> {
        (1..=self.max)
            .map(|n| self.archive_url.replace(PAGE_NUM_PLACEHOLDER, &n.to_string()))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawVendor {
    feed_url: Option<String>,
    url: String,
    #[serde(default)]
    scraping: ExtractionRules,
    archive_links: Option<ArchiveListing>,
}

/// One vendor: its feed, base URL and extraction rules. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Source {
    pub name: String,
    pub feed_url: Option<String>,
    pub base_url: String,
    pub rules: ExtractionRules,
    pub archive: Option<ArchiveListing>,
}

/// Worker counts for the two pool stages.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_feed_workers")]
    pub feeds: usize,
    #[serde(default = "default_article_workers")]
    pub articles: usize,
}

fn default_feed_workers() -> usize {
    5
}

fn default_article_workers() -> usize {
    10
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            feeds: default_feed_workers(),
            articles: default_article_workers(),
        }
    }
}

/// HTTP settings for the fetcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FetchConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

/// Which sink receives completed articles.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum SinkConfig {
    /// JSON records pushed onto a Redis list.
    Queue {
        url: String,
        #[serde(default = "default_queue_name")]
        queue: String,
    },
    /// Rows inserted into a SQLite table.
    #[serde(rename_all = "kebab-case")]
    Relational {
        url: String,
        #[serde(default = "default_article_table")]
        article_table: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
    /// One rendered HTML file per source.
    File { dir: String },
}

fn default_queue_name() -> String {
    "queue/rawarticles".to_string()
}

fn default_article_table() -> String {
    "articles".to_string()
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawConfig {
    #[serde(default)]
    feeds: Vec<String>,
    vendors: BTreeMap<String, RawVendor>,
    #[serde(default)]
    workers: WorkerConfig,
    #[serde(default)]
    fetch: FetchConfig,
    sink: SinkConfig,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Vendors crawled in feed mode, in the order of the `feeds` list.
    pub feeds: Vec<Source>,
    /// Every configured vendor, keyed by name.
    pub vendors: BTreeMap<String, Source>,
    pub workers: WorkerConfig,
    pub fetch: FetchConfig,
    pub sink: SinkConfig,
}

impl Config {
    /// Read and validate a config file.
    #[instrument(level = "info")]
    pub async fn load(path: &str) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_string(),
                source,
            })?;
        let config = Self::from_yaml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_string(),
                source,
            },
            other => other,
        })?;
        debug!(
            feeds = config.feeds.len(),
            vendors = config.vendors.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse and validate YAML text.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;

        let vendors: BTreeMap<String, Source> = raw
            .vendors
            .into_iter()
            .map(|(name, v)| {
                let source = Source {
                    name: name.clone(),
                    feed_url: v.feed_url,
                    base_url: v.url,
                    rules: v.scraping,
                    archive: v.archive_links,
                };
                (name, source)
            })
            .collect();

        let mut feeds = Vec::with_capacity(raw.feeds.len());
        for name in &raw.feeds {
            let source = vendors
                .get(name)
                .ok_or_else(|| ConfigError::Invalid(format!("feed `{name}` has no vendor entry")))?;
            if source.feed_url.is_none() {
                return Err(ConfigError::Invalid(format!(
                    "vendor `{name}` is listed under feeds but has no feed-url"
                )));
            }
            feeds.push(source.clone());
        }

        if raw.workers.feeds == 0 || raw.workers.articles == 0 {
            return Err(ConfigError::Invalid(
                "worker counts must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            feeds,
            vendors,
            workers: raw.workers,
            fetch: raw.fetch,
            sink: raw.sink,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
feeds: [techcrunch]
vendors:
  techcrunch:
    feed-url: http://feeds.example.com/tc
    url: http://techcrunch.com/
    scraping:
      headline: {type: CSS, path: "h1.headline"}
      author: {type: XPath, path: "//a[@rel='author']"}
      content: {type: CSS, path: "div.article-entry"}
  verge:
    url: http://www.theverge.com/
    scraping:
      content: {type: Regex, path: ".*"}
    archive-links:
      archive-url: http://www.theverge.com/archives/page_num
      max: 2
      type: CSS
      path: "h3 a"
workers: {feeds: 2}
sink:
  kind: relational
  url: sqlite://articles.db
"#;

    #[test]
    fn test_parse_sample_config() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.feeds.len(), 1);
        assert_eq!(config.feeds[0].name, "techcrunch");
        assert_eq!(config.vendors.len(), 2);
        assert_eq!(config.workers.feeds, 2);
        assert_eq!(config.workers.articles, 10);
        assert_eq!(config.fetch.timeout_secs, 30);

        let tc = &config.vendors["techcrunch"];
        assert_eq!(tc.rules.headline, Some(SelectorRule::css("h1.headline")));
        assert_eq!(tc.rules.author, Some(SelectorRule::xpath("//a[@rel='author']")));
        assert!(tc.archive.is_none());

        match &config.sink {
            SinkConfig::Relational {
                article_table,
                max_connections,
                ..
            } => {
                assert_eq!(article_table, "articles");
                assert_eq!(*max_connections, 5);
            }
            other => panic!("unexpected sink {other:?}"),
        }
    }

    #[test]
    fn test_unknown_rule_type_is_unsupported() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let verge = &config.vendors["verge"];
        assert_eq!(
            verge.rules.content.as_ref().map(|r| r.kind),
            Some(RuleKind::Unsupported)
        );
        assert!(verge.rules.headline.is_none());
    }

    #[test]
    fn test_archive_page_urls() {
        let config = Config::from_yaml(SAMPLE).unwrap();
        let archive = config.vendors["verge"].archive.as_ref().unwrap();
        assert_eq!(archive.links, SelectorRule::css("h3 a"));
        assert_eq!(
            archive.page_urls(),
            vec![
                "http://www.theverge.com/archives/1".to_string(),
                "http://www.theverge.com/archives/2".to_string(),
            ]
        );
    }

    #[test]
    fn test_feed_without_vendor_is_invalid() {
        let yaml = "feeds: [missing]\nvendors: {}\nsink: {kind: file, dir: out}\n";
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_feed_without_feed_url_is_invalid() {
        let yaml = r#"
feeds: [verge]
vendors:
  verge: {url: "http://www.theverge.com/"}
sink: {kind: file, dir: out}
"#;
        assert!(matches!(
            Config::from_yaml(yaml),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_queue_sink_defaults() {
        let yaml = "vendors: {}\nsink: {kind: queue, url: \"redis://127.0.0.1/\"}\n";
        let config = Config::from_yaml(yaml).unwrap();
        match config.sink {
            SinkConfig::Queue { queue, .. } => assert_eq!(queue, "queue/rawarticles"),
            other => panic!("unexpected sink {other:?}"),
        }
    }
}

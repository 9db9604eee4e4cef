//! Incremental feed harvesting.
//!
//! For every source the driver:
//!
//! 1. fetches and parses the feed on the feed pool,
//! 2. keeps the entries newer than the source's watermark,
//! 3. submits one extraction job per new entry to the article pool,
//! 4. waits for all of them (the per-source barrier), and
//! 5. stages the newest feed entry as the next watermark.
//!
//! Sources proceed independently; a failure in one feed or one article never
//! blocks the others. Staged watermarks only take effect once the caller
//! persists the state after the sink has been closed.

use crate::config::{Source, WorkerConfig};
use crate::errors::ExtractError;
use crate::extract::extract;
use crate::feeds::parse_feed;
use crate::fetcher::Fetcher;
use crate::models::{Article, FeedEntry, Overrides};
use crate::pool::{JobHandle, WorkerPool, join_all};
use crate::sinks::Sink;
use crate::state::CrawlState;
use crate::utils::truncate_for_log;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Outcome of one source in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceReport {
    /// Entries (feed mode) or links (archive mode) selected for extraction.
    pub discovered: usize,
    pub stored: usize,
    pub failed: usize,
    /// Whether a new watermark was staged.
    pub advanced: bool,
    /// The feed or every listing page could not be fetched or parsed.
    pub listing_failed: bool,
}

/// Per-source outcomes of a run, keyed by source name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sources: BTreeMap<String, SourceReport>,
}

impl RunReport {
    pub fn stored(&self) -> usize {
        self.sources.values().map(|s| s.stored).sum()
    }

    pub fn failed(&self) -> usize {
        self.sources.values().map(|s| s.failed).sum()
    }

    /// Log one line per source and a total.
    pub fn log(&self) {
        for (name, s) in &self.sources {
            info!(
                source = %name,
                discovered = s.discovered,
                stored = s.stored,
                failed = s.failed,
                advanced = s.advanced,
                listing_failed = s.listing_failed,
                "Source summary"
            );
        }
        info!(
            sources = self.sources.len(),
            stored = self.stored(),
            failed = self.failed(),
            "Run summary"
        );
    }
}

/// Fetchers, sink and the two worker pools shared by every job of a run.
pub struct Harvester {
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) feed_pool: WorkerPool,
    pub(crate) article_pool: WorkerPool,
}

impl Harvester {
    pub fn new(fetcher: Arc<dyn Fetcher>, sink: Arc<dyn Sink>, workers: WorkerConfig) -> Self {
        Self {
            fetcher,
            sink,
            feed_pool: WorkerPool::new("feeds", workers.feeds),
            article_pool: WorkerPool::new("articles", workers.articles),
        }
    }

    /// Crawl every source's feed and stage new watermarks in `state`.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run_feeds(&self, sources: &[Source], state: &mut CrawlState) -> RunReport {
        let mut outcomes = Vec::with_capacity(sources.len());
        {
            let committed: &CrawlState = state;
            let mut in_flight: FuturesUnordered<_> = sources
                .iter()
                .map(|source| self.harvest_feed(source, committed))
                .collect();
            while let Some(outcome) = in_flight.next().await {
                outcomes.push(outcome);
            }
        }

        let mut report = RunReport::default();
        for (name, newest, mut source_report) in outcomes {
            if let Some(url) = newest {
                state.advance(&name, &url);
                source_report.advanced = true;
            }
            report.sources.insert(name, source_report);
        }
        report
    }

    /// One source: feed, diff, article jobs, barrier.
    ///
    /// Returns the source name, the watermark to stage (the newest feed entry,
    /// whatever its own job's outcome) and the report.
    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    async fn harvest_feed(
        &self,
        source: &Source,
        state: &CrawlState,
    ) -> (String, Option<String>, SourceReport) {
        let mut report = SourceReport::default();
        let Some(feed_url) = source.feed_url.clone() else {
            warn!("Source has no feed-url; skipping");
            report.listing_failed = true;
            return (source.name.clone(), None, report);
        };

        let entries = self
            .feed_pool
            .submit(
                format!("feed:{}", source.name),
                fetch_feed(
                    Arc::clone(&self.fetcher),
                    feed_url,
                    source.base_url.clone(),
                ),
            )
            .await
            .join()
            .await;

        let Some(entries) = entries else {
            report.listing_failed = true;
            return (source.name.clone(), None, report);
        };
        if entries.is_empty() {
            info!("Feed has no entries; watermark unchanged");
            return (source.name.clone(), None, report);
        }

        let fresh = state.diff(&source.name, &entries);
        report.discovered = fresh.len();
        info!(total = entries.len(), fresh = fresh.len(), "Feed diffed against watermark");

        let shared = Arc::new(source.clone());
        let mut handles = Vec::with_capacity(fresh.len());
        for entry in fresh {
            handles.push(
                self.submit_article(Arc::clone(&shared), entry.url.clone(), Overrides::from(entry))
                    .await,
            );
        }
        tally(&mut report, join_all(handles).await);

        let newest = entries.first().map(|e: &FeedEntry| e.url.clone());
        (source.name.clone(), newest, report)
    }

    /// Queue one fetch, extract and store job on the article pool.
    pub(crate) async fn submit_article(
        &self,
        source: Arc<Source>,
        url: String,
        overrides: Overrides,
    ) -> JobHandle<()> {
        let label = format!("article:{url}");
        self.article_pool
            .submit(
                label,
                harvest_article(
                    Arc::clone(&self.fetcher),
                    Arc::clone(&self.sink),
                    source,
                    url,
                    overrides,
                ),
            )
            .await
    }

    /// Wait for every queued job to finish.
    pub async fn shutdown(self) {
        self.feed_pool.shutdown().await;
        self.article_pool.shutdown().await;
    }
}

pub(crate) fn tally(report: &mut SourceReport, outcomes: Vec<Option<()>>) {
    for outcome in outcomes {
        match outcome {
            Some(()) => report.stored += 1,
            None => report.failed += 1,
        }
    }
}

async fn fetch_feed(
    fetcher: Arc<dyn Fetcher>,
    feed_url: String,
    base_url: String,
) -> Option<Vec<FeedEntry>> {
    let body = match fetcher.fetch(&feed_url).await {
        Ok(body) => body,
        Err(e) => {
            error!(%feed_url, error = %e, "Feed fetch failed");
            return None;
        }
    };
    match parse_feed(&body, &base_url) {
        Ok(entries) => Some(entries),
        Err(e) => {
            error!(
                %feed_url,
                error = %e,
                preview = %truncate_for_log(&String::from_utf8_lossy(&body), 200),
                "Feed could not be parsed"
            );
            None
        }
    }
}

/// Fetch one page, extract it and hand a valid article to the sink.
///
/// Every failure is logged with the URL and source and yields `None`.
async fn harvest_article(
    fetcher: Arc<dyn Fetcher>,
    sink: Arc<dyn Sink>,
    source: Arc<Source>,
    url: String,
    overrides: Overrides,
) -> Option<()> {
    let article = match fetch_article(fetcher.as_ref(), &source, &url, &overrides).await {
        Ok(article) => article,
        Err(e @ ExtractError::MissingField { .. }) => {
            warn!(source = %source.name, %url, error = %e, "Article not stored");
            return None;
        }
        Err(e) => {
            error!(source = %source.name, %url, error = %e, "Article extraction failed");
            return None;
        }
    };

    match sink.store(&article).await {
        Ok(()) => {
            info!(source = %source.name, sink = sink.name(), article = %article.dump(), "Stored article");
            Some(())
        }
        Err(e) => {
            error!(source = %source.name, %url, sink = sink.name(), error = %e, "Store failed");
            None
        }
    }
}

/// Fetch and extract one article; a result without content is an error.
async fn fetch_article(
    fetcher: &dyn Fetcher,
    source: &Source,
    url: &str,
    overrides: &Overrides,
) -> Result<Article, ExtractError> {
    let body = fetcher.fetch(url).await?;
    let article = extract(url, &body, source, overrides)?;
    if !article.is_valid() {
        return Err(ExtractError::MissingField {
            url: url.to_string(),
            field: "content",
        });
    }
    Ok(article)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtractionRules, SelectorRule};
    use crate::errors::FetchError;
    use crate::fetcher::HttpFetcher;
    use crate::sinks::memory::MemorySink;
    use mockito::{Server, ServerGuard};
    use std::time::Duration;

    fn source(server: &ServerGuard, name: &str) -> Source {
        Source {
            name: name.to_string(),
            feed_url: Some(format!("{}/{name}/feed", server.url())),
            base_url: format!("{}/", server.url()),
            rules: ExtractionRules {
                headline: Some(SelectorRule::css("h1")),
                author: Some(SelectorRule::xpath("//span[@class='by']")),
                content: Some(SelectorRule::css("div.body")),
            },
            archive: None,
        }
    }

    fn rss(links: &[String]) -> String {
        let items: String = links
            .iter()
            .map(|l| format!("<item><title>T {l}</title><link>{l}</link></item>"))
            .collect();
        format!("<rss version=\"2.0\"><channel><title>x</title>{items}</channel></rss>")
    }

    fn page(body: &str) -> String {
        format!(
            "<html><body><h1>Page headline</h1><span class=\"by\">Ferris</span>{body}</body></html>"
        )
    }

    fn harvester(sink: Arc<MemorySink>) -> Harvester {
        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(5)).unwrap();
        Harvester::new(
            Arc::new(fetcher),
            sink,
            WorkerConfig {
                feeds: 2,
                articles: 3,
            },
        )
    }

    #[tokio::test]
    async fn test_only_entries_newer_than_watermark_are_stored() {
        let mut server = Server::new_async().await;
        let links: Vec<String> = (1..=4).map(|i| format!("{}/tc/u{i}", server.url())).collect();
        let _feed = server
            .mock("GET", "/tc/feed")
            .with_body(rss(&links))
            .create_async()
            .await;
        let new_pages: Vec<_> = {
            let mut mocks = Vec::new();
            for i in 1..=2 {
                mocks.push(
                    server
                        .mock("GET", format!("/tc/u{i}").as_str())
                        .with_body(page("<div class=\"body\"><p>Story</p></div>"))
                        .expect(1)
                        .create_async()
                        .await,
                );
            }
            mocks
        };
        let old_pages = server
            .mock("GET", mockito::Matcher::Regex("^/tc/u[34]$".to_string()))
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.yaml");
        std::fs::write(&state_path, format!("tc:\n  last_entry: {}\n", links[2])).unwrap();
        let mut state = CrawlState::load(&state_path).await.unwrap();

        let sink = Arc::new(MemorySink::default());
        let harvester = harvester(Arc::clone(&sink));
        let report = harvester
            .run_feeds(&[source(&server, "tc")], &mut state)
            .await;
        harvester.shutdown().await;

        for m in &new_pages {
            m.assert_async().await;
        }
        old_pages.assert_async().await;
        assert_eq!(sink.urls(), vec![links[0].clone(), links[1].clone()]);

        let stored = sink.stored.lock().unwrap().clone();
        let first = stored.iter().find(|a| a.url == links[0]).unwrap();
        assert_eq!(first.headline, format!("T {}", links[0]));
        assert_eq!(first.author, "Ferris");
        assert_eq!(first.clean_content, "Story");

        let tc = &report.sources["tc"];
        assert_eq!((tc.discovered, tc.stored, tc.failed), (2, 2, 0));
        assert!(tc.advanced);

        state.persist(&state_path).await.unwrap();
        let reloaded = CrawlState::load(&state_path).await.unwrap();
        assert_eq!(reloaded.watermark("tc"), Some(links[0].as_str()));
    }

    #[tokio::test]
    async fn test_failed_article_does_not_block_siblings() {
        let mut server = Server::new_async().await;
        let links = vec![
            format!("{}/tc/ok1", server.url()),
            "http://127.0.0.1:9/unreachable".to_string(),
            format!("{}/tc/ok2", server.url()),
        ];
        let _feed = server
            .mock("GET", "/tc/feed")
            .with_body(rss(&links))
            .create_async()
            .await;
        let _ok = server
            .mock("GET", mockito::Matcher::Regex("^/tc/ok[12]$".to_string()))
            .with_body(page("<div class=\"body\">fine</div>"))
            .expect(2)
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::default());
        let harvester = harvester(Arc::clone(&sink));
        let mut state = CrawlState::new();
        let report = harvester
            .run_feeds(&[source(&server, "tc")], &mut state)
            .await;
        harvester.shutdown().await;

        assert_eq!(sink.urls(), vec![links[0].clone(), links[2].clone()]);
        let tc = &report.sources["tc"];
        assert_eq!((tc.stored, tc.failed), (2, 1));
    }

    #[tokio::test]
    async fn test_article_without_content_is_not_stored() {
        let mut server = Server::new_async().await;
        let links = vec![
            format!("{}/tc/empty", server.url()),
            format!("{}/tc/full", server.url()),
        ];
        let _feed = server
            .mock("GET", "/tc/feed")
            .with_body(rss(&links))
            .create_async()
            .await;
        let _empty = server
            .mock("GET", "/tc/empty")
            .with_body(page("<p>no body div here</p>"))
            .create_async()
            .await;
        let _full = server
            .mock("GET", "/tc/full")
            .with_body(page("<div class=\"body\">text</div>"))
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::default());
        let harvester = harvester(Arc::clone(&sink));
        let mut state = CrawlState::new();
        let report = harvester
            .run_feeds(&[source(&server, "tc")], &mut state)
            .await;
        harvester.shutdown().await;

        assert_eq!(sink.urls(), vec![links[1].clone()]);
        assert_eq!(report.sources["tc"].failed, 1);
    }

    #[tokio::test]
    async fn test_failed_feed_leaves_state_unchanged() {
        let mut server = Server::new_async().await;
        let _down = server
            .mock("GET", "/down/feed")
            .with_status(500)
            .create_async()
            .await;
        let up_links = vec![format!("{}/up/a", server.url())];
        let _up = server
            .mock("GET", "/up/feed")
            .with_body(rss(&up_links))
            .create_async()
            .await;
        let _page = server
            .mock("GET", "/up/a")
            .with_body(page("<div class=\"body\">x</div>"))
            .create_async()
            .await;

        let mut state = CrawlState::new();
        let sink = Arc::new(MemorySink::default());
        let harvester = harvester(Arc::clone(&sink));
        let report = harvester
            .run_feeds(&[source(&server, "down"), source(&server, "up")], &mut state)
            .await;
        harvester.shutdown().await;

        assert!(report.sources["down"].listing_failed);
        assert!(!report.sources["down"].advanced);
        assert!(state.staged().get("down").is_none());
        assert_eq!(state.staged().get("up"), Some(&up_links[0]));
        assert_eq!(sink.urls(), up_links);
    }

    #[tokio::test]
    async fn test_watermark_advances_even_when_newest_job_fails() {
        // The newest entry's store fails, yet it still becomes the watermark,
        // so it will not be retried on the next run.
        let mut server = Server::new_async().await;
        let links = vec![
            format!("{}/tc/newest", server.url()),
            format!("{}/tc/older", server.url()),
        ];
        let _feed = server
            .mock("GET", "/tc/feed")
            .with_body(rss(&links))
            .create_async()
            .await;
        let _pages = server
            .mock("GET", mockito::Matcher::Regex("^/tc/(newest|older)$".to_string()))
            .with_body(page("<div class=\"body\">x</div>"))
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::failing(&[links[0].as_str()]));
        let harvester = harvester(Arc::clone(&sink));
        let mut state = CrawlState::new();
        let report = harvester
            .run_feeds(&[source(&server, "tc")], &mut state)
            .await;
        harvester.shutdown().await;

        assert_eq!(sink.urls(), vec![links[1].clone()]);
        assert_eq!(report.sources["tc"].failed, 1);
        assert_eq!(state.staged().get("tc"), Some(&links[0]));
    }

    #[tokio::test]
    async fn test_empty_feed_does_not_advance() {
        let mut server = Server::new_async().await;
        let _feed = server
            .mock("GET", "/tc/feed")
            .with_body(rss(&[]))
            .create_async()
            .await;

        let sink = Arc::new(MemorySink::default());
        let harvester = harvester(Arc::clone(&sink));
        let mut state = CrawlState::new();
        let report = harvester
            .run_feeds(&[source(&server, "tc")], &mut state)
            .await;
        harvester.shutdown().await;

        let tc = &report.sources["tc"];
        assert!(!tc.advanced && !tc.listing_failed);
        assert!(state.staged().is_empty());
    }

    #[test]
    fn test_report_totals() {
        let mut report = RunReport::default();
        let mut a = SourceReport::default();
        tally(&mut a, vec![Some(()), None, Some(())]);
        report.sources.insert("a".to_string(), a);
        let mut b = SourceReport::default();
        tally(&mut b, vec![None]);
        report.sources.insert("b".to_string(), b);
        assert_eq!(report.stored(), 2);
        assert_eq!(report.failed(), 2);
    }

    #[tokio::test]
    async fn test_fetch_article_classifies_failures() {
        let mut server = Server::new_async().await;
        let _empty = server
            .mock("GET", "/tc/empty")
            .with_body(page("<p>no body div</p>"))
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/tc/gone")
            .with_status(404)
            .create_async()
            .await;

        let fetcher = HttpFetcher::with_timeout(Duration::from_secs(5)).unwrap();
        let src = source(&server, "tc");
        let overrides = Overrides::default();

        let empty_url = format!("{}/tc/empty", server.url());
        let missing = fetch_article(&fetcher, &src, &empty_url, &overrides).await;
        assert!(matches!(
            missing,
            Err(ExtractError::MissingField { field: "content", .. })
        ));

        let gone_url = format!("{}/tc/gone", server.url());
        let gone = fetch_article(&fetcher, &src, &gone_url, &overrides).await;
        assert!(matches!(
            gone,
            Err(ExtractError::Fetch(FetchError::HttpStatus { status: 404, .. }))
        ));

        let unreachable = fetch_article(&fetcher, &src, "http://127.0.0.1:9/x", &overrides).await;
        assert!(matches!(unreachable, Err(ExtractError::Fetch(_))));
    }
}

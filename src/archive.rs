//! Archive mode: crawl the paginated listing pages of each vendor.
//!
//! Listing pages `1..=max` are fetched on the feed pool; every link the
//! vendor's link rule selects becomes one extraction job without overrides.
//! Archive runs never read or advance crawl state.

use crate::config::{ArchiveListing, Source};
use crate::extract::{parse_document, selector};
use crate::feeds::resolve_url;
use crate::fetcher::Fetcher;
use crate::models::Overrides;
use crate::pipeline::{Harvester, RunReport, SourceReport, tally};
use crate::pool::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

impl Harvester {
    /// Crawl the archive listings of every source that configures one.
    #[instrument(level = "info", skip_all, fields(sources = sources.len()))]
    pub async fn run_archive(&self, sources: &[Source]) -> RunReport {
        let mut in_flight: FuturesUnordered<_> = sources
            .iter()
            .filter(|source| {
                let has_archive = source.archive.is_some();
                if !has_archive {
                    debug!(source = %source.name, "No archive-links configured; skipping");
                }
                has_archive
            })
            .map(|source| self.harvest_archive(source))
            .collect();

        let mut report = RunReport::default();
        while let Some((name, source_report)) = in_flight.next().await {
            report.sources.insert(name, source_report);
        }
        report
    }

    #[instrument(level = "info", skip_all, fields(source = %source.name))]
    async fn harvest_archive(&self, source: &Source) -> (String, SourceReport) {
        let mut report = SourceReport::default();
        let Some(listing) = source.archive.clone() else {
            return (source.name.clone(), report);
        };

        let pages = listing.page_urls();
        let mut page_handles = Vec::with_capacity(pages.len());
        for page_url in pages {
            page_handles.push(
                self.feed_pool
                    .submit(
                        format!("listing:{page_url}"),
                        fetch_listing(
                            Arc::clone(&self.fetcher),
                            page_url,
                            listing.clone(),
                            source.base_url.clone(),
                        ),
                    )
                    .await,
            );
        }
        let listed = join_all(page_handles).await;
        if listed.iter().all(Option::is_none) {
            warn!("No listing page could be read");
            report.listing_failed = true;
        }

        let links: Vec<String> = listed.into_iter().flatten().flatten().unique().collect();
        report.discovered = links.len();
        info!(links = links.len(), "Collected archive links");

        let shared = Arc::new(source.clone());
        let mut handles = Vec::with_capacity(links.len());
        for link in links {
            handles.push(
                self.submit_article(Arc::clone(&shared), link, Overrides::default())
                    .await,
            );
        }
        tally(&mut report, join_all(handles).await);
        (source.name.clone(), report)
    }
}

async fn fetch_listing(
    fetcher: Arc<dyn Fetcher>,
    page_url: String,
    listing: ArchiveListing,
    base_url: String,
) -> Option<Vec<String>> {
    match fetcher.fetch(&page_url).await {
        Ok(body) => Some(listing_links(&body, &listing, &base_url)),
        Err(e) => {
            error!(%page_url, error = %e, "Listing page fetch failed");
            None
        }
    }
}

/// Absolute article links selected on one listing page, in document order.
pub fn listing_links(html: &[u8], listing: &ArchiveListing, base_url: &str) -> Vec<String> {
    let doc = match parse_document(html) {
        Ok(doc) => doc,
        Err(e) => {
            error!(error = %e, "Listing page could not be parsed");
            return Vec::new();
        }
    };
    let base = Url::parse(base_url).ok();
    selector::evaluate_all(&doc, &listing.links)
        .iter()
        .filter_map(|m| m.href())
        .filter_map(|href| match resolve_url(base.as_ref(), &href) {
            Some(url) => Some(url),
            None => {
                error!(%href, "Dropping malformed archive link");
                None
            }
        })
        .collect()
}

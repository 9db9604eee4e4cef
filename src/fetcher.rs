//! Page and feed retrieval.
//!
//! [`Fetcher`] is the seam the pipeline is tested through: production code
//! uses [`HttpFetcher`], tests point it at a mock server or swap in their own
//! implementation. Fetchers never retry; a failed fetch is reported once and
//! the caller drops the job.

use crate::config::FetchConfig;
use crate::errors::FetchError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Retrieve the body of `url`.
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// `reqwest`-backed fetcher with a bounded per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }

    /// Same as [`HttpFetcher::new`] with an explicit timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let t0 = Instant::now();
        let result = async {
            let response = self.client.get(url).send().await?.error_for_status()?;
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(body.to_vec())
        }
        .await
        .map_err(|e| FetchError::from_reqwest(url, e));

        match &result {
            Ok(body) => debug!(
                bytes = body.len(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Fetched"
            ),
            Err(e) => warn!(
                elapsed_ms = t0.elapsed().as_millis() as u64,
                error = %e,
                "Fetch failed"
            ),
        }
        result
    }
}

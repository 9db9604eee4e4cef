//! Article sinks.
//!
//! A [`Sink`] receives every valid article once. Implementations are shared
//! by all article workers, so `store` must be safe to call concurrently.
//! `close` is called exactly once, after every job has finished.
//!
//! - [`queue::QueueSink`]: JSON records pushed onto a Redis list
//! - [`relational::RelationalSink`]: rows in a SQLite table
//! - [`file::FileSink`]: one rendered HTML file per source

pub mod file;
pub mod queue;
pub mod relational;

use crate::config::SinkConfig;
use crate::errors::StoreError;
use crate::models::Article;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Persist one valid article.
    async fn store(&self, article: &Article) -> Result<(), StoreError>;

    /// Flush and release resources.
    async fn close(&self) -> Result<(), StoreError>;
}

/// Construct the sink described by `config`.
pub async fn build(config: &SinkConfig) -> Result<Arc<dyn Sink>, StoreError> {
    let sink: Arc<dyn Sink> = match config {
        SinkConfig::Queue { url, queue: key } => Arc::new(queue::QueueSink::connect(url, key).await?),
        SinkConfig::Relational {
            url,
            article_table,
            max_connections,
        } => Arc::new(
            relational::RelationalSink::connect(url, article_table, *max_connections).await?,
        ),
        SinkConfig::File { dir } => Arc::new(file::FileSink::open(dir).await?),
    };
    info!(sink = sink.name(), "Sink ready");
    Ok(sink)
}

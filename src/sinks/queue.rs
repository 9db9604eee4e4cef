//! Redis list sink: each article is pushed as one JSON [`ArticleRecord`].

use super::Sink;
use crate::errors::StoreError;
use crate::models::{Article, ArticleRecord};
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::MultiplexedConnection;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, instrument};

pub struct QueueSink {
    conn: MultiplexedConnection,
    queue: String,
    pushed: AtomicUsize,
}

impl QueueSink {
    /// Open the Redis connection eagerly so a bad URL fails at startup.
    #[instrument(level = "info", skip(url))]
    pub async fn connect(url: &str, queue: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        info!("Connected to queue");
        Ok(Self {
            conn,
            queue: queue.to_string(),
            pushed: AtomicUsize::new(0),
        })
    }
}

/// Serialize an article into the queue payload.
pub fn encode(article: &Article) -> Result<String, StoreError> {
    let record = ArticleRecord::from_article(article).ok_or_else(|| {
        StoreError::Config(format!("refusing to enqueue invalid article {}", article.url))
    })?;
    Ok(serde_json::to_string(&record)?)
}

#[async_trait]
impl Sink for QueueSink {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn store(&self, article: &Article) -> Result<(), StoreError> {
        let payload = encode(article)?;
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.queue, payload).await?;
        self.pushed.fetch_add(1, Ordering::Relaxed);
        debug!(queue = %self.queue, url = %article.url, "Enqueued article");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        info!(
            queue = %self.queue,
            pushed = self.pushed.load(Ordering::Relaxed),
            "Queue sink closed"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn article(raw: Option<&str>) -> Article {
        Article {
            author: "Jane".to_string(),
            url: "https://example.com/a".to_string(),
            headline: "Hi \"there\"".to_string(),
            raw_content: raw.map(str::to_string),
            clean_content: "Body".to_string(),
            source_name: "example".to_string(),
        }
    }

    #[test]
    fn test_encode_uses_record_field_names() {
        let payload = encode(&article(Some("<p>Body</p>"))).unwrap();
        let decoded: ArticleRecord = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded.link, "https://example.com/a");
        assert_eq!(decoded.headline, "Hi \"there\"");
        assert_eq!(decoded.content, "<p>Body</p>");
        assert_eq!(decoded.news_vendor, "example");
    }

    #[test]
    fn test_encode_rejects_invalid_article() {
        assert!(matches!(encode(&article(None)), Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_fails_without_server() {
        // Nothing listens on port 9.
        assert!(QueueSink::connect("redis://127.0.0.1:9/", "q").await.is_err());
    }
}

//! File sink: articles rendered as HTML sections, one file per source.
//!
//! Each stored article is appended to `<dir>/<source>.html`. All writes go
//! through one mutex so sections from concurrent workers never interleave.

use super::Sink;
use crate::errors::StoreError;
use crate::models::Article;
use crate::utils::{ensure_writable_dir, file_stem};
use async_trait::async_trait;
use chrono::Utc;
use html_escape::{encode_double_quoted_attribute, encode_text};
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

pub struct FileSink {
    dir: PathBuf,
    write_lock: Mutex<usize>,
}

impl FileSink {
    #[instrument(level = "info")]
    pub async fn open(dir: &str) -> Result<Self, StoreError> {
        ensure_writable_dir(dir).await?;
        Ok(Self {
            dir: PathBuf::from(dir),
            write_lock: Mutex::new(0),
        })
    }

    fn path_for(&self, source: &str) -> PathBuf {
        self.dir.join(format!("{}.html", file_stem(source)))
    }
}

/// Render one article as an HTML section. Every field is escaped.
pub fn render(article: &Article) -> String {
    let headline = if article.headline.is_empty() {
        "(untitled)"
    } else {
        article.headline.as_str()
    };
    format!(
        "<section class=\"article\">\n\
         <h2><a href=\"{url}\">{headline}</a></h2>\n\
         <p class=\"byline\">{author}</p>\n\
         <p class=\"stored\">{stored}</p>\n\
         <div class=\"content\">{content}</div>\n\
         <details class=\"raw\"><summary>source markup</summary><pre>{raw}</pre></details>\n\
         </section>\n",
        url = encode_double_quoted_attribute(&article.url),
        headline = encode_text(headline),
        author = encode_text(&article.author),
        stored = Utc::now().to_rfc3339(),
        content = encode_text(&article.clean_content),
        raw = encode_text(article.raw_content.as_deref().unwrap_or_default()),
    )
}

#[async_trait]
impl Sink for FileSink {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn store(&self, article: &Article) -> Result<(), StoreError> {
        let section = render(article);
        let path = self.path_for(&article.source_name);

        let mut written = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(section.as_bytes()).await?;
        file.flush().await?;
        *written += 1;

        debug!(path = %path.display(), url = %article.url, "Appended article");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        let written = *self.write_lock.lock().await;
        info!(dir = %self.dir.display(), written, "File sink closed");
        Ok(())
    }
}

//! SQLite sink: one row per article.
//!
//! Columns follow the article record, except the vendor name, which is stored
//! as `newsservice`.

use super::Sink;
use crate::errors::StoreError;
use crate::models::{Article, ArticleRecord};
use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{debug, info, instrument};

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"));

pub struct RelationalSink {
    pool: SqlitePool,
    table: String,
    insert_sql: String,
}

impl RelationalSink {
    /// Connect and create the article table if needed.
    ///
    /// The table name is interpolated into SQL, so it must be a plain
    /// identifier.
    #[instrument(level = "info", skip(url))]
    pub async fn connect(url: &str, table: &str, max_connections: u32) -> Result<Self, StoreError> {
        if !IDENTIFIER.is_match(table) {
            return Err(StoreError::Config(format!(
                "article table `{table}` is not a valid identifier"
            )));
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(url)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author TEXT NOT NULL,
                link TEXT NOT NULL,
                headline TEXT NOT NULL,
                content TEXT NOT NULL,
                clean_content TEXT NOT NULL,
                newsservice TEXT NOT NULL,
                stored_at TEXT NOT NULL
            )
            "#
        ))
        .execute(&pool)
        .await?;

        info!("Article table ready");
        Ok(Self {
            pool,
            table: table.to_string(),
            insert_sql: format!(
                "INSERT INTO {table} (author, link, headline, content, clean_content, newsservice, stored_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?)"
            ),
        })
    }
}

#[async_trait]
impl Sink for RelationalSink {
    fn name(&self) -> &'static str {
        "relational"
    }

    async fn store(&self, article: &Article) -> Result<(), StoreError> {
        let record = ArticleRecord::from_article(article).ok_or_else(|| {
            StoreError::Config(format!("refusing to insert invalid article {}", article.url))
        })?;
        sqlx::query(&self.insert_sql)
            .bind(&record.author)
            .bind(&record.link)
            .bind(&record.headline)
            .bind(&record.content)
            .bind(&record.clean_content)
            .bind(&record.news_vendor)
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        debug!(table = %self.table, url = %record.link, "Inserted article");
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        info!(table = %self.table, "Relational sink closed");
        Ok(())
    }
}

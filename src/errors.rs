//! Error taxonomy for the harvesting pipeline.
//!
//! Per-job errors ([`FetchError`], [`ParseError`], [`ExtractError`],
//! [`StoreError`]) are caught at the job boundary, logged and turned into
//! "this job produced nothing". Only [`ConfigError`], [`StateError`] on load
//! and sink construction failures stop the process.

use thiserror::Error;

/// Failure to retrieve a URL.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, DNS, TLS or body read failure.
    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The request exceeded the configured timeout.
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    /// The server answered with a non-2xx status.
    #[error("HTTP status {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },
}

impl FetchError {
    /// Classify a `reqwest` error for the given URL.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if let Some(status) = err.status() {
            FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Network {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Markup the HTML parser cannot turn into a usable document.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,

    #[error("document looks like binary data, not markup")]
    Binary,
}

/// Failure to produce an article from a page.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("could not parse {url}: {source}")]
    Parse { url: String, source: ParseError },

    /// A mandatory field (only `content` today) was not found.
    #[error("mandatory field `{field}` unavailable for {url}")]
    MissingField { url: String, field: &'static str },
}

/// Failure of a sink to accept or release an article.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("queue error: {0}")]
    Queue(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid sink configuration: {0}")]
    Config(String),
}

/// Failure to load or validate the YAML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("could not parse config {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure to load or persist crawl state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state IO error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("could not (de)serialize state {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml::Error,
    },
}

/// Failure to parse a syndication feed.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("XML deserialization error: {0}")]
    Deserialize(#[from] quick_xml::errors::serialize::DeError),

    #[error("unrecognised feed format (root element `{0}`)")]
    UnknownFormat(String),

    #[error("feed has no root element")]
    NoRoot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display_includes_url() {
        let e = FetchError::HttpStatus {
            url: "http://example.com/a".to_string(),
            status: 503,
        };
        assert_eq!(e.to_string(), "HTTP status 503 fetching http://example.com/a");
    }

    #[test]
    fn test_extract_error_wraps_fetch() {
        let e: ExtractError = FetchError::Timeout {
            url: "http://example.com".to_string(),
        }
        .into();
        assert!(matches!(e, ExtractError::Fetch(FetchError::Timeout { .. })));
        assert_eq!(e.to_string(), "timed out fetching http://example.com");
    }
}

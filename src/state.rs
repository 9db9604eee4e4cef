//! Per-source watermarks: the newest entry URL seen on the previous run.
//!
//! The state file is YAML, one mapping per source:
//!
//! ```yaml
//! techcrunch:
//!   last_entry: http://techcrunch.com/2013/01/01/newest-story/
//! ```
//!
//! Watermarks staged with [`CrawlState::advance`] become visible to
//! [`CrawlState::diff`] only after [`CrawlState::persist`], which writes the
//! whole map to a temporary file and renames it over the old one.

use crate::errors::StateError;
use crate::models::FeedEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    #[serde(default)]
    pub last_entry: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlState {
    committed: BTreeMap<String, StateEntry>,
    staged: BTreeMap<String, String>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load state from `path`. A missing file is a cold start for every source.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, StateError> {
        let path = path.as_ref();
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("State file does not exist; every source starts cold");
                return Ok(Self::new());
            }
            Err(source) => {
                return Err(StateError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };

        let state = Self::from_yaml(&text).map_err(|source| StateError::Yaml {
            path: path.display().to_string(),
            source,
        })?;
        info!(sources = state.committed.len(), "Loaded crawl state");
        Ok(state)
    }

    fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        let committed: Option<BTreeMap<String, Option<StateEntry>>> = serde_yaml::from_str(text)?;
        let committed = committed
            .unwrap_or_default()
            .into_iter()
            .map(|(name, entry)| (name, entry.unwrap_or_default()))
            .collect();
        Ok(Self {
            committed,
            staged: BTreeMap::new(),
        })
    }

    /// The persisted watermark for `source`, if any.
    pub fn watermark(&self, source: &str) -> Option<&str> {
        self.committed
            .get(source)
            .and_then(|e| e.last_entry.as_deref())
            .filter(|url| !url.is_empty())
    }

    /// Entries newer than the watermark, in feed order.
    ///
    /// Returns the prefix of `entries` before the entry whose URL equals the
    /// watermark. Without a watermark, or when the watermark no longer appears
    /// in the feed, the whole feed is returned.
    pub fn diff<'a>(&self, source: &str, entries: &'a [FeedEntry]) -> &'a [FeedEntry] {
        let Some(watermark) = self.watermark(source) else {
            debug!(source, count = entries.len(), "No watermark; cold start");
            return entries;
        };
        match entries.iter().position(|e| e.url == watermark) {
            Some(k) => &entries[..k],
            None => {
                warn!(
                    source,
                    watermark,
                    count = entries.len(),
                    "Watermark not found in feed; crawling the whole feed"
                );
                entries
            }
        }
    }

    /// Stage a new watermark for `source`.
    pub fn advance(&mut self, source: &str, newest_url: &str) {
        debug!(source, newest_url, "Staging watermark");
        self.staged.insert(source.to_string(), newest_url.to_string());
    }

    /// Watermarks staged but not yet persisted.
    pub fn staged(&self) -> &BTreeMap<String, String> {
        &self.staged
    }

    /// Commit staged watermarks and atomically write the full map to `path`.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub async fn persist(&mut self, path: impl AsRef<Path>) -> Result<(), StateError> {
        let path = path.as_ref();
        let mut merged = self.committed.clone();
        for (source, url) in &self.staged {
            merged.insert(
                source.clone(),
                StateEntry {
                    last_entry: Some(url.clone()),
                },
            );
        }

        let yaml = serde_yaml::to_string(&merged).map_err(|source| StateError::Yaml {
            path: path.display().to_string(),
            source,
        })?;
        write_atomically(path, yaml.as_bytes())
            .await
            .map_err(|source| StateError::Io {
                path: path.display().to_string(),
                source,
            })?;

        info!(sources = merged.len(), advanced = self.staged.len(), "Persisted crawl state");
        self.committed = merged;
        self.staged.clear();
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await
}

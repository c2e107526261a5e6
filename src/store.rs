//! Flat-file JSON persistence.
//!
//! Every document the system knows about lives as one JSON file in the data
//! directory:
//!
//! ```text
//! data/
//! ├── config.json          # admin-editable configuration
//! ├── news.json            # date-keyed topic archive
//! ├── events.json          # curated travel events
//! ├── comments.json        # threads keyed by title digest
//! ├── processed_urls.json  # seen-set for dedup
//! ├── stats.json           # last batch run
//! └── panels.json          # air quality + exchange snapshots
//! ```
//!
//! A missing file reads as the document's default value; writes replace the
//! whole file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::dedup::{find_near_duplicate, signature};
use crate::models::{
    BatchStats, Comment, CommentStore, Event, NewsArchive, NewsTopic, PanelReport,
};

pub const NEWS_FILE: &str = "news.json";
pub const EVENTS_FILE: &str = "events.json";
pub const COMMENTS_FILE: &str = "comments.json";
pub const PROCESSED_FILE: &str = "processed_urls.json";
pub const STATS_FILE: &str = "stats.json";
pub const PANELS_FILE: &str = "panels.json";

/// Handle to a data directory full of JSON documents.
#[derive(Debug, Clone)]
pub struct JsonStore {
    data_dir: PathBuf,
}

/// Outcome of merging freshly analyzed topics into the archive.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub added: usize,
    pub replaced: usize,
    pub skipped_duplicate: usize,
}

impl JsonStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn path(&self, file: &str) -> PathBuf {
        self.data_dir.join(file)
    }

    /// Load a document, treating a missing file as the default value.
    pub async fn load<T>(&self, file: &str) -> Result<T, crate::error::AggregatorError>
    where
        T: DeserializeOwned + Default,
    {
        let path = self.path(file);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let value = serde_json::from_slice(&bytes)?;
                debug!(path = %path.display(), "Loaded document");
                Ok(value)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Document missing; using default");
                Ok(T::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write a document, replacing any previous content.
    pub async fn save<T>(&self, file: &str, value: &T) -> Result<(), crate::error::AggregatorError>
    where
        T: Serialize,
    {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        let path = self.path(file);
        let json = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), "Wrote document");
        Ok(())
    }

    pub async fn load_archive(&self) -> Result<NewsArchive, crate::error::AggregatorError> {
        self.load(NEWS_FILE).await
    }

    pub async fn save_archive(
        &self,
        archive: &NewsArchive,
    ) -> Result<(), crate::error::AggregatorError> {
        self.save(NEWS_FILE, archive).await
    }

    pub async fn load_events(&self) -> Result<Vec<Event>, crate::error::AggregatorError> {
        self.load(EVENTS_FILE).await
    }

    pub async fn save_events(
        &self,
        events: &[Event],
    ) -> Result<(), crate::error::AggregatorError> {
        self.save(EVENTS_FILE, &events).await
    }

    pub async fn load_comments(&self) -> Result<CommentStore, crate::error::AggregatorError> {
        self.load(COMMENTS_FILE).await
    }

    pub async fn save_comments(
        &self,
        comments: &CommentStore,
    ) -> Result<(), crate::error::AggregatorError> {
        self.save(COMMENTS_FILE, comments).await
    }

    /// The processed-URL seen-set. Stored sorted so diffs stay readable.
    pub async fn load_processed(&self) -> Result<BTreeSet<String>, crate::error::AggregatorError> {
        let urls: Vec<String> = self.load(PROCESSED_FILE).await?;
        Ok(urls.into_iter().collect())
    }

    pub async fn save_processed(
        &self,
        processed: &BTreeSet<String>,
    ) -> Result<(), crate::error::AggregatorError> {
        let urls: Vec<&String> = processed.iter().collect();
        self.save(PROCESSED_FILE, &urls).await
    }

    pub async fn load_stats(&self) -> Result<BatchStats, crate::error::AggregatorError> {
        self.load(STATS_FILE).await
    }

    pub async fn save_stats(
        &self,
        stats: &BatchStats,
    ) -> Result<(), crate::error::AggregatorError> {
        self.save(STATS_FILE, stats).await
    }

    pub async fn load_panels(&self) -> Result<PanelReport, crate::error::AggregatorError> {
        self.load(PANELS_FILE).await
    }

    pub async fn save_panels(
        &self,
        panels: &PanelReport,
    ) -> Result<(), crate::error::AggregatorError> {
        self.save(PANELS_FILE, panels).await
    }

    /// Append a comment under the thread for `digest`.
    pub async fn append_comment(
        &self,
        digest: &str,
        comment: Comment,
    ) -> Result<(), crate::error::AggregatorError> {
        let mut comments = self.load_comments().await?;
        comments.entry(digest.to_string()).or_default().push(comment);
        self.save_comments(&comments).await
    }
}

/// Every dedup signature present in the archive: one per backing reference,
/// plus one for the topic title itself.
pub fn archive_signatures(archive: &NewsArchive) -> BTreeSet<String> {
    let mut signatures = BTreeSet::new();
    for topics in archive.values() {
        for topic in topics {
            signatures.insert(signature(&topic.title, ""));
            for reference in &topic.references {
                signatures.insert(signature(&reference.title, &reference.url));
            }
        }
    }
    signatures
}

/// Titles collected over the last `days` archive days, used by the
/// near-duplicate filter. Includes both the Thai topic titles and the
/// original reference headlines, since incoming feed items are compared in
/// their source language.
pub fn recent_titles(archive: &NewsArchive, days: i64) -> Vec<String> {
    let cutoff = chrono::Utc::now().date_naive() - Duration::days(days);
    let mut titles = Vec::new();
    for (date, topics) in archive.iter().rev() {
        match date.parse::<chrono::NaiveDate>() {
            Ok(parsed) if parsed < cutoff => break,
            Ok(_) => {}
            Err(_) => {
                warn!(date, "Archive key is not an ISO date; including anyway");
            }
        }
        for topic in topics {
            titles.push(topic.title.clone());
            titles.extend(topic.references.iter().map(|r| r.title.clone()));
        }
    }
    titles
}

/// Merge analyzed topics into the archive under `date`.
///
/// Signature duplicates are dropped. A near-duplicate (by title ratio at
/// `threshold`) replaces the existing topic only when the incoming one is
/// newer, so re-runs refresh content without multiplying it.
#[instrument(level = "info", skip_all, fields(date = %date, incoming = incoming.len()))]
pub fn merge_topics(
    archive: &mut NewsArchive,
    date: &str,
    incoming: Vec<NewsTopic>,
    threshold: f64,
) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    let mut signatures = archive_signatures(archive);

    for topic in incoming {
        let topic_signature = topic
            .references
            .first()
            .map(|r| signature(&r.title, &r.url))
            .unwrap_or_else(|| signature(&topic.title, ""));
        if signatures.contains(&topic_signature) {
            outcome.skipped_duplicate += 1;
            continue;
        }

        let day = archive.entry(date.to_string()).or_default();
        let existing_titles: Vec<String> = day.iter().map(|t| t.title.clone()).collect();
        match find_near_duplicate(&topic.title, &existing_titles, threshold) {
            Some((near, _score)) => {
                let index = day
                    .iter()
                    .position(|t| t.title == near)
                    .expect("near-duplicate title came from this list");
                if topic.collected_at > day[index].collected_at {
                    day[index] = topic.clone();
                    outcome.replaced += 1;
                } else {
                    outcome.skipped_duplicate += 1;
                    continue;
                }
            }
            None => {
                day.push(topic.clone());
                outcome.added += 1;
            }
        }
        signatures.insert(topic_signature);
        for reference in &topic.references {
            signatures.insert(signature(&reference.title, &reference.url));
        }
    }

    outcome
}

/// Modification time of a store file, if it exists.
pub fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

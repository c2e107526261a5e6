//! Safe deploy: merge a staged data directory into the live one.
//!
//! Deploys never clobber curation. Manual events in the live store survive,
//! signature and near-duplicate topics collapse instead of multiplying, and
//! a staged directory whose archive is older than the live one is refused
//! outright (`--force` overrides). Overwritten live files are first copied
//! to `<name>.bak`.

use std::path::Path;

use tracing::{info, instrument, warn};

use crate::error::AggregatorError;
use crate::models::{CommentStore, Event, EventSource};
use crate::store::{self, file_mtime, merge_topics, JsonStore};

/// Options for one deploy run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// Compute and report the merge without writing anything.
    pub dry_run: bool,
    /// Deploy even when the staged archive is older than the live one.
    pub force: bool,
}

/// Summary of a completed (or dry-run) deploy.
#[derive(Debug, Default)]
pub struct DeployReport {
    pub topics_added: usize,
    pub topics_replaced: usize,
    pub topics_skipped: usize,
    pub events_total: usize,
    pub manual_events_kept: usize,
    pub comment_threads: usize,
    pub processed_urls: usize,
}

/// Merge `incoming` into `live`.
///
/// # Errors
///
/// Returns [`AggregatorError::StaleDeploy`] when the staged archive is older
/// than the live one and `force` is not set.
#[instrument(level = "info", skip_all, fields(incoming = %incoming.display(), live = %live.display()))]
pub async fn safe_deploy(
    incoming: &Path,
    live: &Path,
    similarity_threshold: f64,
    options: DeployOptions,
) -> Result<DeployReport, AggregatorError> {
    let incoming_store = JsonStore::new(incoming);
    let live_store = JsonStore::new(live);

    // Staleness guard on the archive file itself.
    let incoming_mtime = file_mtime(&incoming_store.path(store::NEWS_FILE));
    let live_mtime = file_mtime(&live_store.path(store::NEWS_FILE));
    if let (Some(incoming_at), Some(live_at)) = (incoming_mtime, live_mtime) {
        if incoming_at < live_at && !options.force {
            return Err(AggregatorError::StaleDeploy(format!(
                "staged {} is older than the live copy; re-stage or pass --force",
                store::NEWS_FILE
            )));
        }
    }

    let mut report = DeployReport::default();

    // ---- News archive ----
    let mut archive = live_store.load_archive().await?;
    let staged_archive = incoming_store.load_archive().await?;
    for (date, topics) in staged_archive {
        let outcome = merge_topics(&mut archive, &date, topics, similarity_threshold);
        report.topics_added += outcome.added;
        report.topics_replaced += outcome.replaced;
        report.topics_skipped += outcome.skipped_duplicate;
    }

    // ---- Events: live manual entries always survive ----
    let live_events = live_store.load_events().await?;
    let staged_events = incoming_store.load_events().await?;
    let events = merge_events(live_events, staged_events);
    report.manual_events_kept = events
        .iter()
        .filter(|e| e.source == EventSource::Manual)
        .count();
    report.events_total = events.len();

    // ---- Comments: per-thread union ----
    let mut comments = live_store.load_comments().await?;
    let staged_comments = incoming_store.load_comments().await?;
    merge_comments(&mut comments, staged_comments);
    report.comment_threads = comments.len();

    // ---- Processed URLs: set union ----
    let mut processed = live_store.load_processed().await?;
    processed.extend(incoming_store.load_processed().await?);
    report.processed_urls = processed.len();

    // ---- Stats and panels: newer snapshot wins ----
    let live_stats = live_store.load_stats().await?;
    let staged_stats = incoming_store.load_stats().await?;
    let stats = if staged_stats.last_run_at > live_stats.last_run_at {
        staged_stats
    } else {
        live_stats
    };

    let live_panels = live_store.load_panels().await?;
    let staged_panels = incoming_store.load_panels().await?;
    let panels = if staged_panels.fetched_at > live_panels.fetched_at {
        staged_panels
    } else {
        live_panels
    };

    if options.dry_run {
        info!(?report, "Dry run; nothing written");
        return Ok(report);
    }

    backup_live_files(&live_store).await;
    live_store.save_archive(&archive).await?;
    live_store.save_events(&events).await?;
    live_store.save_comments(&comments).await?;
    live_store.save_processed(&processed).await?;
    live_store.save_stats(&stats).await?;
    live_store.save_panels(&panels).await?;

    info!(?report, "Deploy complete");
    Ok(report)
}

/// Live manual events always survive; staged events fill in the rest.
/// Duplicate (title, date) pairs collapse, first writer wins.
fn merge_events(live: Vec<Event>, staged: Vec<Event>) -> Vec<Event> {
    let mut merged: Vec<Event> = Vec::new();
    let mut seen: std::collections::BTreeSet<(String, String)> = std::collections::BTreeSet::new();

    let manual_first = live
        .into_iter()
        .filter(|e| e.source == EventSource::Manual)
        .chain(staged);

    for event in manual_first {
        let key = (event.title.clone(), event.date.clone());
        if seen.insert(key) {
            merged.push(event);
        }
    }
    merged
}

fn merge_comments(live: &mut CommentStore, staged: CommentStore) {
    for (digest, staged_thread) in staged {
        let thread = live.entry(digest).or_default();
        for comment in staged_thread {
            if !thread.contains(&comment) {
                thread.push(comment);
            }
        }
    }
}

async fn backup_live_files(live: &JsonStore) {
    for file in [
        store::NEWS_FILE,
        store::EVENTS_FILE,
        store::COMMENTS_FILE,
        store::PROCESSED_FILE,
        store::STATS_FILE,
        store::PANELS_FILE,
    ] {
        let path = live.path(file);
        if path.exists() {
            let backup = live.path(&format!("{file}.bak"));
            if let Err(e) = tokio::fs::copy(&path, &backup).await {
                warn!(file, error = %e, "Backup copy failed; continuing");
            }
        }
    }
}

//! Feed sources for the aggregation batch.
//!
//! Each configured feed goes through the same two-phase pattern:
//!
//! 1. **Indexing**: fetch and parse the feed into [`FeedItem`]s
//! 2. **Enrichment**: fetch the article page for text and a lead image
//!
//! A feed that is down or malformed is logged and skipped; one broken
//! endpoint never fails the whole batch.

use futures::stream::{self, StreamExt};
use tracing::{error, info, instrument};

use crate::config::FeedConfig;
use crate::models::FeedItem;

pub mod page;
pub mod rss;

/// Pull items from every configured feed, tolerating per-feed failure.
#[instrument(level = "info", skip_all)]
pub async fn collect_items(feeds: &[FeedConfig]) -> Vec<FeedItem> {
    let items: Vec<Vec<FeedItem>> = stream::iter(feeds)
        .then(|feed| async move {
            match rss::fetch_feed(feed).await {
                Ok(items) => {
                    info!(feed = %feed.name, count = items.len(), "Indexed feed");
                    items
                }
                Err(e) => {
                    error!(feed = %feed.name, error = %e, "Feed fetch failed; skipping");
                    Vec::new()
                }
            }
        })
        .collect()
        .await;

    let items: Vec<FeedItem> = items.into_iter().flatten().collect();
    info!(count = items.len(), "Collected feed items");
    items
}

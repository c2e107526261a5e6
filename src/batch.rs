//! The aggregation batch job.
//!
//! One invocation runs the whole pipeline to completion:
//!
//! 1. pull items from every configured feed
//! 2. drop seen URLs, archive signature matches, and near-duplicate titles
//! 3. enrich survivors with article text and a lead image
//! 4. analyze concurrently through the model
//! 5. merge successes into today's archive entry and persist
//!
//! A URL only enters the processed seen-set if its analysis produced output,
//! so failed items are retried on the next run.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use itertools::Itertools;
use tracing::{debug, error, info, instrument, warn};

use crate::api::{analysis_prompt, strip_code_fence, AskAsync, TopicAnalysis};
use crate::config::AppConfig;
use crate::dedup::{find_near_duplicate, normalize_title, signature};
use crate::error::AggregatorError;
use crate::models::{BatchStats, FeedItem, NewsTopic, Reference};
use crate::panels::{self, PanelKeys};
use crate::sources::{self, page};
use crate::store::{archive_signatures, merge_topics, recent_titles, JsonStore};
use crate::utils::{looks_truncated, truncate_for_log};

/// Run the full aggregation pipeline once.
#[instrument(level = "info", skip_all)]
pub async fn run_batch<C>(
    store: &JsonStore,
    config: &AppConfig,
    client: &C,
    keys: Option<&PanelKeys>,
) -> Result<BatchStats, AggregatorError>
where
    C: AskAsync + Clone + Sync,
{
    let start = Instant::now();
    let mut stats = BatchStats::default();

    // ---- Index feeds ----
    let items = sources::collect_items(&config.feeds).await;
    for (source, chunk) in &items.iter().chunk_by(|item| item.source.clone()) {
        stats
            .fetched_per_feed
            .insert(source, chunk.count());
    }

    // ---- Dedup against the store and within the batch ----
    let archive = store.load_archive().await?;
    let processed = store.load_processed().await?;
    let signatures = archive_signatures(&archive);
    let mut recent = recent_titles(&archive, config.recent_days);

    let mut fresh: Vec<FeedItem> = Vec::new();
    for item in items {
        if processed.contains(&item.url) {
            stats.skipped_seen += 1;
            continue;
        }
        if signatures.contains(&signature(&item.title, &item.url)) {
            stats.skipped_seen += 1;
            continue;
        }
        if let Some((near, score)) =
            find_near_duplicate(&item.title, &recent, config.similarity_threshold)
        {
            debug!(
                title = %item.title,
                near = %near,
                score,
                "Skipping near-duplicate title"
            );
            stats.skipped_similar += 1;
            continue;
        }
        recent.push(normalize_title(&item.title));
        fresh.push(item);
    }
    info!(
        fresh = fresh.len(),
        skipped_seen = stats.skipped_seen,
        skipped_similar = stats.skipped_similar,
        "Dedup complete"
    );

    // ---- Analyze in parallel ----
    let total = fresh.len();
    let config = Arc::new(config.clone());
    let results: Vec<Option<NewsTopic>> = stream::iter(fresh.into_iter().enumerate())
        .map(|(i, item)| {
            let config = Arc::clone(&config);
            let client = client.clone();
            async move {
                debug!(index = i, source = %item.source, "Analyzing item");
                analyze_item(&client, &config, item).await
            }
        })
        .buffer_unordered(config.analysis_batch_size.max(1))
        .collect()
        .await;

    let analyzed: Vec<NewsTopic> = results.into_iter().flatten().collect();
    stats.analyzed = analyzed.len();
    stats.failed = total - analyzed.len();
    info!(
        total,
        successful = stats.analyzed,
        failed = stats.failed,
        "Completed parallel analysis"
    );

    // ---- Merge and persist ----
    let mut archive = archive;
    let mut processed = processed;
    let today = Utc::now().date_naive().to_string();
    let analyzed_urls: BTreeSet<String> = analyzed
        .iter()
        .flat_map(|topic| topic.references.iter().map(|r| r.url.clone()))
        .collect();
    let outcome = merge_topics(&mut archive, &today, analyzed, config.similarity_threshold);
    info!(
        added = outcome.added,
        replaced = outcome.replaced,
        skipped = outcome.skipped_duplicate,
        "Merged topics into archive"
    );

    // Only URLs that produced output become "processed" (failures retry).
    processed.extend(analyzed_urls);

    store.save_archive(&archive).await?;
    store.save_processed(&processed).await?;

    // ---- Side panels ----
    if let Some(keys) = keys {
        let previous = store.load_panels().await?;
        let panels = panels::refresh_if_stale(previous, &config, keys).await;
        store.save_panels(&panels).await?;
    }

    stats.last_run_at = Some(Utc::now());
    stats.duration_secs = start.elapsed().as_secs();
    store.save_stats(&stats).await?;

    info!(
        duration_secs = stats.duration_secs,
        analyzed = stats.analyzed,
        "Batch run complete"
    );
    Ok(stats)
}

/// Analyze one feed item: enrich from the article page, ask the model, and
/// parse its JSON. Returns `None` when the item should be skipped (the URL
/// then stays out of the seen-set).
async fn analyze_item<C>(client: &C, config: &AppConfig, item: FeedItem) -> Option<NewsTopic>
where
    C: AskAsync,
{
    let extract = match page::fetch_extract(&item.url).await {
        Ok(extract) => extract,
        Err(e) => {
            warn!(url = %item.url, error = %e, "Page fetch failed; using feed description");
            page::PageExtract::default()
        }
    };

    let prompt = analysis_prompt(&item, &extract.text, &config.categories);
    let response = match client.ask(&prompt).await {
        Ok(response) => response,
        Err(e) => {
            error!(url = %item.url, error = %e, "Analysis call failed; skipping item");
            return None;
        }
    };

    let mut parsed =
        serde_json::from_str::<TopicAnalysis>(strip_code_fence(&response));

    // If the parse failed due to EOF (truncation), re-ask ONCE
    if let Err(ref e) = parsed {
        if looks_truncated(e) {
            warn!(url = %item.url, error = %e, "EOF while parsing; re-asking once");
            match client.ask(&prompt).await {
                Ok(second) => {
                    parsed = serde_json::from_str::<TopicAnalysis>(strip_code_fence(&second));
                }
                Err(e2) => {
                    warn!(url = %item.url, error = %e2, "Re-ask failed; will skip item");
                }
            }
        }
    }

    match parsed {
        Ok(analysis) => Some(build_topic(config, &item, extract.image_url, analysis)),
        Err(e) => {
            warn!(
                url = %item.url,
                error = %e,
                response_preview = %truncate_for_log(&response, 300),
                "Model returned non-conforming JSON; skipping item"
            );
            None
        }
    }
}

fn build_topic(
    config: &AppConfig,
    item: &FeedItem,
    image_url: Option<String>,
    analysis: TopicAnalysis,
) -> NewsTopic {
    let tags = analysis
        .tags
        .into_iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .unique()
        .take(5)
        .collect();

    NewsTopic {
        title: analysis.title.trim().to_string(),
        summary: analysis.summary.trim().to_string(),
        category: config.clamp_category(&analysis.category),
        collected_at: Utc::now(),
        image_url,
        full_translated: analysis
            .full_translation
            .filter(|t| !t.trim().is_empty()),
        tags,
        references: vec![Reference {
            title: item.title.clone(),
            url: item.url.clone(),
            source: item.source.clone(),
        }],
        hidden: false,
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::{FeedConfig, FeedKind};

    /// Stub model that always answers with the same JSON.
    #[derive(Clone)]
    struct FixedModel(&'static str);

    impl AskAsync for FixedModel {
        async fn ask(&self, _text: &str) -> Result<String, AggregatorError> {
            Ok(self.0.to_string())
        }
    }

    /// Stub model that always fails.
    #[derive(Clone)]
    struct BrokenModel;

    impl AskAsync for BrokenModel {
        async fn ask(&self, _text: &str) -> Result<String, AggregatorError> {
            Err(AggregatorError::Gemini("boom".to_string()))
        }
    }

    const MODEL_JSON: &str = r#"{
        "title": "สนามบินภูเก็ตเปิดอีกครั้ง",
        "summary": "สรุปข่าวการเปิดสนามบิน",
        "category": "ท่องเที่ยว",
        "full_translation": "คำแปลฉบับเต็ม",
        "tags": ["phuket", "airport", "PHUKET"]
    }"#;

    fn temp_store(tag: &str) -> JsonStore {
        let dir = std::env::temp_dir().join(format!(
            "sawasdee_batch_test_{}_{}",
            std::process::id(),
            tag
        ));
        let _ = std::fs::remove_dir_all(&dir);
        JsonStore::new(dir)
    }

    async fn mock_feed_server(items: &[(&str, &str)]) -> MockServer {
        let mock = MockServer::start().await;
        let entries: String = items
            .iter()
            .map(|(title, link)| {
                format!(
                    "<item><title>{title}</title><link>{}{link}</link></item>",
                    mock.uri()
                )
            })
            .collect();
        let xml = format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel>{entries}</channel></rss>"#
        );
        Mock::given(method("GET"))
            .and(path("/feed.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(xml, "application/xml"))
            .mount(&mock)
            .await;
        // Article pages 404; the pipeline falls back to the description.
        mock
    }

    fn test_config(mock: &MockServer) -> AppConfig {
        AppConfig {
            feeds: vec![FeedConfig {
                name: "Mock Feed".to_string(),
                url: format!("{}/feed.xml", mock.uri()),
                kind: FeedKind::Rss,
            }],
            analysis_batch_size: 2,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn batch_merges_analyzed_items_and_marks_processed() {
        let mock = mock_feed_server(&[("Phuket airport reopens", "/a")]).await;
        let store = temp_store("merges");
        let config = test_config(&mock);

        let stats = run_batch(&store, &config, &FixedModel(MODEL_JSON), None)
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 1);
        assert_eq!(stats.failed, 0);
        let archive = store.load_archive().await.unwrap();
        let today = Utc::now().date_naive().to_string();
        assert_eq!(archive[&today].len(), 1);
        let topic = &archive[&today][0];
        assert_eq!(topic.category, "ท่องเที่ยว");
        // tags lowercased and deduped
        assert_eq!(topic.tags, vec!["phuket", "airport"]);
        assert_eq!(topic.references[0].title, "Phuket airport reopens");

        let processed = store.load_processed().await.unwrap();
        assert_eq!(processed.len(), 1);
        let _ = std::fs::remove_dir_all(store.data_dir());
    }

    #[tokio::test]
    async fn failed_analysis_leaves_url_unprocessed() {
        let mock = mock_feed_server(&[("Phuket airport reopens", "/a")]).await;
        let store = temp_store("failures");
        let config = test_config(&mock);

        let stats = run_batch(&store, &config, &BrokenModel, None)
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 0);
        assert_eq!(stats.failed, 1);
        assert!(store.load_processed().await.unwrap().is_empty());
        assert!(store.load_archive().await.unwrap().is_empty());
        let _ = std::fs::remove_dir_all(store.data_dir());
    }

    #[tokio::test]
    async fn second_run_skips_seen_urls() {
        let mock = mock_feed_server(&[("Phuket airport reopens", "/a")]).await;
        let store = temp_store("seen");
        let config = test_config(&mock);
        let model = FixedModel(MODEL_JSON);

        run_batch(&store, &config, &model, None)
            .await
            .unwrap();
        let stats = run_batch(&store, &config, &model, None)
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 0);
        assert_eq!(stats.skipped_seen, 1);
        let archive = store.load_archive().await.unwrap();
        let today = Utc::now().date_naive().to_string();
        assert_eq!(archive[&today].len(), 1);
        let _ = std::fs::remove_dir_all(store.data_dir());
    }

    #[tokio::test]
    async fn near_duplicate_titles_are_filtered_within_a_batch() {
        let mock = mock_feed_server(&[
            ("Phuket airport reopens after flooding", "/a"),
            ("Phuket airport reopens after flood", "/b"),
        ])
        .await;
        let store = temp_store("similar");
        let config = test_config(&mock);

        let stats = run_batch(&store, &config, &FixedModel(MODEL_JSON), None)
            .await
            .unwrap();

        assert_eq!(stats.skipped_similar, 1);
        assert_eq!(stats.analyzed, 1);
        let _ = std::fs::remove_dir_all(store.data_dir());
    }

    #[tokio::test]
    async fn malformed_model_output_counts_as_failure() {
        let mock = mock_feed_server(&[("Phuket airport reopens", "/a")]).await;
        let store = temp_store("malformed");
        let config = test_config(&mock);

        let stats = run_batch(
            &store,
            &config,
            &FixedModel("this is not json at all"),
            None,
        )
        .await
        .unwrap();

        assert_eq!(stats.analyzed, 0);
        assert_eq!(stats.failed, 1);
        let _ = std::fs::remove_dir_all(store.data_dir());
    }

    #[tokio::test]
    async fn fenced_model_output_is_accepted() {
        let mock = mock_feed_server(&[("Phuket airport reopens", "/a")]).await;
        let store = temp_store("fenced");
        let config = test_config(&mock);
        let fenced: &'static str = "```json\n{\"title\": \"หัวข้อ\", \"summary\": \"สรุป\", \"category\": \"อาหาร\"}\n```";

        let stats = run_batch(&store, &config, &FixedModel(fenced), None)
            .await
            .unwrap();

        assert_eq!(stats.analyzed, 1);
        let _ = std::fs::remove_dir_all(store.data_dir());
    }
}

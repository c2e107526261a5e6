//! Application configuration.
//!
//! The config is itself one of the JSON documents in the data directory
//! (`config.json`) so the admin console can edit it. A missing file yields
//! the built-in Thai news/travel defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AggregatorError;

pub const CONFIG_FILE: &str = "config.json";

/// How a configured feed is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Plain RSS/Atom endpoint, fetched as-is.
    Rss,
    /// Google News search feed; `url` holds the query string.
    GoogleNews,
}

/// One syndication source polled by the batch job.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedConfig {
    pub name: String,
    /// Feed URL, or the search query for [`FeedKind::GoogleNews`].
    pub url: String,
    #[serde(default = "default_feed_kind")]
    pub kind: FeedKind,
}

fn default_feed_kind() -> FeedKind {
    FeedKind::Rss
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedConfig>,
    /// Categories the model may assign. Anything else is coerced to the last
    /// entry (the catch-all).
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,
    /// Near-duplicate similarity threshold on normalized titles.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Hours after which cached panels and deployed data count as stale.
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: i64,
    /// How many analysis calls run concurrently.
    #[serde(default = "default_analysis_batch_size")]
    pub analysis_batch_size: usize,
    /// Days of archive titles consulted by the near-duplicate filter.
    #[serde(default = "default_recent_days")]
    pub recent_days: i64,
    /// WAQI city slug for the air-quality panel.
    #[serde(default = "default_aqi_city")]
    pub aqi_city: String,
    /// Currencies shown on the exchange panel, quoted against THB.
    #[serde(default = "default_currencies")]
    pub currencies: Vec<String>,
    #[serde(default = "default_gemini_model")]
    pub gemini_model: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            feeds: default_feeds(),
            categories: default_categories(),
            similarity_threshold: default_similarity_threshold(),
            staleness_hours: default_staleness_hours(),
            analysis_batch_size: default_analysis_batch_size(),
            recent_days: default_recent_days(),
            aqi_city: default_aqi_city(),
            currencies: default_currencies(),
            gemini_model: default_gemini_model(),
            bind_addr: default_bind_addr(),
        }
    }
}

fn default_feeds() -> Vec<FeedConfig> {
    vec![
        FeedConfig {
            name: "Bangkok Post".to_string(),
            url: "https://www.bangkokpost.com/rss/data/topstories.xml".to_string(),
            kind: FeedKind::Rss,
        },
        FeedConfig {
            name: "Thai PBS World".to_string(),
            url: "https://www.thaipbsworld.com/feed/".to_string(),
            kind: FeedKind::Rss,
        },
        FeedConfig {
            name: "Google News Thailand Travel".to_string(),
            url: "thailand travel".to_string(),
            kind: FeedKind::GoogleNews,
        },
    ]
}

fn default_categories() -> Vec<String> {
    [
        "ท่องเที่ยว",
        "อาหาร",
        "วัฒนธรรม",
        "เศรษฐกิจ",
        "ข่าวทั่วไป",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_staleness_hours() -> i64 {
    24
}

fn default_analysis_batch_size() -> usize {
    4
}

fn default_recent_days() -> i64 {
    7
}

fn default_aqi_city() -> String {
    "bangkok".to_string()
}

fn default_currencies() -> Vec<String> {
    ["USD", "EUR", "JPY", "CNY", "KRW"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_bind_addr() -> String {
    "127.0.0.1:8060".to_string()
}

impl AppConfig {
    /// Load `config.json` from the data directory, falling back to defaults
    /// when the file does not exist.
    pub async fn load(data_dir: &Path) -> Result<Self, AggregatorError> {
        let path = data_dir.join(CONFIG_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let config = serde_json::from_slice(&bytes)?;
                info!(path = %path.display(), "Loaded configuration");
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "No config file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the config back to the data directory (admin console edits).
    pub async fn save(&self, data_dir: &Path) -> Result<(), AggregatorError> {
        let path = data_dir.join(CONFIG_FILE);
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(&path, json).await?;
        info!(path = %path.display(), "Saved configuration");
        Ok(())
    }

    /// Coerce a model-assigned category onto the configured list. Unknown
    /// categories land in the final catch-all entry.
    pub fn clamp_category(&self, category: &str) -> String {
        let trimmed = category.trim();
        if self.categories.iter().any(|c| c == trimmed) {
            trimmed.to_string()
        } else {
            self.categories
                .last()
                .cloned()
                .unwrap_or_else(|| trimmed.to_string())
        }
    }
}

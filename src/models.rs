//! Data models for aggregated news topics, events, comments, and panels.
//!
//! This module defines the records persisted in the flat-file store:
//! - [`FeedItem`]: a raw entry pulled from an RSS/Atom feed
//! - [`NewsTopic`]: an analyzed topic as it appears on the dashboard
//! - [`Event`] / [`Comment`]: curated travel events and reader comments
//! - [`PanelReport`] / [`BatchStats`]: dashboard side panels and run stats
//!
//! None of these enforce referential integrity; topics are keyed by ISO date
//! inside [`NewsArchive`], and comments hang off a digest of the topic title.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// News archive as stored in `news.json`: topics grouped under the ISO date
/// (`YYYY-MM-DD`) they were collected on.
pub type NewsArchive = BTreeMap<String, Vec<NewsTopic>>;

/// A raw feed entry before dedup and analysis.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeedItem {
    /// Headline as published by the feed.
    pub title: String,
    /// Canonical article URL.
    pub url: String,
    /// Name of the feed this item came from (config `name`).
    pub source: String,
    /// Publication timestamp as given by the feed, verbatim.
    #[serde(default)]
    pub published: Option<String>,
    /// Plain-text description/teaser, HTML already stripped.
    #[serde(default)]
    pub description: String,
}

/// A fully analyzed news topic as rendered on the dashboard.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NewsTopic {
    /// Topic title in Thai, as produced by the model.
    pub title: String,
    /// Short Thai summary.
    pub summary: String,
    /// One of the configured categories.
    pub category: String,
    /// When the batch collected this topic.
    pub collected_at: DateTime<Utc>,
    /// Lead image extracted from the article page, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Full Thai translation of the article body, if the model produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_translated: Option<String>,
    /// Topic tags assigned by the model.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Source articles backing this topic.
    #[serde(default)]
    pub references: Vec<Reference>,
    /// Hidden topics stay in the archive but are not served publicly.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
}

/// A source article backing a [`NewsTopic`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Reference {
    /// Original headline.
    pub title: String,
    /// Article URL.
    pub url: String,
    /// Feed name the article came from.
    pub source: String,
}

/// Where an [`Event`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    /// Entered by hand in the admin console. Never overwritten by a deploy.
    Manual,
    /// Collected by the batch job or staged data. Replaced wholesale on deploy.
    Auto,
}

/// A travel event or festival shown on the dashboard.
///
/// Dates are free text because upstream sources publish ranges like
/// `"2026-11-03 ~ 2026-11-05"` and Thai-calendar spellings we do not parse.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Event {
    pub title: String,
    /// Free-text date, possibly a `~` range.
    pub date: String,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub booking_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    /// Free-text status, e.g. "upcoming", "on sale", "ended".
    pub status: String,
    pub source: EventSource,
    /// Featured events replace the original big-event file.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub featured: bool,
    /// Geocoded location, attached when a maps key is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place: Option<Place>,
}

/// Geocoding result attached to an event location.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Place {
    pub lat: f64,
    pub lng: f64,
    pub formatted_address: String,
}

/// A reader comment. Threads are keyed by a digest of the topic title, not by
/// any enforced foreign key; see [`crate::dedup::title_digest`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Comment {
    pub user: String,
    pub text: String,
    /// Submission date as an ISO date-time string.
    pub date: String,
}

/// Comment threads as stored in `comments.json`.
pub type CommentStore = BTreeMap<String, Vec<Comment>>;

/// Statistics for the most recent batch run, stored in `stats.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BatchStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_secs: u64,
    /// Items pulled per feed, before any filtering.
    #[serde(default)]
    pub fetched_per_feed: BTreeMap<String, usize>,
    #[serde(default)]
    pub analyzed: usize,
    #[serde(default)]
    pub skipped_seen: usize,
    #[serde(default)]
    pub skipped_similar: usize,
    #[serde(default)]
    pub failed: usize,
}

/// Dashboard side panels, stored in `panels.json`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PanelReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub air_quality: Option<AirQuality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_rates: Option<ExchangeRates>,
    /// When the panels were last refreshed; drives the staleness window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<DateTime<Utc>>,
}

/// Air-quality snapshot from WAQI.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AirQuality {
    pub city: String,
    pub aqi: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_pollutant: Option<String>,
}

/// Exchange-rate snapshot, THB per unit of each listed currency.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExchangeRates {
    pub base: String,
    pub thb_per_unit: BTreeMap<String, f64>,
}

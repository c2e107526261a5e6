//! Gemini API interaction with exponential backoff retry logic.
//!
//! # Architecture
//!
//! - [`AskAsync`]: core trait defining async model interaction
//! - [`GeminiClient`]: talks to the `generateContent` REST endpoint
//! - [`RetryAsk`]: decorator that adds retry logic to any `AskAsync`
//!
//! # Retry Strategy
//!
//! - Maximum 5 retry attempts
//! - Exponential backoff starting at 1 second
//! - Maximum delay capped at 30 seconds
//! - Random jitter (0-250ms) added to prevent thundering herd

use std::fmt;
use std::time::{Duration as StdDuration, Instant};

use rand::{rng, Rng};
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

use crate::error::AggregatorError;
use crate::models::FeedItem;

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Trait for async model interaction.
///
/// Implementors send text to a generative model and receive a response.
/// The abstraction exists so decorators (like retry logic) and test doubles
/// can wrap the real client.
pub trait AskAsync {
    /// Send text to the model and receive its raw text response.
    async fn ask(&self, text: &str) -> Result<String, AggregatorError>;
}

/// Wrapper that adds exponential backoff retry logic to any [`AskAsync`].
///
/// The delay between retries follows:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..250ms)
/// ```
#[derive(Clone)]
pub struct RetryAsk<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
}

impl<T> RetryAsk<T>
where
    T: AskAsync,
{
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
        }
    }
}

impl<T> fmt::Debug for RetryAsk<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryAsk")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> AskAsync for RetryAsk<T>
where
    T: AskAsync,
{
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<String, AggregatorError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.ask(text).await {
                Ok(resp) => {
                    return Ok(resp);
                }
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                            elapsed_ms_total = total_dt.as_millis() as u128,
                            error = %e,
                            "ask() exhausted retries"
                        );
                        return Err(e);
                    }

                    // backoff calc
                    let mut delay = self.base_delay.saturating_mul(1 << (attempt - 1));
                    if delay > self.max_delay {
                        delay = self.max_delay;
                    }
                    let jitter_ms: u64 = rng().random_range(0..=250);
                    let delay = delay + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                        elapsed_ms_total = total_dt.as_millis() as u128,
                        ?delay,
                        error = %e,
                        "ask() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: String,
}

/// Client for the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE.to_string(),
        }
    }

    /// Point the client at a different endpoint. Tests use this to talk to a
    /// mock server.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl AskAsync for GeminiClient {
    #[instrument(level = "info", skip_all)]
    async fn ask(&self, text: &str) -> Result<String, AggregatorError> {
        let url = format!(
            "{}/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            }],
        };

        let t0 = Instant::now();
        let response = crate::sources::rss::CLIENT.post(&url).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                elapsed_ms = t0.elapsed().as_millis() as u128,
                "Gemini call failed"
            );
            return Err(AggregatorError::Gemini(format!(
                "HTTP {}: {}",
                status.as_u16(),
                crate::utils::truncate_for_log(&body, 200)
            )));
        }

        let parsed: GenerateResponse = response.json().await?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| AggregatorError::Gemini("no candidates in response".to_string()))?;
        Ok(text)
    }
}

/// Model output for one analyzed topic, as requested by [`analysis_prompt`].
#[derive(Debug, Deserialize)]
pub struct TopicAnalysis {
    pub title: String,
    pub summary: String,
    pub category: String,
    #[serde(default)]
    pub full_translation: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Build the strict-JSON analysis prompt for one article.
pub fn analysis_prompt(item: &FeedItem, body: &str, categories: &[String]) -> String {
    let body = if body.is_empty() {
        &item.description
    } else {
        body
    };
    format!(
        "You are the editor of a Thai news and travel digest. Read the article \
below and respond with ONLY a JSON object, no prose and no markdown fence, \
with these fields:\n\
  \"title\": concise Thai headline\n\
  \"summary\": 2-3 sentence Thai summary\n\
  \"category\": exactly one of [{categories}]\n\
  \"full_translation\": full Thai translation of the article body\n\
  \"tags\": up to 5 lowercase tags\n\n\
Original headline: {title}\n\
Source: {source}\n\n\
Article:\n{body}",
        categories = categories
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", "),
        title = item.title,
        source = item.source,
    )
}

/// Strip a markdown code fence from a model response, if present.
///
/// Gemini routinely wraps JSON in ```json fences despite instructions.
pub fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

/// Wrap a model client with the production retry policy: up to 5 attempts
/// with a 1 second base delay. The batch job composes this once at startup.
pub fn with_backoff<C: AskAsync>(client: C) -> RetryAsk<C> {
    RetryAsk::new(client, 5, StdDuration::from_secs(1))
}

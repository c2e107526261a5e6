//! Admin console routes: manual curation behind a bearer token.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header::AUTHORIZATION, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::api::{with_backoff, GeminiClient};
use crate::batch::run_batch;
use crate::config::AppConfig;
use crate::models::Event;
use crate::panels;

use super::{ApiError, AppState};

/// Admin bearer-token settings. A missing token disables the console rather
/// than leaving it open.
#[derive(Clone)]
pub struct AdminAuth {
    token: Option<Arc<String>>,
}

impl AdminAuth {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.trim().is_empty()).map(Arc::new),
        }
    }

    /// Read the token from `SAWASDEE_ADMIN_TOKEN`.
    pub fn from_env() -> Self {
        let auth = Self::new(std::env::var("SAWASDEE_ADMIN_TOKEN").ok());
        if auth.token.is_none() {
            warn!("SAWASDEE_ADMIN_TOKEN not set; admin console disabled");
        }
        auth
    }

    fn allows(&self, token: &str) -> Option<bool> {
        self.token.as_deref().map(|expected| expected == token)
    }
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}

/// Middleware guarding the admin routes.
pub(super) async fn require_bearer_auth(
    State(auth): State<AdminAuth>,
    req: Request,
    next: Next,
) -> Response {
    if auth.token.is_none() {
        return ApiError::new("admin_disabled", "no admin token configured").into_response();
    }

    match extract_bearer_token(req.headers().get(AUTHORIZATION)) {
        Some(token) if auth.allows(token) == Some(true) => next.run(req).await,
        _ => ApiError::new("unauthorized", "missing or invalid bearer token").into_response(),
    }
}

#[derive(Debug, Serialize)]
pub(super) struct RefreshAccepted {
    status: &'static str,
}

/// `POST /api/v1/admin/refresh`: run the batch in the background.
pub(super) async fn trigger_refresh(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(api_key) = state.gemini_api_key.clone() else {
        return Err(ApiError::new(
            "validation_error",
            "no Gemini API key configured; refresh unavailable",
        ));
    };

    if state
        .refresh_running
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(ApiError::new("conflict", "a refresh is already running"));
    }

    let config = state.config.read().await.clone();
    let model = with_backoff(GeminiClient::new(api_key, config.gemini_model.clone()));
    tokio::spawn(async move {
        info!("Admin-triggered refresh starting");
        let result = run_batch(&state.store, &config, &model, Some(&state.keys)).await;
        match result {
            Ok(stats) => info!(analyzed = stats.analyzed, "Admin-triggered refresh finished"),
            Err(e) => error!(error = %e, "Admin-triggered refresh failed"),
        }
        state.refresh_running.store(false, Ordering::SeqCst);
    });

    Ok((StatusCode::ACCEPTED, Json(RefreshAccepted { status: "accepted" })))
}

fn validate_event(event: &Event) -> Result<(), ApiError> {
    if event.title.trim().is_empty() || event.date.trim().is_empty() {
        return Err(ApiError::new(
            "validation_error",
            "event title and date must be non-empty",
        ));
    }
    Ok(())
}

/// `POST /api/v1/admin/events`
pub(super) async fn create_event(
    State(state): State<AppState>,
    Json(mut event): Json<Event>,
) -> Result<impl IntoResponse, ApiError> {
    validate_event(&event)?;

    // Attach a geocoded place when a maps key is configured.
    if event.place.is_none() && !event.location.trim().is_empty() {
        match panels::lookup_place(&state.keys, &event.location).await {
            Ok(place) => event.place = place,
            Err(e) => warn!(error = %e, "Geocoding failed; storing event without place"),
        }
    }

    let _guard = state.write_lock.lock().await;
    let mut events = state
        .store
        .load_events()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    events.push(event.clone());
    state
        .store
        .save_events(&events)
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok((StatusCode::CREATED, Json(event)))
}

/// `PUT /api/v1/admin/events/{index}`
pub(super) async fn update_event(
    State(state): State<AppState>,
    Path(index): Path<usize>,
    Json(event): Json<Event>,
) -> Result<Json<Event>, ApiError> {
    validate_event(&event)?;

    let _guard = state.write_lock.lock().await;
    let mut events = state
        .store
        .load_events()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let slot = events
        .get_mut(index)
        .ok_or_else(|| ApiError::new("not_found", format!("no event at index {index}")))?;
    *slot = event.clone();
    state
        .store
        .save_events(&events)
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(event))
}

/// `DELETE /api/v1/admin/events/{index}`
pub(super) async fn delete_event(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Result<Json<Event>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let mut events = state
        .store
        .load_events()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    if index >= events.len() {
        return Err(ApiError::new(
            "not_found",
            format!("no event at index {index}"),
        ));
    }
    let removed = events.remove(index);
    state
        .store
        .save_events(&events)
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(removed))
}

/// Partial topic edit: absent fields stay untouched.
#[derive(Debug, Deserialize)]
pub(super) struct TopicPatch {
    title: Option<String>,
    summary: Option<String>,
    category: Option<String>,
    hidden: Option<bool>,
}

/// `PUT /api/v1/admin/topics/{date}/{index}`
pub(super) async fn update_topic(
    State(state): State<AppState>,
    Path((date, index)): Path<(String, usize)>,
    Json(patch): Json<TopicPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.write_lock.lock().await;
    let mut archive = state
        .store
        .load_archive()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let topic = archive
        .get_mut(&date)
        .and_then(|topics| topics.get_mut(index))
        .ok_or_else(|| {
            ApiError::new("not_found", format!("no topic at {date}[{index}]"))
        })?;

    if let Some(title) = patch.title {
        topic.title = title;
    }
    if let Some(summary) = patch.summary {
        topic.summary = summary;
    }
    if let Some(category) = patch.category {
        topic.category = state.config.read().await.clamp_category(&category);
    }
    if let Some(hidden) = patch.hidden {
        topic.hidden = hidden;
    }
    let updated = topic.clone();

    state
        .store
        .save_archive(&archive)
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(updated))
}

/// `DELETE /api/v1/admin/comments/{digest}/{index}`
pub(super) async fn delete_comment(
    State(state): State<AppState>,
    Path((digest, index)): Path<(String, usize)>,
) -> Result<impl IntoResponse, ApiError> {
    let _guard = state.write_lock.lock().await;
    let mut comments = state
        .store
        .load_comments()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let thread = comments
        .get_mut(&digest)
        .filter(|thread| index < thread.len())
        .ok_or_else(|| {
            ApiError::new("not_found", format!("no comment at {digest}[{index}]"))
        })?;
    let removed = thread.remove(index);
    if thread.is_empty() {
        comments.remove(&digest);
    }
    state
        .store
        .save_comments(&comments)
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(removed))
}

/// `GET /api/v1/admin/config`
pub(super) async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
    Json(state.config.read().await.clone())
}

/// `PUT /api/v1/admin/config`
pub(super) async fn put_config(
    State(state): State<AppState>,
    Json(config): Json<AppConfig>,
) -> Result<Json<AppConfig>, ApiError> {
    if config.feeds.is_empty() {
        return Err(ApiError::new("validation_error", "at least one feed required"));
    }
    if !(0.0..=1.0).contains(&config.similarity_threshold) {
        return Err(ApiError::new(
            "validation_error",
            "similarity_threshold must be within [0, 1]",
        ));
    }
    if config.staleness_hours <= 0 {
        return Err(ApiError::new(
            "validation_error",
            "staleness_hours must be positive",
        ));
    }

    let _guard = state.write_lock.lock().await;
    config
        .save(state.store.data_dir())
        .await
        .map_err(|e| ApiError::internal(&e))?;
    *state.config.write().await = config.clone();
    Ok(Json(config))
}

#[derive(Debug, Deserialize)]
pub(super) struct PruneRequest {
    keep: usize,
}

#[derive(Debug, Serialize)]
pub(super) struct PruneResponse {
    removed: usize,
    remaining: usize,
}

/// `POST /api/v1/admin/prune-processed`
///
/// Manual trim for a seen-set that otherwise only grows. The set has no
/// recency order, so which URLs survive is arbitrary; pruning trades storage
/// for the chance of re-analyzing an old article.
pub(super) async fn prune_processed(
    State(state): State<AppState>,
    Json(request): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, ApiError> {
    let _guard = state.write_lock.lock().await;
    let processed = state
        .store
        .load_processed()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let before = processed.len();
    let kept: std::collections::BTreeSet<String> = processed
        .into_iter()
        .rev()
        .take(request.keep)
        .collect();
    state
        .store
        .save_processed(&kept)
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(PruneResponse {
        removed: before - kept.len(),
        remaining: kept.len(),
    }))
}

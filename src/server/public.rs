//! Public dashboard routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::dedup::title_digest;
use crate::models::{Comment, Event, NewsTopic};

use super::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub(super) struct DateSummary {
    date: String,
    topics: usize,
}

/// A topic plus the digest that keys its comment thread.
#[derive(Debug, Serialize)]
pub(super) struct TopicView {
    digest: String,
    #[serde(flatten)]
    topic: NewsTopic,
}

#[derive(Debug, Serialize)]
pub(super) struct Digest {
    date: String,
    topics: Vec<TopicView>,
}

fn visible(topics: &[NewsTopic]) -> Vec<TopicView> {
    topics
        .iter()
        .filter(|t| !t.hidden)
        .map(|t| TopicView {
            digest: title_digest(&t.title),
            topic: t.clone(),
        })
        .collect()
}

/// `GET /api/v1/news`: archive dates with visible topic counts.
pub(super) async fn list_dates(
    State(state): State<AppState>,
) -> Result<Json<Vec<DateSummary>>, ApiError> {
    let archive = state
        .store
        .load_archive()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let dates = archive
        .iter()
        .rev()
        .filter_map(|(date, topics)| {
            let count = topics.iter().filter(|t| !t.hidden).count();
            (count > 0).then(|| DateSummary {
                date: date.clone(),
                topics: count,
            })
        })
        .collect();
    Ok(Json(dates))
}

/// `GET /api/v1/news/latest`: most recent date that has visible topics.
pub(super) async fn latest_digest(
    State(state): State<AppState>,
) -> Result<Json<Digest>, ApiError> {
    let archive = state
        .store
        .load_archive()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    archive
        .iter()
        .rev()
        .find_map(|(date, topics)| {
            let topics = visible(topics);
            (!topics.is_empty()).then(|| Digest {
                date: date.clone(),
                topics,
            })
        })
        .map(Json)
        .ok_or_else(|| ApiError::new("not_found", "no topics collected yet"))
}

/// `GET /api/v1/news/{date}`
pub(super) async fn digest_by_date(
    State(state): State<AppState>,
    Path(date): Path<String>,
) -> Result<Json<Digest>, ApiError> {
    let archive = state
        .store
        .load_archive()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    let topics = archive.get(&date).map(|t| visible(t)).unwrap_or_default();
    if topics.is_empty() {
        return Err(ApiError::new("not_found", format!("no topics for {date}")));
    }
    Ok(Json(Digest { date, topics }))
}

#[derive(Debug, Deserialize)]
pub(super) struct EventsQuery {
    featured: Option<bool>,
}

/// `GET /api/v1/events`
pub(super) async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let mut events = state
        .store
        .load_events()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    if let Some(featured) = query.featured {
        events.retain(|e| e.featured == featured);
    }
    Ok(Json(events))
}

/// `GET /api/v1/comments/{digest}`
pub(super) async fn list_comments(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> Result<Json<Vec<Comment>>, ApiError> {
    let comments = state
        .store
        .load_comments()
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(comments.get(&digest).cloned().unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub(super) struct NewComment {
    user: String,
    text: String,
}

const MAX_USER_CHARS: usize = 64;
const MAX_TEXT_CHARS: usize = 2000;

/// `POST /api/v1/comments/{digest}`
pub(super) async fn create_comment(
    State(state): State<AppState>,
    Path(digest): Path<String>,
    Json(body): Json<NewComment>,
) -> Result<impl IntoResponse, ApiError> {
    let user = body.user.trim();
    let text = body.text.trim();
    if user.is_empty() || text.is_empty() {
        return Err(ApiError::new(
            "validation_error",
            "user and text must be non-empty",
        ));
    }
    if user.chars().count() > MAX_USER_CHARS || text.chars().count() > MAX_TEXT_CHARS {
        return Err(ApiError::new("validation_error", "comment too long"));
    }

    let comment = Comment {
        user: user.to_string(),
        text: text.to_string(),
        date: Utc::now().to_rfc3339(),
    };

    let _guard = state.write_lock.lock().await;
    state
        .store
        .append_comment(&digest, comment.clone())
        .await
        .map_err(|e| ApiError::internal(&e))?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// `GET /api/v1/panels`
pub(super) async fn panels(
    State(state): State<AppState>,
) -> Result<Json<crate::models::PanelReport>, ApiError> {
    state
        .store
        .load_panels()
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(&e))
}

/// `GET /api/v1/stats`
pub(super) async fn stats(
    State(state): State<AppState>,
) -> Result<Json<crate::models::BatchStats>, ApiError> {
    state
        .store
        .load_stats()
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(&e))
}

//! Dashboard HTTP server and admin console.
//!
//! The dashboard is a JSON API over the flat-file store: public routes serve
//! the aggregated content, admin routes (bearer token) curate it. State is
//! re-read from the store per request (the documents are small), and every
//! mutation holds a process-wide write lock before its read-modify-write
//! cycle, then persists immediately.

mod admin;
mod public;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    middleware::from_fn_with_state,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::config::AppConfig;
use crate::panels::PanelKeys;
use crate::store::JsonStore;

pub use admin::AdminAuth;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub store: JsonStore,
    pub config: Arc<RwLock<AppConfig>>,
    pub keys: PanelKeys,
    pub gemini_api_key: Option<String>,
    /// Serializes read-modify-write cycles against the store files.
    pub write_lock: Arc<Mutex<()>>,
    /// Set while a spawned refresh batch is running.
    pub refresh_running: Arc<AtomicBool>,
}

impl AppState {
    pub fn new(
        store: JsonStore,
        config: AppConfig,
        keys: PanelKeys,
        gemini_api_key: Option<String>,
    ) -> Self {
        Self {
            store,
            config: Arc::new(RwLock::new(config)),
            keys,
            gemini_api_key,
            write_lock: Arc::new(Mutex::new(())),
            refresh_running: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn internal(error: &crate::error::AggregatorError) -> Self {
        tracing::error!(%error, "store operation failed");
        Self::new("internal_error", "store operation failed")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.error.code.as_str() {
            "not_found" => StatusCode::NOT_FOUND,
            "unauthorized" => StatusCode::UNAUTHORIZED,
            "admin_disabled" => StatusCode::SERVICE_UNAVAILABLE,
            "bad_request" | "validation_error" => StatusCode::BAD_REQUEST,
            "conflict" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(self)).into_response()
    }
}

fn build_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn admin_router(auth: AdminAuth) -> Router<AppState> {
    Router::new()
        .route("/api/v1/admin/refresh", post(admin::trigger_refresh))
        .route(
            "/api/v1/admin/events",
            post(admin::create_event),
        )
        .route(
            "/api/v1/admin/events/{index}",
            put(admin::update_event).delete(admin::delete_event),
        )
        .route(
            "/api/v1/admin/topics/{date}/{index}",
            put(admin::update_topic),
        )
        .route(
            "/api/v1/admin/comments/{digest}/{index}",
            axum::routing::delete(admin::delete_comment),
        )
        .route(
            "/api/v1/admin/config",
            get(admin::get_config).put(admin::put_config),
        )
        .route(
            "/api/v1/admin/prune-processed",
            post(admin::prune_processed),
        )
        .layer(from_fn_with_state(auth, admin::require_bearer_auth))
}

/// Assemble the full application router.
pub fn build_app(state: AppState, auth: AdminAuth) -> Router {
    let public_routes = Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/news", get(public::list_dates))
        .route("/api/v1/news/latest", get(public::latest_digest))
        .route("/api/v1/news/{date}", get(public::digest_by_date))
        .route("/api/v1/events", get(public::list_events))
        .route(
            "/api/v1/comments/{digest}",
            get(public::list_comments).post(public::create_comment),
        )
        .route("/api/v1/panels", get(public::panels))
        .route("/api/v1/stats", get(public::stats));

    Router::new()
        .merge(public_routes)
        .merge(admin_router(auth))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(build_cors()),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthData {
    status: &'static str,
    data_dir_writable: bool,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let writable = crate::utils::ensure_writable_dir(state.store.data_dir())
        .await
        .is_ok();
    let status = if writable { "ok" } else { "degraded" };
    let code = if writable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(HealthData {
        status,
        data_dir_writable: writable,
    }))
}

/// Bind and serve until ctrl-c / SIGTERM.
pub async fn serve(
    state: AppState,
    auth: AdminAuth,
    bind_addr: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_app(state, auth);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "Dashboard listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl-c");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("received shutdown signal, starting graceful shutdown");
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::Utc;
    use tower::ServiceExt;

    use super::*;
    use crate::models::{Comment, Event, EventSource, NewsArchive, NewsTopic, Reference};

    fn temp_state(tag: &str) -> AppState {
        let dir = std::env::temp_dir().join(format!(
            "sawasdee_server_test_{}_{}",
            std::process::id(),
            tag
        ));
        let _ = std::fs::remove_dir_all(&dir);
        AppState::new(
            JsonStore::new(dir),
            AppConfig::default(),
            PanelKeys::default(),
            None,
        )
    }

    fn topic(title: &str, hidden: bool) -> NewsTopic {
        NewsTopic {
            title: title.to_string(),
            summary: "สรุป".to_string(),
            category: "ท่องเที่ยว".to_string(),
            collected_at: Utc::now(),
            image_url: None,
            full_translated: None,
            tags: vec![],
            references: vec![Reference {
                title: "headline".to_string(),
                url: "https://example.com/a".to_string(),
                source: "feed".to_string(),
            }],
            hidden,
        }
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let state = temp_state("health");
        let app = build_app(state, AdminAuth::new(None));
        let (status, json) = get_json(&app, "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn latest_digest_skips_hidden_topics() {
        let state = temp_state("latest");
        let mut archive = NewsArchive::new();
        archive.insert(
            "2026-08-06".to_string(),
            vec![topic("เห็นได้", false)],
        );
        archive.insert(
            "2026-08-07".to_string(),
            vec![topic("ซ่อนแล้ว", true)],
        );
        state.store.save_archive(&archive).await.unwrap();

        let app = build_app(state, AdminAuth::new(None));
        let (status, json) = get_json(&app, "/api/v1/news/latest").await;
        assert_eq!(status, StatusCode::OK);
        // 2026-08-07 only has a hidden topic, so latest falls back a day
        assert_eq!(json["date"], "2026-08-06");
        assert_eq!(json["topics"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn digest_by_date_404s_on_unknown_date() {
        let state = temp_state("digest404");
        let app = build_app(state, AdminAuth::new(None));
        let (status, json) = get_json(&app, "/api/v1/news/1999-01-01").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"]["code"], "not_found");
    }

    #[tokio::test]
    async fn events_filter_featured() {
        let state = temp_state("events");
        let events = vec![
            Event {
                title: "Loy Krathong".to_string(),
                date: "2026-11-24".to_string(),
                location: "Sukhothai".to_string(),
                booking_date: None,
                price: None,
                status: "upcoming".to_string(),
                source: EventSource::Manual,
                featured: true,
                place: None,
            },
            Event {
                title: "Weekend market".to_string(),
                date: "2026-08-09".to_string(),
                location: "Bangkok".to_string(),
                booking_date: None,
                price: None,
                status: "upcoming".to_string(),
                source: EventSource::Auto,
                featured: false,
                place: None,
            },
        ];
        state.store.save_events(&events).await.unwrap();

        let app = build_app(state, AdminAuth::new(None));
        let (_, all) = get_json(&app, "/api/v1/events").await;
        assert_eq!(all.as_array().unwrap().len(), 2);
        let (_, featured) = get_json(&app, "/api/v1/events?featured=true").await;
        assert_eq!(featured.as_array().unwrap().len(), 1);
        assert_eq!(featured[0]["title"], "Loy Krathong");
    }

    #[tokio::test]
    async fn comment_posting_appends_to_thread() {
        let state = temp_state("comments");
        let app = build_app(state.clone(), AdminAuth::new(None));

        let body = serde_json::json!({"user": "nok", "text": "ไปมาแล้ว"});
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/comments/abcd1234abcd1234")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let (_, comments) = get_json(&app, "/api/v1/comments/abcd1234abcd1234").await;
        assert_eq!(comments.as_array().unwrap().len(), 1);
        assert_eq!(comments[0]["user"], "nok");
    }

    #[tokio::test]
    async fn blank_comments_are_rejected() {
        let state = temp_state("blank_comment");
        let app = build_app(state, AdminAuth::new(None));
        let body = serde_json::json!({"user": "  ", "text": ""});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/comments/abcd1234abcd1234")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn admin_routes_require_bearer_token() {
        let state = temp_state("admin_auth");
        let app = build_app(state, AdminAuth::new(Some("secret".to_string())));

        let unauthorized = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/refresh")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let wrong = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/v1/admin/config")
                    .header("authorization", "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

        let ok = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/v1/admin/config")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn admin_disabled_without_token_configured() {
        let state = temp_state("admin_disabled");
        let app = build_app(state, AdminAuth::new(None));
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/v1/admin/config")
                    .header("authorization", "Bearer anything")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn admin_event_crud_round_trip() {
        let state = temp_state("event_crud");
        let app = build_app(state.clone(), AdminAuth::new(Some("secret".to_string())));

        let event = serde_json::json!({
            "title": "Yi Peng",
            "date": "2026-11-24",
            "location": "Chiang Mai",
            "status": "upcoming",
            "source": "manual",
            "featured": true
        });
        let created = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/events")
                    .header("authorization", "Bearer secret")
                    .header("content-type", "application/json")
                    .body(Body::from(event.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let update = serde_json::json!({
            "title": "Yi Peng",
            "date": "2026-11-24",
            "location": "Chiang Mai",
            "status": "sold out",
            "source": "manual",
            "featured": true
        });
        let updated = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/admin/events/0")
                    .header("authorization", "Bearer secret")
                    .header("content-type", "application/json")
                    .body(Body::from(update.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(updated.status(), StatusCode::OK);

        let events = state.store.load_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, "sold out");

        let deleted = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/admin/events/0")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(deleted.status(), StatusCode::OK);
        assert!(state.store.load_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn admin_topic_edit_hides_topic() {
        let state = temp_state("topic_edit");
        let mut archive = NewsArchive::new();
        archive.insert("2026-08-07".to_string(), vec![topic("หัวข้อ", false)]);
        state.store.save_archive(&archive).await.unwrap();

        let app = build_app(state.clone(), AdminAuth::new(Some("secret".to_string())));
        let patch = serde_json::json!({"hidden": true});
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/admin/topics/2026-08-07/0")
                    .header("authorization", "Bearer secret")
                    .header("content-type", "application/json")
                    .body(Body::from(patch.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let archive = state.store.load_archive().await.unwrap();
        assert!(archive["2026-08-07"][0].hidden);

        // and the public digest no longer serves that date
        let (status, _) = get_json(&app, "/api/v1/news/2026-08-07").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_comment_moderation_deletes() {
        let state = temp_state("moderation");
        state
            .store
            .append_comment(
                "thread1",
                Comment {
                    user: "spam".to_string(),
                    text: "buy now".to_string(),
                    date: "2026-08-07T00:00:00Z".to_string(),
                },
            )
            .await
            .unwrap();

        let app = build_app(state.clone(), AdminAuth::new(Some("secret".to_string())));
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/api/v1/admin/comments/thread1/0")
                    .header("authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let comments = state.store.load_comments().await.unwrap();
        assert!(!comments.contains_key("thread1"));
    }

    #[tokio::test]
    async fn admin_prune_trims_processed_set() {
        let state = temp_state("prune");
        let mut processed = std::collections::BTreeSet::new();
        for i in 0..10 {
            processed.insert(format!("https://example.com/{i}"));
        }
        state.store.save_processed(&processed).await.unwrap();

        let app = build_app(state.clone(), AdminAuth::new(Some("secret".to_string())));
        let body = serde_json::json!({"keep": 3});
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/admin/prune-processed")
                    .header("authorization", "Bearer secret")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.store.load_processed().await.unwrap().len(), 3);
    }
}

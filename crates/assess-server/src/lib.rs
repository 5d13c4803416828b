//! Backend for the voice assessment client.
//!
//! Serves the question list, persists sessions and answers, and proxies the
//! generative-AI calls (transcription, speech, short text) so the provider
//! key stays server-side. Access is limited to an email-domain allowlist.

pub mod api;
pub mod api_ai;
pub mod api_auth;
pub mod api_questions;
pub mod api_sessions;
pub mod config;
pub mod middleware;
pub mod provider;

use assess_db::DbPool;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Extension, Json, Router,
};
use config::AccessConfig;
use middleware::RateLimiter;
use provider::GenAiClient;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// Rate limiter state.
    pub rate_limiter: RateLimiter,
    /// Domain allowlist and rate limits.
    pub access: Arc<AccessConfig>,
    /// Upstream generative-AI client.
    pub provider: Arc<GenAiClient>,
}

/// Request bodies carry at most a couple of minutes of base64 audio.
const MAX_REQUEST_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/api/profile", get(api_auth::profile_handler))
        .route(
            "/api/profile/preferred-name",
            put(api_auth::preferred_name_handler),
        )
        .route("/api/questions", get(api_questions::list_questions_handler))
        .route(
            "/api/sessions",
            post(api_sessions::create_session_handler).get(api_sessions::list_sessions_handler),
        )
        .route(
            "/api/sessions/{sessionId}",
            get(api_sessions::get_session_handler),
        )
        .route(
            "/api/sessions/{sessionId}/responses",
            post(api_sessions::append_response_handler).get(api_sessions::list_responses_handler),
        )
        .route(
            "/api/sessions/{sessionId}/complete",
            post(api_sessions::complete_session_handler),
        )
        .route("/api/ai/transcribe", post(api_ai::transcribe_handler))
        .route("/api/ai/speak", post(api_ai::speak_handler))
        .route("/api/ai/generate", post(api_ai::generate_handler))
        .layer(axum::middleware::from_fn(middleware::auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/api/auth/validate", post(api_auth::validate_handler))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(middleware::rate_limit_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}

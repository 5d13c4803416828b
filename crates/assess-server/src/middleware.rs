use assess_types::{email_domain, UserProfile};
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::AppState;

/// Header carrying the signed-in user's email when no bearer token is used.
pub const USER_HEADER: &str = "X-Assess-User";
/// Optional identity-provider claims forwarded on sign-in.
pub const GIVEN_NAMES_HEADER: &str = "X-Assess-Given-Names";
pub const FAMILY_NAME_HEADER: &str = "X-Assess-Family-Name";

const RATE_WINDOW: Duration = Duration::from_secs(60);
const RATE_LIMITER_MAX_KEYS: usize = 10_000;

/// The authenticated user, stored in request extensions.
#[derive(Clone, Debug)]
pub struct UserContext(pub UserProfile);

/// Reads the claimed email from `X-Assess-User` or `Authorization: Bearer`.
///
/// `Ok(None)` means no identity header was sent at all.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Option<String>, StatusCode> {
    let raw = if let Some(val) = headers.get(USER_HEADER) {
        val.to_str()
            .map_err(|_| StatusCode::UNAUTHORIZED)?
            .to_string()
    } else if let Some(val) = headers.get("Authorization") {
        let val_str = val.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;
        match val_str.strip_prefix("Bearer ") {
            Some(token) => token.to_string(),
            None => return Err(StatusCode::UNAUTHORIZED),
        }
    } else {
        return Ok(None);
    };

    let email = raw.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(Some(email))
}

/// Header values may carry UTF-8 names ("María José").
fn utf8_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| String::from_utf8(v.as_bytes().to_vec()).ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Authenticates the caller against the email-domain allowlist.
///
/// The identity provider sits in front of the server and is trusted to have
/// set the identity header. A missing or malformed identity is `401`; a
/// well-formed email outside the allowlist is `403`. Users are upserted on
/// first sight.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let email = identity_from_headers(req.headers())?.ok_or(StatusCode::UNAUTHORIZED)?;
    let domain = email_domain(&email).ok_or(StatusCode::UNAUTHORIZED)?;

    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    if !state.access.is_domain_allowed(&domain) {
        tracing::info!(%domain, "rejected sign-in from domain outside the allowlist");
        return Err(StatusCode::FORBIDDEN);
    }

    let given_names = utf8_header(req.headers(), GIVEN_NAMES_HEADER);
    let family_name = utf8_header(req.headers(), FAMILY_NAME_HEADER);

    let profile = tokio::task::spawn_blocking(move || {
        let conn = state
            .pool
            .get()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        assess_db::users::upsert_user(
            &conn,
            &email,
            given_names.as_deref(),
            family_name.as_deref(),
        )
        .map_err(|e| {
            tracing::error!(error = %e, "failed to upsert user");
            StatusCode::INTERNAL_SERVER_ERROR
        })
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)??;

    req.extensions_mut().insert(UserContext(profile));

    Ok(next.run(req).await)
}

/// Rate limiting key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RateLimitKey {
    /// Rate limit by IP address.
    Ip(IpAddr),
    /// Rate limit by user email.
    User(String),
    /// Separate budget for the AI proxy, keyed by the inner key.
    Ai(Box<RateLimitKey>),
}

/// Requests seen in the current one-minute window.
#[derive(Debug, Clone, Copy)]
struct Window {
    opened: Instant,
    hits: u32,
}

impl Window {
    fn expired(&self, now: Instant) -> bool {
        now.duration_since(self.opened) > RATE_WINDOW
    }
}

/// In-memory fixed-window rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    windows: Arc<Mutex<HashMap<RateLimitKey, Window>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Counts one request for `key`; `false` once `limit` is exceeded within
    /// the current window.
    pub fn check(&self, key: RateLimitKey, limit: u32) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(|poisoned| {
            tracing::error!("rate limiter lock poisoned, continuing with stale counters");
            poisoned.into_inner()
        });
        let now = Instant::now();

        // Evict only expired windows so active limits survive the cleanup.
        if windows.len() > RATE_LIMITER_MAX_KEYS {
            windows.retain(|_, window| !window.expired(now));
        }

        let window = windows.entry(key).or_insert(Window {
            opened: now,
            hits: 0,
        });
        if window.expired(now) {
            *window = Window {
                opened: now,
                hits: 0,
            };
        }
        window.hits = window.hits.saturating_add(1);
        window.hits <= limit
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-user (or per-IP for anonymous callers) request limiting.
///
/// `/api/ai/*` draws from its own, stricter budget.
pub async fn rate_limit_middleware(req: Request<Body>, next: Next) -> Result<Response, StatusCode> {
    let state = req
        .extensions()
        .get::<Arc<AppState>>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?
        .clone();

    let key = if let Ok(Some(email)) = identity_from_headers(req.headers()) {
        RateLimitKey::User(email)
    } else if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        RateLimitKey::Ip(addr.ip())
    } else {
        // Anonymous callers are keyed by address; fail closed without one.
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    };

    let (key, limit) = if req.uri().path().starts_with("/api/ai/") {
        (
            RateLimitKey::Ai(Box::new(key)),
            state.access.ai_rate_limit_per_minute,
        )
    } else {
        (key, state.access.rate_limit_per_minute)
    };

    if !state.rate_limiter.check(key, limit) {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
        response.headers_mut().insert(
            axum::http::header::RETRY_AFTER,
            axum::http::HeaderValue::from_static("60"),
        );
        return Ok(response);
    }

    Ok(next.run(req).await)
}

//! Assessment sessions and their append-only answers.
//!
//! A session is only visible to the user who started it; any other caller
//! gets `404` so session IDs cannot be probed.

use crate::api::{with_conn, ApiError};
use crate::middleware::UserContext;
use crate::AppState;
use assess_types::{ResponseRecord, SessionRecord, SessionStatus};
use axum::extract::{Extension, Json, Path};
use axum::http::StatusCode;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponseRequest {
    pub question_id: String,
    #[serde(default)]
    pub question_text: Option<String>,
    pub answer_text: String,
    /// Epoch milliseconds; the server clock is used when absent.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponseResponse {
    pub response_id: i64,
}

fn owned_session(
    conn: &Connection,
    session_id: &str,
    email: &str,
) -> Result<SessionRecord, ApiError> {
    let session = assess_db::sessions::get_session(conn, session_id)?;
    if session.user_email != email {
        return Err(ApiError::NotFound(format!("session {}", session_id)));
    }
    Ok(session)
}

/// Handler for `POST /api/sessions`.
pub async fn create_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), ApiError> {
    let session = with_conn(&state, move |conn| {
        Ok(assess_db::sessions::create_session(conn, &user.email)?)
    })
    .await?;

    tracing::info!(session_id = %session.session_id, "started assessment session");
    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.session_id,
        }),
    ))
}

/// Handler for `GET /api/sessions`: the caller's sessions, newest first.
pub async fn list_sessions_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
) -> Result<Json<Vec<SessionRecord>>, ApiError> {
    let sessions = with_conn(&state, move |conn| {
        Ok(assess_db::sessions::list_sessions_for_user(conn, &user.email)?)
    })
    .await?;
    Ok(Json(sessions))
}

/// Handler for `GET /api/sessions/{sessionId}`.
pub async fn get_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    let session = with_conn(&state, move |conn| {
        owned_session(conn, &session_id, &user.email)
    })
    .await?;
    Ok(Json(session))
}

/// Handler for `POST /api/sessions/{sessionId}/responses`.
///
/// When the client omits `questionText` the stored question text is used.
pub async fn append_response_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
    Path(session_id): Path<String>,
    Json(payload): Json<AppendResponseRequest>,
) -> Result<(StatusCode, Json<AppendResponseResponse>), ApiError> {
    let response_id = with_conn(&state, move |conn| {
        let session = owned_session(conn, &session_id, &user.email)?;
        if session.status == SessionStatus::Completed {
            return Err(ApiError::Conflict(format!(
                "session {} is already completed",
                session_id
            )));
        }

        let question_text = match payload.question_text.filter(|t| !t.trim().is_empty()) {
            Some(text) => text,
            None => assess_db::questions::get_question(conn, &payload.question_id)?.text,
        };
        let record = ResponseRecord {
            session_id,
            question_id: payload.question_id,
            question_text,
            answer_text: payload.answer_text,
            timestamp: payload
                .timestamp
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        };
        Ok(assess_db::sessions::append_response(conn, &record)?)
    })
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(AppendResponseResponse { response_id }),
    ))
}

/// Handler for `GET /api/sessions/{sessionId}/responses`.
pub async fn list_responses_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
    Path(session_id): Path<String>,
) -> Result<Json<Vec<ResponseRecord>>, ApiError> {
    let responses = with_conn(&state, move |conn| {
        owned_session(conn, &session_id, &user.email)?;
        Ok(assess_db::sessions::list_responses(conn, &session_id)?)
    })
    .await?;
    Ok(Json(responses))
}

/// Handler for `POST /api/sessions/{sessionId}/complete`. Idempotent.
pub async fn complete_session_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(UserContext(user)): Extension<UserContext>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionRecord>, ApiError> {
    let session = with_conn(&state, move |conn| {
        owned_session(conn, &session_id, &user.email)?;
        Ok(assess_db::sessions::complete_session(conn, &session_id)?)
    })
    .await?;

    tracing::info!(session_id = %session.session_id, "completed assessment session");
    Ok(Json(session))
}

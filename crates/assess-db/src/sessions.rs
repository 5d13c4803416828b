//! Assessment sessions and their append-only responses.

use crate::StoreError;
use assess_types::{ResponseRecord, SessionRecord, SessionStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Starts a new session for the given user.
pub fn create_session(conn: &Connection, user_email: &str) -> Result<SessionRecord, StoreError> {
    let session_id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO sessions (session_id, user_email, status) VALUES (?1, ?2, ?3)",
        params![
            session_id,
            user_email.trim().to_ascii_lowercase(),
            SessionStatus::InProgress.as_str()
        ],
    )?;
    get_session(conn, &session_id)
}

/// Loads a session by its public ID.
pub fn get_session(conn: &Connection, session_id: &str) -> Result<SessionRecord, StoreError> {
    conn.query_row(
        "SELECT session_id, user_email, status, created_at, completed_at
         FROM sessions WHERE session_id = ?1",
        [session_id],
        map_row_to_session,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?
}

/// Lists a user's sessions, newest first.
pub fn list_sessions_for_user(
    conn: &Connection,
    user_email: &str,
) -> Result<Vec<SessionRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT session_id, user_email, status, created_at, completed_at
         FROM sessions WHERE user_email = ?1 ORDER BY id DESC",
    )?;
    let rows = stmt.query_map([user_email.trim().to_ascii_lowercase()], map_row_to_session)?;

    let mut sessions = Vec::new();
    for row in rows {
        sessions.push(row??);
    }
    Ok(sessions)
}

/// Marks a session as completed. Completing twice is a no-op.
pub fn complete_session(conn: &Connection, session_id: &str) -> Result<SessionRecord, StoreError> {
    let session = get_session(conn, session_id)?;
    if session.status == SessionStatus::Completed {
        return Ok(session);
    }
    conn.execute(
        "UPDATE sessions SET status = ?1, completed_at = datetime('now') WHERE session_id = ?2",
        params![SessionStatus::Completed.as_str(), session_id],
    )?;
    get_session(conn, session_id)
}

/// Appends one answer to a session.
///
/// Empty answers and answers for completed sessions are rejected; the flow
/// driver never produces either.
pub fn append_response(conn: &Connection, record: &ResponseRecord) -> Result<i64, StoreError> {
    if record.answer_text.trim().is_empty() {
        return Err(StoreError::Invalid("answer text is empty".to_string()));
    }
    if record.question_id.trim().is_empty() {
        return Err(StoreError::Invalid("question id is empty".to_string()));
    }

    let session = get_session(conn, &record.session_id)?;
    if session.status == SessionStatus::Completed {
        return Err(StoreError::Invalid(format!(
            "session {} is already completed",
            record.session_id
        )));
    }

    conn.execute(
        "INSERT INTO responses (session_id, question_id, question_text, answer_text, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            record.session_id,
            record.question_id,
            record.question_text,
            record.answer_text,
            record.timestamp,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Lists a session's responses in the order they were appended.
pub fn list_responses(
    conn: &Connection,
    session_id: &str,
) -> Result<Vec<ResponseRecord>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT session_id, question_id, question_text, answer_text, timestamp
         FROM responses WHERE session_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map([session_id], |row| {
        Ok(ResponseRecord {
            session_id: row.get(0)?,
            question_id: row.get(1)?,
            question_text: row.get(2)?,
            answer_text: row.get(3)?,
            timestamp: row.get(4)?,
        })
    })?;

    let mut responses = Vec::new();
    for row in rows {
        responses.push(row?);
    }
    Ok(responses)
}

fn map_row_to_session(row: &Row) -> rusqlite::Result<Result<SessionRecord, StoreError>> {
    let status: String = row.get(2)?;
    let Some(status) = SessionStatus::parse(&status) else {
        return Ok(Err(StoreError::Invalid(format!(
            "unknown session status '{}'",
            status
        ))));
    };
    Ok(Ok(SessionRecord {
        session_id: row.get(0)?,
        user_email: row.get(1)?,
        status,
        created_at: row.get(3)?,
        completed_at: row.get(4)?,
    }))
}

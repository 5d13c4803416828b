//! User records keyed by email.

use crate::StoreError;
use assess_types::UserProfile;
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Inserts the user on first sight and refreshes `last_seen_at` afterwards.
///
/// Name fields are only filled in when the stored value is empty, so a
/// preferred name chosen by the user is never overwritten by the identity
/// provider's claims.
pub fn upsert_user(
    conn: &Connection,
    email: &str,
    given_names: Option<&str>,
    family_name: Option<&str>,
) -> Result<UserProfile, StoreError> {
    let email = email.trim().to_ascii_lowercase();
    conn.execute(
        "INSERT INTO users (email, given_names, family_name) VALUES (?1, ?2, ?3)
         ON CONFLICT(email) DO UPDATE SET
            given_names = COALESCE(users.given_names, excluded.given_names),
            family_name = COALESCE(users.family_name, excluded.family_name),
            last_seen_at = datetime('now')",
        params![email, given_names, family_name],
    )?;
    get_user(conn, &email)
}

/// Loads a user by email.
pub fn get_user(conn: &Connection, email: &str) -> Result<UserProfile, StoreError> {
    let email = email.trim().to_ascii_lowercase();
    conn.query_row(
        "SELECT email, given_names, family_name, preferred_name FROM users WHERE email = ?1",
        [&email],
        map_row_to_user,
    )
    .optional()?
    .ok_or(StoreError::NotFound(email))
}

/// Records which of the user's given names the agent should use.
///
/// The name must be one of the user's given names (case-insensitive); the
/// stored spelling is the canonical one from `given_names`.
pub fn set_preferred_name(
    conn: &Connection,
    email: &str,
    name: &str,
) -> Result<UserProfile, StoreError> {
    let user = get_user(conn, email)?;
    let candidates = user.name_candidates();
    let wanted = name.trim().to_lowercase();
    let chosen = if candidates.is_empty() {
        name.trim().to_string()
    } else {
        candidates
            .into_iter()
            .find(|c| c.to_lowercase() == wanted)
            .ok_or_else(|| {
                StoreError::Invalid(format!("'{}' is not one of the user's names", name))
            })?
    };
    if chosen.is_empty() {
        return Err(StoreError::Invalid("preferred name is empty".to_string()));
    }

    conn.execute(
        "UPDATE users SET preferred_name = ?1 WHERE email = ?2",
        params![chosen, user.email],
    )?;
    get_user(conn, &user.email)
}

fn map_row_to_user(row: &Row) -> rusqlite::Result<UserProfile> {
    Ok(UserProfile {
        email: row.get(0)?,
        given_names: row.get(1)?,
        family_name: row.get(2)?,
        preferred_name: row.get(3)?,
    })
}

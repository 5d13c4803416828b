//! Shared types for the assessment platform.
//!
//! This crate provides the data model used by both the voice client core and
//! the backend: questions, sessions, persisted responses, user profiles, and
//! the voice interaction types in [`voice`].
//!
//! No crate in the workspace depends on anything *except* `assess-types` for
//! cross-cutting type definitions. Nothing here performs I/O.

use serde::{Deserialize, Serialize};

pub mod voice;

pub use voice::{AgentContext, PhraseLists, TurnLimits, Utterance, VadSettings};

/// A single survey question, as served by the question source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Stable question identifier.
    pub id: String,
    /// The question text read out to the user.
    pub text: String,
}

impl Question {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

/// Lifecycle of an assessment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Questions are still being answered.
    InProgress,
    /// The user reached the end of the question list.
    Completed,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A persisted assessment session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub session_id: String,
    pub user_email: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub completed_at: Option<String>,
}

/// One accepted answer, as appended to the persistence sink.
///
/// Records are append-only: a question answered with a follow-up produces
/// two records with the same `question_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub session_id: String,
    pub question_id: String,
    pub question_text: String,
    pub answer_text: String,
    /// Unix epoch milliseconds at which the answer was captured.
    pub timestamp: i64,
}

/// The authenticated user as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub email: String,
    /// All given names, space separated (e.g. "María José").
    pub given_names: Option<String>,
    pub family_name: Option<String>,
    /// The given name the user asked to be addressed by.
    pub preferred_name: Option<String>,
}

impl UserProfile {
    /// First-name candidates for the name preference question.
    pub fn name_candidates(&self) -> Vec<String> {
        self.given_names
            .as_deref()
            .map(first_names)
            .unwrap_or_default()
    }

    /// Whether the agent should ask which first name to use before the
    /// first question.
    pub fn needs_name_preference(&self) -> bool {
        self.preferred_name.is_none() && self.name_candidates().len() > 1
    }

    /// The name the agent should address the user by, if any is known.
    pub fn address_name(&self) -> Option<String> {
        self.preferred_name
            .clone()
            .or_else(|| self.name_candidates().into_iter().next())
    }
}

/// Splits a given-names string into individual first names.
pub fn first_names(given_names: &str) -> Vec<String> {
    given_names
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Returns the lowercase domain part of an email address.
///
/// Returns `None` for anything that does not look like `local@domain`.
pub fn email_domain(email: &str) -> Option<String> {
    let (local, domain) = email.trim().rsplit_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.contains('.') {
        return None;
    }
    Some(domain.to_ascii_lowercase())
}

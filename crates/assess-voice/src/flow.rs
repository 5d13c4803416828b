//! Walks a question list through the turn controller.
//!
//! The driver owns nothing audio-related; it only builds [`TurnRequest`]s,
//! persists every emitted utterance as a [`ResponseRecord`], and decides
//! whether to re-enter, advance or halt after each turn.

use crate::backend::BackendClient;
use crate::controller::{
    LeadIn, NamePreferenceDirective, TurnController, TurnOutcome, TurnRequest, UtteranceSink,
};
use crate::error::VoiceError;
use assess_types::{Question, ResponseRecord, UserProfile, Utterance};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Default number of failed turns tolerated per question.
const DEFAULT_MAX_ATTEMPTS_PER_QUESTION: u32 = 3;

/// Ordered question list.
#[async_trait]
pub trait QuestionSource: Send + Sync {
    async fn questions(&self) -> Result<Vec<Question>, VoiceError>;
}

/// Append-only store for accepted answers.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    async fn append(&self, record: &ResponseRecord) -> Result<(), VoiceError>;

    /// Marks the session finished once every question is answered.
    async fn complete(&self, _session_id: &str) -> Result<(), VoiceError> {
        Ok(())
    }
}

/// Where a settled name preference is saved.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn save_preferred_name(&self, name: &str) -> Result<(), VoiceError>;
}

/// `GET /api/questions`.
#[derive(Debug, Clone)]
pub struct HttpQuestionSource {
    client: BackendClient,
}

impl HttpQuestionSource {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl QuestionSource for HttpQuestionSource {
    async fn questions(&self) -> Result<Vec<Question>, VoiceError> {
        self.client
            .get_json("/api/questions", VoiceError::Backend)
            .await
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse<'a> {
    question_id: &'a str,
    question_text: &'a str,
    answer_text: &'a str,
    timestamp: i64,
}

/// `POST /api/sessions/{id}/responses` and `POST /api/sessions/{id}/complete`.
#[derive(Debug, Clone)]
pub struct HttpResponseSink {
    client: BackendClient,
}

impl HttpResponseSink {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResponseSink for HttpResponseSink {
    async fn append(&self, record: &ResponseRecord) -> Result<(), VoiceError> {
        let path = format!("/api/sessions/{}/responses", record.session_id);
        let _: serde_json::Value = self
            .client
            .post_json(
                &path,
                &AppendResponse {
                    question_id: &record.question_id,
                    question_text: &record.question_text,
                    answer_text: &record.answer_text,
                    timestamp: record.timestamp,
                },
                VoiceError::Sink,
            )
            .await?;
        Ok(())
    }

    async fn complete(&self, session_id: &str) -> Result<(), VoiceError> {
        let path = format!("/api/sessions/{}/complete", session_id);
        let _: serde_json::Value = self
            .client
            .post_json(&path, &serde_json::json!({}), VoiceError::Sink)
            .await?;
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreferredNameRequest<'a> {
    preferred_name: &'a str,
}

/// `PUT /api/profile/preferred-name`.
#[derive(Debug, Clone)]
pub struct HttpProfileStore {
    client: BackendClient,
}

impl HttpProfileStore {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ProfileStore for HttpProfileStore {
    async fn save_preferred_name(&self, name: &str) -> Result<(), VoiceError> {
        let _: serde_json::Value = self
            .client
            .put_json(
                "/api/profile/preferred-name",
                &PreferredNameRequest {
                    preferred_name: name,
                },
                VoiceError::Backend,
            )
            .await?;
        Ok(())
    }
}

/// Persists utterances for one question.
struct QuestionSink<'a> {
    sink: &'a dyn ResponseSink,
    session_id: &'a str,
    question: &'a Question,
}

#[async_trait]
impl<'a> UtteranceSink for QuestionSink<'a> {
    async fn accept(&self, utterance: &Utterance) -> Result<(), VoiceError> {
        let record = ResponseRecord {
            session_id: self.session_id.to_string(),
            question_id: self.question.id.clone(),
            question_text: self.question.text.clone(),
            answer_text: utterance.text.clone(),
            timestamp: utterance.timestamp_ms,
        };
        self.sink.append(&record).await
    }
}

/// Totals for a completed flow.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSummary {
    pub questions_answered: usize,
    pub utterances: usize,
    /// Turns that failed and were re-entered.
    pub retries: u32,
    /// The settled name preference, if one was asked for.
    pub preferred_name: Option<String>,
}

pub struct FlowDriver {
    controller: Arc<TurnController>,
    questions: Arc<dyn QuestionSource>,
    sink: Arc<dyn ResponseSink>,
    session_id: String,
    profile: Option<UserProfile>,
    profile_store: Option<Arc<dyn ProfileStore>>,
    max_attempts_per_question: u32,
}

impl FlowDriver {
    pub fn new(
        controller: Arc<TurnController>,
        questions: Arc<dyn QuestionSource>,
        sink: Arc<dyn ResponseSink>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            questions,
            sink,
            session_id: session_id.into(),
            profile: None,
            profile_store: None,
            max_attempts_per_question: DEFAULT_MAX_ATTEMPTS_PER_QUESTION,
        }
    }

    /// Addresses the user by name, asking first which given name to use when
    /// they have several and no saved preference.
    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn with_profile_store(mut self, store: Arc<dyn ProfileStore>) -> Self {
        self.profile_store = Some(store);
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts_per_question = attempts.max(1);
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Runs every question from the start.
    pub async fn run(&self) -> Result<FlowSummary, VoiceError> {
        self.run_from(0).await
    }

    /// Runs the questions starting at `start`.
    ///
    /// # Errors
    ///
    /// `DeviceUnavailable`, `Cancelled` and configuration errors halt the
    /// flow immediately. A question whose turns keep failing halts the flow
    /// with the last error once `max_attempts_per_question` is exhausted; the
    /// caller may resume with `run_from` at that question.
    pub async fn run_from(&self, start: usize) -> Result<FlowSummary, VoiceError> {
        let questions = self.questions.questions().await?;
        info!(
            session = %self.session_id,
            questions = questions.len(),
            start,
            "flow started"
        );

        let mut summary = FlowSummary::default();
        let mut user_name = self.profile.as_ref().and_then(UserProfile::address_name);
        let mut name_candidates = match &self.profile {
            Some(profile) if profile.needs_name_preference() => Some(profile.name_candidates()),
            _ => None,
        };
        let mut name_attempt = 0u32;
        let mut greeted = false;

        for (index, question) in questions.iter().enumerate().skip(start) {
            let mut failures = 0u32;
            let mut introduced = false;
            let sink = QuestionSink {
                sink: self.sink.as_ref(),
                session_id: &self.session_id,
                question,
            };

            loop {
                let lead_in = if !greeted {
                    LeadIn::Greeting
                } else if !introduced && index > start {
                    LeadIn::Transition
                } else {
                    LeadIn::None
                };
                let mut request = TurnRequest::new(question.text.clone())
                    .with_user_name(user_name.clone())
                    .with_lead_in(lead_in);

                let chosen = Arc::new(Mutex::new(None::<String>));
                if let Some(candidates) = &name_candidates {
                    name_attempt += 1;
                    let slot = Arc::clone(&chosen);
                    let directive = NamePreferenceDirective::new(candidates.clone(), move |name| {
                        if let Ok(mut slot) = slot.lock() {
                            *slot = Some(name.to_string());
                        }
                    })
                    .with_attempt(name_attempt);
                    request = request.with_name_directive(directive);
                }

                match self.controller.run_turn(request, &sink).await {
                    Ok(TurnOutcome::Answered { utterances }) => {
                        info!(
                            question_id = %question.id,
                            utterances = utterances.len(),
                            "question answered"
                        );
                        summary.questions_answered += 1;
                        summary.utterances += utterances.len();
                        greeted = true;
                        break;
                    }
                    Ok(TurnOutcome::NameResolved { name, defaulted }) => {
                        let reported = chosen.lock().ok().and_then(|slot| slot.clone());
                        let name = reported.unwrap_or(name);
                        info!(name = %name, defaulted, "using preferred name");
                        self.save_preferred_name(&name).await;
                        summary.preferred_name = Some(name.clone());
                        user_name = Some(name);
                        name_candidates = None;
                        greeted = true;
                        introduced = true;
                    }
                    Ok(TurnOutcome::NameUnresolved) => {
                        greeted = true;
                        introduced = true;
                    }
                    Err(e) if !e.is_recoverable() => {
                        warn!(question_id = %question.id, index, error = %e, "flow halted");
                        return Err(e);
                    }
                    Err(e) => {
                        failures += 1;
                        summary.retries += 1;
                        greeted = true;
                        introduced = true;
                        if failures >= self.max_attempts_per_question {
                            warn!(
                                question_id = %question.id,
                                index,
                                failures,
                                error = %e,
                                "giving up on question"
                            );
                            return Err(e);
                        }
                        warn!(question_id = %question.id, failures, error = %e, "retrying question");
                    }
                }
            }
        }

        self.sink.complete(&self.session_id).await?;
        info!(
            session = %self.session_id,
            answered = summary.questions_answered,
            utterances = summary.utterances,
            "flow complete"
        );
        Ok(summary)
    }

    async fn save_preferred_name(&self, name: &str) {
        let Some(store) = &self.profile_store else {
            return;
        };
        if let Err(e) = store.save_preferred_name(name).await {
            warn!(error = %e, "failed to save preferred name");
        }
    }
}

impl std::fmt::Debug for FlowDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowDriver")
            .field("session_id", &self.session_id)
            .field("max_attempts_per_question", &self.max_attempts_per_question)
            .finish()
    }
}

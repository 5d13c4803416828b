//! Generative-AI proxy endpoints used by the voice client.
//!
//! The provider key never leaves the server; clients only see these three
//! routes.

use crate::api::ApiError;
use crate::AppState;
use axum::extract::{Extension, Json};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Upper bound on requested generation length.
const MAX_GENERATE_TOKENS: u32 = 1024;
/// Upper bound on text sent for synthesis.
const MAX_SPEAK_CHARS: usize = 4096;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest {
    pub audio_base64: String,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

fn default_mime_type() -> String {
    "audio/wav".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakRequest {
    pub text: String,
    pub voice_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    #[serde(default)]
    pub system_prompt: String,
    pub user_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    128
}

/// Handler for `POST /api/ai/transcribe`.
///
/// An empty transcription is returned as `{"text": ""}`; the client decides
/// what nothing-heard means.
pub async fn transcribe_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<TranscribeRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    let audio = base64::engine::general_purpose::STANDARD
        .decode(payload.audio_base64.trim())
        .map_err(|e| ApiError::BadRequest(format!("audioBase64 is not valid base64: {}", e)))?;
    if audio.is_empty() {
        return Err(ApiError::BadRequest("audio is empty".to_string()));
    }

    let text = state.provider.transcribe(&audio, &payload.mime_type).await?;
    tracing::debug!(bytes = audio.len(), chars = text.len(), "transcribed audio");
    Ok(Json(TextResponse { text }))
}

/// Handler for `POST /api/ai/speak`. Returns `audio/wav` bytes.
pub async fn speak_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<SpeakRequest>,
) -> Result<Response, ApiError> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(ApiError::BadRequest("text is empty".to_string()));
    }
    if text.chars().count() > MAX_SPEAK_CHARS {
        return Err(ApiError::BadRequest(format!(
            "text exceeds {} characters",
            MAX_SPEAK_CHARS
        )));
    }
    if payload.voice_name.trim().is_empty() {
        return Err(ApiError::BadRequest("voiceName is empty".to_string()));
    }

    let wav = state.provider.speak(text, payload.voice_name.trim()).await?;
    Ok(([(header::CONTENT_TYPE, "audio/wav")], wav).into_response())
}

/// Handler for `POST /api/ai/generate`.
pub async fn generate_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<GenerateRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    if payload.user_prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("userPrompt is empty".to_string()));
    }
    let max_tokens = payload.max_tokens.clamp(1, MAX_GENERATE_TOKENS);

    let text = state
        .provider
        .generate(&payload.system_prompt, &payload.user_prompt, max_tokens)
        .await?;
    if text.is_empty() {
        return Err(ApiError::BadGateway("provider returned no text".to_string()));
    }
    Ok(Json(TextResponse { text }))
}

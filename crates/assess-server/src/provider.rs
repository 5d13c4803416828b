//! Client for the upstream generative-AI provider.
//!
//! All three capabilities go through the same `models/{model}:generateContent`
//! call and differ only in the request parts and generation config.

use crate::config::ProviderConfig;
use base64::Engine;
use serde_json::{json, Value};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

/// Instruction sent alongside audio for transcription.
const TRANSCRIBE_INSTRUCTION: &str =
    "Transcribe this audio exactly as spoken. Reply with the transcription only, \
     without quotes or commentary. If there is no speech, reply with nothing.";

/// Maximum number of upstream body characters echoed into an error.
const MAX_ERROR_BODY_CHARS: usize = 256;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider API key is not configured")]
    Unconfigured,
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("audio encoding failed: {0}")]
    Encoding(String),
}

/// Gemini-style `generateContent` client.
#[derive(Debug, Clone)]
pub struct GenAiClient {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl GenAiClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| ProviderError::Request(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Generates a short text reply.
    pub async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let mut payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": user_prompt }] }],
            "generationConfig": { "maxOutputTokens": max_tokens.max(1) }
        });
        if !system_prompt.trim().is_empty() {
            payload["systemInstruction"] = json!({ "parts": [{ "text": system_prompt }] });
        }

        let response = self.generate_content(&self.config.text_model, &payload).await?;
        Ok(collect_text(&response))
    }

    /// Transcribes an audio clip. An empty string means nothing was heard.
    pub async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, ProviderError> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    { "text": TRANSCRIBE_INSTRUCTION },
                    {
                        "inlineData": {
                            "mimeType": mime_type,
                            "data": base64::engine::general_purpose::STANDARD.encode(audio)
                        }
                    }
                ]
            }]
        });

        let response = self
            .generate_content(&self.config.transcription_model, &payload)
            .await?;
        Ok(collect_text(&response))
    }

    /// Synthesizes speech and returns it as a WAV file.
    pub async fn speak(&self, text: &str, voice_name: &str) -> Result<Vec<u8>, ProviderError> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": voice_name }
                    }
                }
            }
        });

        let response = self.generate_content(&self.config.speech_model, &payload).await?;
        let encoded = response["candidates"][0]["content"]["parts"]
            .as_array()
            .and_then(|parts| {
                parts
                    .iter()
                    .find_map(|part| part["inlineData"]["data"].as_str())
            })
            .ok_or_else(|| ProviderError::InvalidResponse("no audio in response".to_string()))?;
        let pcm = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| ProviderError::InvalidResponse(format!("bad audio encoding: {}", e)))?;
        if pcm.is_empty() {
            return Err(ProviderError::InvalidResponse("empty audio".to_string()));
        }

        pcm_to_wav(&pcm, self.config.sample_rate)
    }

    async fn generate_content(&self, model: &str, payload: &Value) -> Result<Value, ProviderError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ProviderError::Unconfigured)?;
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            model
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(payload)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

/// Concatenates the text parts of the first candidate.
fn collect_text(response: &Value) -> String {
    response["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
        .trim()
        .to_string()
}

/// Wraps little-endian 16-bit mono PCM into a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>, ProviderError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(pcm.len() + 44));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| ProviderError::Encoding(e.to_string()))?;
        for chunk in pcm.chunks_exact(2) {
            writer
                .write_sample(i16::from_le_bytes([chunk[0], chunk[1]]))
                .map_err(|e| ProviderError::Encoding(e.to_string()))?;
        }
        writer
            .finalize()
            .map_err(|e| ProviderError::Encoding(e.to_string()))?;
    }
    Ok(cursor.into_inner())
}

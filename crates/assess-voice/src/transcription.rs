use crate::backend::BackendClient;
use crate::error::VoiceError;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// Maximum audio input size for transcription (10 MiB).
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Speech-to-text collaborator.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Converts recorded audio to text.
    ///
    /// Fails with `TranscriptionFailed` on a non-success response or when
    /// nothing was recognized.
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, VoiceError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscribeRequest<'a> {
    audio_base64: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: Option<String>,
}

/// Transcriber backed by `POST /api/ai/transcribe`.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    client: BackendClient,
}

impl HttpTranscriber {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::TranscriptionFailed(
                "no audio was recorded".to_string(),
            ));
        }
        if audio.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::TranscriptionFailed(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                audio.len(),
                MAX_STT_INPUT_BYTES
            )));
        }

        let request = TranscribeRequest {
            audio_base64: base64::engine::general_purpose::STANDARD.encode(audio),
            mime_type,
        };
        let response: TranscribeResponse = self
            .client
            .post_json("/api/ai/transcribe", &request, VoiceError::TranscriptionFailed)
            .await?;

        non_blank(response.text)
            .ok_or_else(|| VoiceError::TranscriptionFailed("empty transcription".to_string()))
    }
}

fn non_blank(text: Option<String>) -> Option<String> {
    text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())
}

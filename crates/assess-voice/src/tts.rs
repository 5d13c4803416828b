use crate::backend::BackendClient;
use crate::error::VoiceError;
use async_trait::async_trait;
use serde::Serialize;

/// Maximum text input size for synthesis (64 KiB).
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Text-to-speech collaborator. Returns a playable media payload.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice_name: &str) -> Result<Vec<u8>, VoiceError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeakRequest<'a> {
    text: &'a str,
    voice_name: &'a str,
}

/// Synthesizer backed by `POST /api/ai/speak`.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    client: BackendClient,
}

impl HttpSynthesizer {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, voice_name: &str) -> Result<Vec<u8>, VoiceError> {
        if text.trim().is_empty() {
            return Err(VoiceError::SynthesisFailed("nothing to say".to_string()));
        }
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::SynthesisFailed(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        let audio = self
            .client
            .post_json_for_bytes(
                "/api/ai/speak",
                &SpeakRequest { text, voice_name },
                VoiceError::SynthesisFailed,
            )
            .await?;

        if audio.is_empty() {
            return Err(VoiceError::SynthesisFailed(
                "backend returned no audio".to_string(),
            ));
        }
        Ok(audio)
    }
}

//! Agent speech playback with overlap control.
//!
//! [`NarrationPlayer::speak`] never lets two narrations play at once: a new
//! call stops the current one and waits until its playback has released the
//! speaker before starting. Callers are resumed only when the audio has
//! actually finished.

use crate::error::VoiceError;
use crate::tts::SpeechSynthesizer;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Speaker playback.
///
/// `play` resolves when the audio ends naturally and fails with
/// `PlaybackError` when it cannot be decoded or played. Dropping the future
/// stops playback and releases the output.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn play(&self, audio: Vec<u8>) -> Result<(), VoiceError>;
}

#[derive(Debug)]
struct ActiveNarration {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct PlayerState {
    next_id: u64,
    current: Option<ActiveNarration>,
}

pub struct NarrationPlayer {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    output: Arc<dyn AudioOutput>,
    state: Mutex<PlayerState>,
    /// Held for the whole duration of a playback.
    speaker: tokio::sync::Mutex<()>,
}

impl NarrationPlayer {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, output: Arc<dyn AudioOutput>) -> Self {
        Self {
            synthesizer,
            output,
            state: Mutex::new(PlayerState::default()),
            speaker: tokio::sync::Mutex::new(()),
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PlayerState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("narration state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Whether a narration is being synthesized or played.
    pub fn is_speaking(&self) -> bool {
        self.lock_state().current.is_some()
    }

    /// Stops the current narration, if any. Its `speak` call resolves with
    /// `NarrationInterrupted`.
    pub fn stop(&self) {
        if let Some(active) = self.lock_state().current.take() {
            tracing::debug!(narration = active.id, "stopping narration");
            active.cancel.cancel();
        }
    }

    /// Synthesizes and plays `text`, resolving on natural completion.
    ///
    /// # Errors
    ///
    /// `SynthesisFailed` or `PlaybackError` from the collaborators, and
    /// `NarrationInterrupted` when another `speak` or [`stop`](Self::stop)
    /// superseded this one.
    pub async fn speak(&self, text: &str, voice_name: &str) -> Result<(), VoiceError> {
        let (id, cancel) = self.begin();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(VoiceError::NarrationInterrupted),
            result = self.synthesize_and_play(text, voice_name) => result,
        };

        self.finish(id);
        if let Err(e) = &result {
            tracing::debug!(narration = id, error = %e, "narration ended without completing");
        }
        result
    }

    fn begin(&self) -> (u64, CancellationToken) {
        let mut state = self.lock_state();
        if let Some(previous) = state.current.take() {
            tracing::debug!(narration = previous.id, "superseding narration");
            previous.cancel.cancel();
        }
        state.next_id += 1;
        let id = state.next_id;
        let cancel = CancellationToken::new();
        state.current = Some(ActiveNarration {
            id,
            cancel: cancel.clone(),
        });
        (id, cancel)
    }

    fn finish(&self, id: u64) {
        let mut state = self.lock_state();
        if state.current.as_ref().map(|c| c.id) == Some(id) {
            state.current = None;
        }
    }

    async fn synthesize_and_play(&self, text: &str, voice_name: &str) -> Result<(), VoiceError> {
        let audio = self.synthesizer.synthesize(text, voice_name).await?;

        // The superseded playback drops its speaker guard once its future is
        // dropped, so this only waits for the release.
        let _speaker = self.speaker.lock().await;
        self.output.play(audio).await
    }
}

impl std::fmt::Debug for NarrationPlayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarrationPlayer")
            .field("speaking", &self.is_speaking())
            .finish()
    }
}

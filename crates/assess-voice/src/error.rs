use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("microphone unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("another recording is already active")]
    CaptureBusy,

    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("text generation failed: {0}")]
    GenerationFailed(String),

    #[error("playback error: {0}")]
    PlaybackError(String),

    #[error("narration was interrupted")]
    NarrationInterrupted,

    #[error("a turn is already in progress")]
    TurnInProgress,

    #[error("turn cancelled")]
    Cancelled,

    #[error("invalid phase transition: {0}")]
    InvalidTransition(String),

    #[error("audio encoding error: {0}")]
    Encoding(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("response sink error: {0}")]
    Sink(String),

    #[error("backend request failed: {0}")]
    Backend(String),
}

impl VoiceError {
    /// Whether the flow may retry the current question after this error.
    ///
    /// A missing or denied microphone halts the question until the user
    /// retries; a cancelled turn was torn down on purpose.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            VoiceError::DeviceUnavailable(_) | VoiceError::Cancelled | VoiceError::Config(_)
        )
    }
}

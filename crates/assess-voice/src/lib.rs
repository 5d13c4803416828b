//! Voice interaction core for the assessment client.
//!
//! [`TurnController`] runs one spoken question at a time: it narrates the
//! agent's line, listens until the user falls silent, transcribes the answer
//! and offers a follow-up. [`FlowDriver`] walks the question list and
//! persists each accepted [`Utterance`](assess_types::Utterance).
//!
//! All collaborators (microphone, speaker, speech-to-text, speech synthesis,
//! text generation, question source, response sink) are traits so the core
//! can run against the HTTP backend, real devices (feature `device`), or test
//! doubles.

pub mod backend;
pub mod capture;
pub mod config;
pub mod controller;
#[cfg(feature = "device")]
pub mod device;
pub mod error;
pub mod flow;
pub mod lines;
pub mod matching;
pub mod narration;
pub mod transcription;
pub mod tts;
pub mod vad;

pub use backend::BackendClient;
pub use capture::{AudioCapture, AudioFormat, CaptureStream, MediaTracks, Microphone, Recording};
pub use config::EndpointConfig;
pub use controller::{
    LeadIn, NamePreferenceDirective, TurnController, TurnEvent, TurnOutcome, TurnPhase,
    TurnRequest, TurnSession, UtteranceSink,
};
pub use error::VoiceError;
pub use flow::{
    FlowDriver, FlowSummary, HttpProfileStore, HttpQuestionSource, HttpResponseSink,
    ProfileStore, QuestionSource, ResponseSink,
};
pub use lines::{HttpGenerator, LineKind, Scriptwriter, TextGenerator};
pub use narration::{AudioOutput, NarrationPlayer};
pub use transcription::{HttpTranscriber, Transcriber};
pub use tts::{HttpSynthesizer, SpeechSynthesizer};
pub use vad::{SilenceDetector, StopReason, VadMonitor, VadStop};

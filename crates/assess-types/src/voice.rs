//! Voice interaction types.
//!
//! [`AgentContext`] is loaded once per flow session and shared read-only by
//! every turn; [`Utterance`] is the unit the turn controller emits upward.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A finalized, transcribed piece of user speech.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Utterance {
    /// Transcribed text. Never empty.
    pub text: String,
    /// Unix epoch milliseconds at which recording started.
    pub timestamp_ms: i64,
    /// Duration of the spoken part of the recording.
    pub duration_ms: u64,
}

fn default_voice_id() -> String {
    "Kore".to_string()
}

fn default_persona_name() -> String {
    "Ada".to_string()
}

fn default_rms_threshold() -> f32 {
    0.02
}

fn default_silence_ms() -> u64 {
    2_000
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_max_user_turn_ms() -> u64 {
    120_000
}

fn default_followup_extra_turn_ms() -> u64 {
    30_000
}

fn default_max_name_attempts() -> u32 {
    2
}

fn default_no_more_phrases() -> Vec<String> {
    [
        "nada más",
        "nada mas",
        "eso es todo",
        "es todo",
        "no tengo nada",
        "nothing else",
        "that's all",
        "no more",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Voice activity detection thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VadSettings {
    /// RMS energy below which a sample counts as silence.
    #[serde(default = "default_rms_threshold")]
    pub rms_threshold: f32,
    /// Continuous silence required before the recording stops.
    #[serde(default = "default_silence_ms")]
    pub silence_ms: u64,
    /// How often the detector samples the input level.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            rms_threshold: default_rms_threshold(),
            silence_ms: default_silence_ms(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl VadSettings {
    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Wall-clock limits for user turns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnLimits {
    /// Hard cap for a primary answer.
    #[serde(default = "default_max_user_turn_ms")]
    pub max_user_turn_ms: u64,
    /// Hard cap for the follow-up answer.
    #[serde(default = "default_followup_extra_turn_ms")]
    pub followup_extra_turn_ms: u64,
    /// How many times the name preference question is asked before falling
    /// back to the first candidate.
    #[serde(default = "default_max_name_attempts")]
    pub max_name_attempts: u32,
}

impl Default for TurnLimits {
    fn default() -> Self {
        Self {
            max_user_turn_ms: default_max_user_turn_ms(),
            followup_extra_turn_ms: default_followup_extra_turn_ms(),
            max_name_attempts: default_max_name_attempts(),
        }
    }
}

impl TurnLimits {
    pub fn max_user_turn(&self) -> Duration {
        Duration::from_millis(self.max_user_turn_ms)
    }

    pub fn followup_extra_turn(&self) -> Duration {
        Duration::from_millis(self.followup_extra_turn_ms)
    }
}

/// Phrase lists used by the intent matchers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhraseLists {
    /// Replies meaning "I have nothing to add".
    #[serde(default = "default_no_more_phrases")]
    pub no_more: Vec<String>,
}

impl Default for PhraseLists {
    fn default() -> Self {
        Self {
            no_more: default_no_more_phrases(),
        }
    }
}

/// Shared configuration for every turn of a flow session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentContext {
    /// Speech synthesis voice name.
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    /// Name the agent introduces itself with.
    #[serde(default = "default_persona_name")]
    pub persona_name: String,
    #[serde(default)]
    pub vad: VadSettings,
    #[serde(default)]
    pub limits: TurnLimits,
    #[serde(default)]
    pub phrases: PhraseLists,
}

impl Default for AgentContext {
    fn default() -> Self {
        Self {
            voice_id: default_voice_id(),
            persona_name: default_persona_name(),
            vad: VadSettings::default(),
            limits: TurnLimits::default(),
            phrases: PhraseLists::default(),
        }
    }
}

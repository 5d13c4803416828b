//! The turn controller.
//!
//! One call to [`TurnController::run_turn`] drives a single turn through
//! `Idle → Speaking → Listening → Processing → (Followup → Processing)? → Idle`.
//! Each phase is a sequential, awaited step; every await is raced against the
//! turn's cancellation token so [`TurnController::teardown`] releases the
//! microphone, the silence-check loop and the speaker promptly.

use crate::capture::{record_until, Microphone, Recording};
use crate::error::VoiceError;
use crate::lines::{LineContext, LineKind, Scriptwriter};
use crate::matching::{is_no_more_response, resolve_name_preference, NameResolution};
use crate::narration::NarrationPlayer;
use crate::transcription::Transcriber;
use crate::vad::VadMonitor;
use assess_types::{AgentContext, Utterance};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default capacity for the turn event broadcast channel.
const DEFAULT_EVENT_BROADCAST_CAPACITY: usize = 256;

/// Phases of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnPhase {
    Idle,
    Speaking,
    Listening,
    Processing,
    Followup,
}

impl TurnPhase {
    /// Whether `self → next` is a legal step.
    ///
    /// Any active phase may fall back to `Idle`.
    pub fn can_transition_to(self, next: TurnPhase) -> bool {
        use TurnPhase::*;
        match (self, next) {
            (Idle, Speaking)
            | (Speaking, Listening)
            | (Listening, Processing)
            | (Processing, Followup)
            | (Followup, Processing) => true,
            (Idle, Idle) => false,
            (_, Idle) => true,
            _ => false,
        }
    }

    /// On-screen status line for the phase.
    pub fn status_text(self) -> &'static str {
        match self {
            TurnPhase::Idle => "",
            TurnPhase::Speaking => "Speaking…",
            TurnPhase::Listening => "Listening…",
            TurnPhase::Processing => "Processing…",
            TurnPhase::Followup => "Anything to add? Listening…",
        }
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TurnPhase::Idle => "idle",
            TurnPhase::Speaking => "speaking",
            TurnPhase::Listening => "listening",
            TurnPhase::Processing => "processing",
            TurnPhase::Followup => "followup",
        };
        f.write_str(name)
    }
}

/// Asks the user which of their first names to use before the question.
#[derive(Clone)]
pub struct NamePreferenceDirective {
    pub candidates: Vec<String>,
    /// 1-based attempt number; later attempts use the re-ask line.
    pub attempt: u32,
    on_chosen: Arc<dyn Fn(&str) + Send + Sync>,
}

impl NamePreferenceDirective {
    pub fn new(candidates: Vec<String>, on_chosen: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            candidates,
            attempt: 1,
            on_chosen: Arc::new(on_chosen),
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt.max(1);
        self
    }

    fn report(&self, name: &str) {
        (self.on_chosen)(name);
    }
}

impl fmt::Debug for NamePreferenceDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamePreferenceDirective")
            .field("candidates", &self.candidates)
            .field("attempt", &self.attempt)
            .finish()
    }
}

/// What the agent says before the question or name prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LeadIn {
    #[default]
    None,
    Greeting,
    Transition,
}

/// Input for one turn.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// The current question text, opaque to the controller.
    pub question: String,
    pub user_name: Option<String>,
    pub lead_in: LeadIn,
    pub name_directive: Option<NamePreferenceDirective>,
}

impl TurnRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_name: None,
            lead_in: LeadIn::None,
            name_directive: None,
        }
    }

    pub fn with_user_name(mut self, name: Option<String>) -> Self {
        self.user_name = name;
        self
    }

    pub fn with_lead_in(mut self, lead_in: LeadIn) -> Self {
        self.lead_in = lead_in;
        self
    }

    pub fn with_name_directive(mut self, directive: NamePreferenceDirective) -> Self {
        self.name_directive = Some(directive);
        self
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The question was answered; one or two utterances were emitted.
    Answered { utterances: Vec<Utterance> },
    /// A name preference was settled. No utterance was emitted.
    NameResolved { name: String, defaulted: bool },
    /// The reply named none of the candidates; the directive stays pending.
    NameUnresolved,
}

/// Notifications for observers such as a status line.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    PhaseChanged { from: TurnPhase, to: TurnPhase },
    Status(String),
    Utterance(Utterance),
    NameChosen { name: String, defaulted: bool },
}

/// Receives each accepted utterance as soon as it is produced.
#[async_trait]
pub trait UtteranceSink: Send + Sync {
    async fn accept(&self, utterance: &Utterance) -> Result<(), VoiceError>;
}

#[async_trait]
impl UtteranceSink for mpsc::UnboundedSender<Utterance> {
    async fn accept(&self, utterance: &Utterance) -> Result<(), VoiceError> {
        self.send(utterance.clone())
            .map_err(|_| VoiceError::Sink("utterance receiver dropped".to_string()))
    }
}

/// State of the active turn. Owned by the controller and mutated only by its
/// transition handlers.
#[derive(Debug, Clone)]
pub struct TurnSession {
    id: u64,
    phase: TurnPhase,
    fragments: Vec<String>,
    followup_pending: bool,
    cancel: CancellationToken,
    started: Instant,
}

impl TurnSession {
    fn new(id: u64) -> Self {
        Self {
            id,
            phase: TurnPhase::Idle,
            fragments: Vec::new(),
            followup_pending: false,
            cancel: CancellationToken::new(),
            started: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn phase(&self) -> TurnPhase {
        self.phase
    }

    /// Transcripts accepted so far in this turn.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn followup_pending(&self) -> bool {
        self.followup_pending
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[derive(Debug, Default)]
struct SessionSlot {
    next_id: u64,
    active: Option<TurnSession>,
}

/// Audio captured in one listening phase.
struct Captured {
    recording: Recording,
    speech: Duration,
    started_ms: i64,
}

pub struct TurnController {
    context: Arc<AgentContext>,
    microphone: Microphone,
    transcriber: Arc<dyn Transcriber>,
    narration: Arc<NarrationPlayer>,
    scriptwriter: Scriptwriter,
    slot: Mutex<SessionSlot>,
    events: broadcast::Sender<TurnEvent>,
}

impl TurnController {
    pub fn new(
        context: Arc<AgentContext>,
        microphone: Microphone,
        transcriber: Arc<dyn Transcriber>,
        narration: Arc<NarrationPlayer>,
        scriptwriter: Scriptwriter,
    ) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_BROADCAST_CAPACITY);
        Self {
            context,
            microphone,
            transcriber,
            narration,
            scriptwriter,
            slot: Mutex::new(SessionSlot::default()),
            events,
        }
    }

    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// Current phase; `Idle` when no turn is active.
    pub fn phase(&self) -> TurnPhase {
        self.lock_slot()
            .active
            .as_ref()
            .map(|s| s.phase)
            .unwrap_or(TurnPhase::Idle)
    }

    /// A copy of the active turn's state.
    pub fn session(&self) -> Option<TurnSession> {
        self.lock_slot().active.clone()
    }

    /// Aborts the active turn and stops narration.
    ///
    /// The in-flight `run_turn` resolves with `Cancelled` after dropping its
    /// capture stream and silence-check loop. No events are published for the
    /// aborted turn after this returns.
    pub fn teardown(&self) {
        let session = self.lock_slot().active.take();
        if let Some(session) = session {
            info!(turn = session.id, phase = %session.phase, "tearing down turn");
            session.cancel.cancel();
            if session.phase != TurnPhase::Idle {
                self.publish(TurnEvent::PhaseChanged {
                    from: session.phase,
                    to: TurnPhase::Idle,
                });
                self.publish(TurnEvent::Status(TurnPhase::Idle.status_text().to_string()));
            }
        }
        self.narration.stop();
    }

    /// Runs one turn for `request`, handing utterances to `sink` as they are
    /// accepted.
    ///
    /// # Errors
    ///
    /// `TurnInProgress` when a turn is already active or narration is still
    /// playing; `Cancelled` after [`teardown`](Self::teardown); otherwise the
    /// capture, transcription or narration error that aborted the turn. No
    /// utterance is emitted for an aborted primary answer.
    pub async fn run_turn(
        &self,
        request: TurnRequest,
        sink: &dyn UtteranceSink,
    ) -> Result<TurnOutcome, VoiceError> {
        let (id, cancel) = self.begin()?;
        debug!(turn = id, question = %request.question, "turn started");

        let result = self.drive(id, &cancel, &request, sink).await;

        if let Err(e) = &result {
            match e {
                VoiceError::Cancelled => debug!(turn = id, "turn cancelled"),
                _ => warn!(turn = id, phase = %self.phase(), error = %e, "turn aborted"),
            }
        }
        self.finish(id);
        result
    }

    fn lock_slot(&self) -> MutexGuard<'_, SessionSlot> {
        match self.slot.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("turn session lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn publish(&self, event: TurnEvent) {
        let _ = self.events.send(event);
    }

    fn begin(&self) -> Result<(u64, CancellationToken), VoiceError> {
        let mut slot = self.lock_slot();
        if slot.active.is_some() || self.narration.is_speaking() || self.microphone.is_active() {
            return Err(VoiceError::TurnInProgress);
        }
        slot.next_id += 1;
        let session = TurnSession::new(slot.next_id);
        let handle = (session.id, session.cancel.clone());
        slot.active = Some(session);
        Ok(handle)
    }

    fn finish(&self, id: u64) {
        let mut slot = self.lock_slot();
        if slot.active.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        if let Some(session) = slot.active.take() {
            if session.phase != TurnPhase::Idle {
                self.publish(TurnEvent::PhaseChanged {
                    from: session.phase,
                    to: TurnPhase::Idle,
                });
                self.publish(TurnEvent::Status(TurnPhase::Idle.status_text().to_string()));
            }
        }
    }

    /// Applies `mutate` to the turn if it is still the active one.
    fn with_session<T>(
        &self,
        id: u64,
        mutate: impl FnOnce(&mut TurnSession) -> Result<T, VoiceError>,
    ) -> Result<T, VoiceError> {
        let mut slot = self.lock_slot();
        match slot.active.as_mut() {
            Some(session) if session.id == id => mutate(session),
            _ => Err(VoiceError::Cancelled),
        }
    }

    fn transition(&self, id: u64, next: TurnPhase) -> Result<(), VoiceError> {
        self.with_session(id, |session| {
            let from = session.phase;
            if !from.can_transition_to(next) {
                return Err(VoiceError::InvalidTransition(format!("{} -> {}", from, next)));
            }
            session.phase = next;
            debug!(turn = id, from = %from, to = %next, "phase changed");
            self.publish(TurnEvent::PhaseChanged { from, to: next });
            self.publish(TurnEvent::Status(next.status_text().to_string()));
            Ok(())
        })
    }

    fn publish_for(&self, id: u64, event: TurnEvent) -> Result<(), VoiceError> {
        self.with_session(id, |_| {
            self.publish(event);
            Ok(())
        })
    }

    async fn drive(
        &self,
        id: u64,
        cancel: &CancellationToken,
        request: &TurnRequest,
        sink: &dyn UtteranceSink,
    ) -> Result<TurnOutcome, VoiceError> {
        let mut ctx = self.line_context(request);

        self.transition(id, TurnPhase::Speaking)?;
        let opening = guarded(cancel, async { Ok(self.opening(request, &ctx).await) }).await?;
        self.speak(cancel, &opening).await?;

        self.transition(id, TurnPhase::Listening)?;
        let captured = self
            .listen(cancel, self.context.limits.max_user_turn())
            .await?;

        self.transition(id, TurnPhase::Processing)?;
        let text = self.transcribe(cancel, &captured).await?;

        if let Some(directive) = &request.name_directive {
            return self.settle_name(id, cancel, directive, &text, &mut ctx).await;
        }

        let primary = Utterance {
            text,
            timestamp_ms: captured.started_ms,
            duration_ms: captured.speech.as_millis() as u64,
        };
        self.emit(id, &primary, sink).await?;
        let mut utterances = vec![primary];

        self.with_session(id, |s| {
            s.followup_pending = true;
            Ok(())
        })?;
        let extra = match self.followup(id, cancel, &ctx).await {
            Ok(Some(extra)) => self.emit(id, &extra, sink).await.map(|()| Some(extra)),
            other => other,
        };
        match extra {
            Ok(Some(extra)) => utterances.push(extra),
            Ok(None) => debug!(turn = id, "nothing to add"),
            Err(VoiceError::Cancelled) => return Err(VoiceError::Cancelled),
            Err(e) => warn!(turn = id, error = %e, "follow-up discarded"),
        }
        self.with_session(id, |s| {
            s.followup_pending = false;
            Ok(())
        })?;

        self.transition(id, TurnPhase::Idle)?;
        Ok(TurnOutcome::Answered { utterances })
    }

    /// Speaks the "anything to add?" prompt and records the follow-up.
    ///
    /// Returns `None` when the reply was a "no more" phrase.
    async fn followup(
        &self,
        id: u64,
        cancel: &CancellationToken,
        ctx: &LineContext,
    ) -> Result<Option<Utterance>, VoiceError> {
        let prompt = guarded(cancel, async {
            Ok(self.scriptwriter.line(LineKind::FollowupPrompt, ctx).await)
        })
        .await?;
        self.speak(cancel, &prompt).await?;

        self.transition(id, TurnPhase::Followup)?;
        let captured = self
            .listen(cancel, self.context.limits.followup_extra_turn())
            .await?;

        self.transition(id, TurnPhase::Processing)?;
        let text = self.transcribe(cancel, &captured).await?;
        if is_no_more_response(&text, &self.context.phrases.no_more) {
            return Ok(None);
        }
        Ok(Some(Utterance {
            text,
            timestamp_ms: captured.started_ms,
            duration_ms: captured.speech.as_millis() as u64,
        }))
    }

    async fn settle_name(
        &self,
        id: u64,
        cancel: &CancellationToken,
        directive: &NamePreferenceDirective,
        text: &str,
        ctx: &mut LineContext,
    ) -> Result<TurnOutcome, VoiceError> {
        let resolution = resolve_name_preference(
            text,
            &directive.candidates,
            directive.attempt,
            self.context.limits.max_name_attempts,
        );
        let (name, defaulted) = match resolution {
            NameResolution::Chosen(name) => (name, false),
            NameResolution::Defaulted(name) => (name, true),
            NameResolution::Unresolved => {
                info!(turn = id, attempt = directive.attempt, "no name candidate matched");
                self.transition(id, TurnPhase::Idle)?;
                return Ok(TurnOutcome::NameUnresolved);
            }
        };

        info!(turn = id, name = %name, defaulted, "name preference settled");
        directive.report(&name);
        self.publish_for(
            id,
            TurnEvent::NameChosen {
                name: name.clone(),
                defaulted,
            },
        )?;

        ctx.user_name = Some(name.clone());
        let ctx: &LineContext = ctx;
        let confirmation = guarded(cancel, async {
            Ok(self.scriptwriter.line(LineKind::Confirmation, ctx).await)
        })
        .await?;
        match self.speak(cancel, &confirmation).await {
            Ok(()) => {}
            Err(VoiceError::Cancelled) => return Err(VoiceError::Cancelled),
            Err(e) => warn!(turn = id, error = %e, "confirmation not spoken"),
        }

        self.transition(id, TurnPhase::Idle)?;
        Ok(TurnOutcome::NameResolved { name, defaulted })
    }

    fn line_context(&self, request: &TurnRequest) -> LineContext {
        LineContext {
            persona_name: self.context.persona_name.clone(),
            user_name: request.user_name.clone(),
            question: Some(request.question.clone()),
            name_candidates: request
                .name_directive
                .as_ref()
                .map(|d| d.candidates.clone())
                .unwrap_or_default(),
        }
    }

    async fn opening(&self, request: &TurnRequest, ctx: &LineContext) -> String {
        let mut kinds = Vec::with_capacity(2);
        match request.lead_in {
            LeadIn::Greeting => kinds.push(LineKind::Greeting),
            LeadIn::Transition => kinds.push(LineKind::Transition),
            LeadIn::None => {}
        }
        match &request.name_directive {
            Some(directive) if directive.attempt > 1 => kinds.push(LineKind::NameRetry),
            Some(_) => kinds.push(LineKind::NamePreference),
            None => kinds.push(LineKind::QuestionIntro),
        }

        let mut parts = Vec::with_capacity(kinds.len());
        for kind in kinds {
            let line = self.scriptwriter.line(kind, ctx).await;
            if !line.trim().is_empty() {
                parts.push(line);
            }
        }
        parts.join(" ")
    }

    async fn speak(&self, cancel: &CancellationToken, text: &str) -> Result<(), VoiceError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        guarded(cancel, self.narration.speak(text, &self.context.voice_id)).await
    }

    /// Records until the silence window or `hard_cap` elapses.
    ///
    /// The capture stream and the silence-check loop are released on every
    /// exit path, including cancellation.
    async fn listen(
        &self,
        cancel: &CancellationToken,
        hard_cap: Duration,
    ) -> Result<Captured, VoiceError> {
        let mut stream = guarded(cancel, self.microphone.open()).await?;
        let started_ms = chrono::Utc::now().timestamp_millis();

        let (level_tx, level_rx) = watch::channel(0.0f32);
        let mut monitor = VadMonitor::spawn(level_rx, &self.context.vad, hard_cap);
        let recorded = guarded(
            cancel,
            record_until(&mut stream, &level_tx, monitor.stopped()),
        )
        .await;
        stream.release();
        drop(monitor);

        let (recording, signal) = recorded?;
        let speech = match signal.flatten() {
            Some(stop) => {
                debug!(reason = ?stop.reason, speech_ms = stop.speech.as_millis() as u64, "recording stopped");
                stop.speech
            }
            None => recording.duration(),
        };
        Ok(Captured {
            recording,
            speech,
            started_ms,
        })
    }

    async fn transcribe(
        &self,
        cancel: &CancellationToken,
        captured: &Captured,
    ) -> Result<String, VoiceError> {
        if captured.recording.is_empty() {
            return Err(VoiceError::TranscriptionFailed(
                "no audio was captured".to_string(),
            ));
        }
        let wav = captured.recording.to_wav()?;
        let text = guarded(cancel, self.transcriber.transcribe(&wav, Recording::MIME_TYPE)).await?;
        let text = text.trim();
        // Punctuation-only transcripts ("…", "?!") carry no speech.
        if !text.chars().any(char::is_alphanumeric) {
            return Err(VoiceError::TranscriptionFailed("empty transcript".to_string()));
        }
        Ok(text.to_string())
    }

    async fn emit(
        &self,
        id: u64,
        utterance: &Utterance,
        sink: &dyn UtteranceSink,
    ) -> Result<(), VoiceError> {
        sink.accept(utterance).await?;
        self.with_session(id, |s| {
            s.fragments.push(utterance.text.clone());
            Ok(())
        })?;
        self.publish_for(id, TurnEvent::Utterance(utterance.clone()))
    }
}

impl fmt::Debug for TurnController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnController")
            .field("phase", &self.phase())
            .field("microphone", &self.microphone)
            .field("narration", &self.narration)
            .finish()
    }
}

/// Races `fut` against the turn's cancellation token.
async fn guarded<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, VoiceError>
where
    F: Future<Output = Result<T, VoiceError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(VoiceError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TurnPhase::*;

    #[test]
    fn forward_path_is_legal() {
        let path = [Idle, Speaking, Listening, Processing, Followup, Processing, Idle];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn phases_cannot_be_skipped() {
        assert!(!Idle.can_transition_to(Listening));
        assert!(!Idle.can_transition_to(Processing));
        assert!(!Speaking.can_transition_to(Processing));
        assert!(!Listening.can_transition_to(Followup));
        assert!(!Followup.can_transition_to(Listening));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn every_active_phase_can_abort_to_idle() {
        for phase in [Speaking, Listening, Processing, Followup] {
            assert!(phase.can_transition_to(Idle));
        }
    }

    #[test]
    fn status_text_for_user_facing_phases() {
        assert_eq!(Listening.status_text(), "Listening…");
        assert_eq!(Processing.status_text(), "Processing…");
        assert_eq!(Idle.status_text(), "");
    }

    #[test]
    fn directive_attempt_is_one_based() {
        let directive = NamePreferenceDirective::new(vec!["Maria".into()], |_| {}).with_attempt(0);
        assert_eq!(directive.attempt, 1);
    }
}

#![allow(dead_code)]

use assess_types::{AgentContext, Question, ResponseRecord};
use assess_voice::{
    AudioCapture, AudioFormat, AudioOutput, CaptureStream, MediaTracks, Microphone,
    NarrationPlayer, ProfileStore, QuestionSource, ResponseSink, Scriptwriter, SpeechSynthesizer,
    Transcriber, TurnController, VoiceError,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// 20ms of audio at 16kHz.
pub const FRAME_SAMPLES: usize = 320;
pub const FRAME_PERIOD: Duration = Duration::from_millis(20);

pub fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// A stretch of constant-level input.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub level: f32,
    pub length: Duration,
}

pub fn speech(length: Duration) -> Segment {
    Segment {
        level: 0.2,
        length,
    }
}

pub fn silence(length: Duration) -> Segment {
    Segment {
        level: 0.0,
        length,
    }
}

struct FlagTracks(Arc<AtomicBool>);

impl MediaTracks for FlagTracks {
    fn stop_all(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Plays back scripted input levels, one script per `start_capture`.
///
/// After its script, a stream keeps producing silence until released.
#[derive(Default)]
pub struct ScriptedCapture {
    scripts: Mutex<VecDeque<Vec<Segment>>>,
    unavailable: AtomicBool,
    tracks: Mutex<Vec<Arc<AtomicBool>>>,
    frames_sent: Arc<AtomicUsize>,
}

impl ScriptedCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_script(&self, script: Vec<Segment>) {
        self.scripts.lock().unwrap().push_back(script);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn streams_opened(&self) -> usize {
        self.tracks.lock().unwrap().len()
    }

    pub fn all_tracks_stopped(&self) -> bool {
        self.tracks
            .lock()
            .unwrap()
            .iter()
            .all(|t| t.load(Ordering::SeqCst))
    }

    pub fn frames_sent(&self) -> usize {
        self.frames_sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioCapture for ScriptedCapture {
    async fn start_capture(&self) -> Result<CaptureStream, VoiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(VoiceError::DeviceUnavailable(
                "permission denied".to_string(),
            ));
        }
        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let stopped = Arc::new(AtomicBool::new(false));
        self.tracks.lock().unwrap().push(Arc::clone(&stopped));

        let (tx, rx) = mpsc::channel(64);
        let frames_sent = Arc::clone(&self.frames_sent);
        tokio::spawn(async move {
            let started = tokio::time::Instant::now();
            let mut ticker = tokio::time::interval(FRAME_PERIOD);
            loop {
                ticker.tick().await;
                let level = level_at(&script, started.elapsed());
                if tx.send(vec![level; FRAME_SAMPLES]).await.is_err() {
                    break;
                }
                frames_sent.fetch_add(1, Ordering::SeqCst);
            }
        });

        Ok(CaptureStream::new(
            AudioFormat::default(),
            rx,
            Box::new(FlagTracks(stopped)),
        ))
    }
}

fn level_at(script: &[Segment], elapsed: Duration) -> f32 {
    let mut offset = Duration::ZERO;
    for segment in script {
        offset += segment.length;
        if elapsed < offset {
            return segment.level;
        }
    }
    0.0
}

/// Returns queued transcripts in order.
#[derive(Default)]
pub struct ScriptedTranscriber {
    replies: Mutex<VecDeque<Result<String, VoiceError>>>,
    calls: AtomicUsize,
}

impl ScriptedTranscriber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
    }

    pub fn fail(&self, error: VoiceError) {
        self.replies.lock().unwrap().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(&self, audio: &[u8], mime_type: &str) -> Result<String, VoiceError> {
        assert_eq!(mime_type, "audio/wav");
        assert_eq!(&audio[..4], b"RIFF");
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(ms(300)).await;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(VoiceError::TranscriptionFailed("no reply queued".into())))
    }
}

/// "Synthesizes" by echoing the text bytes and remembering what was said.
#[derive(Default)]
pub struct EchoSynthesizer {
    spoken: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl EchoSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str, _voice_name: &str) -> Result<Vec<u8>, VoiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VoiceError::SynthesisFailed("503".to_string()));
        }
        self.spoken.lock().unwrap().push(text.to_string());
        tokio::time::sleep(ms(100)).await;
        Ok(text.as_bytes().to_vec())
    }
}

/// Pretends to play audio for a fixed time, tracking overlap.
pub struct TimedOutput {
    play_time: Duration,
    active: Arc<AtomicUsize>,
    max_active: AtomicUsize,
    completed: Mutex<Vec<String>>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TimedOutput {
    pub fn new(play_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            play_time,
            active: Arc::new(AtomicUsize::new(0)),
            max_active: AtomicUsize::new(0),
            completed: Mutex::new(Vec::new()),
        })
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioOutput for TimedOutput {
    async fn play(&self, audio: Vec<u8>) -> Result<(), VoiceError> {
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(Arc::clone(&self.active));

        tokio::time::sleep(self.play_time).await;
        self.completed
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(&audio).into_owned());
        Ok(())
    }
}

/// A controller wired to fakes, with handles to inspect them.
pub struct Harness {
    pub controller: Arc<TurnController>,
    pub capture: Arc<ScriptedCapture>,
    pub microphone: Microphone,
    pub transcriber: Arc<ScriptedTranscriber>,
    pub synthesizer: Arc<EchoSynthesizer>,
    pub output: Arc<TimedOutput>,
    pub narration: Arc<NarrationPlayer>,
}

pub fn harness() -> Harness {
    harness_with(AgentContext::default())
}

pub fn harness_with(context: AgentContext) -> Harness {
    let capture = ScriptedCapture::new();
    let microphone = Microphone::new(capture.clone());
    let transcriber = ScriptedTranscriber::new();
    let synthesizer = EchoSynthesizer::new();
    let output = TimedOutput::new(ms(500));
    let narration = Arc::new(NarrationPlayer::new(synthesizer.clone(), output.clone()));
    let controller = Arc::new(TurnController::new(
        Arc::new(context),
        microphone.clone(),
        transcriber.clone(),
        Arc::clone(&narration),
        Scriptwriter::fixed(),
    ));
    Harness {
        controller,
        capture,
        microphone,
        transcriber,
        synthesizer,
        output,
        narration,
    }
}

#[derive(Default)]
pub struct StaticQuestions(pub Vec<Question>);

#[async_trait]
impl QuestionSource for StaticQuestions {
    async fn questions(&self) -> Result<Vec<Question>, VoiceError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct MemorySink {
    pub records: Mutex<Vec<ResponseRecord>>,
    pub completed: Mutex<Vec<String>>,
    appends: Mutex<usize>,
    fail_on: Option<usize>,
}

impl MemorySink {
    /// Rejects the `nth` append (1-based) and accepts every other one.
    pub fn failing_on(nth: usize) -> Self {
        Self {
            fail_on: Some(nth),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ResponseSink for MemorySink {
    async fn append(&self, record: &ResponseRecord) -> Result<(), VoiceError> {
        let attempt = {
            let mut appends = self.appends.lock().unwrap();
            *appends += 1;
            *appends
        };
        if self.fail_on == Some(attempt) {
            return Err(VoiceError::Sink("backend returned 503".to_string()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn complete(&self, session_id: &str) -> Result<(), VoiceError> {
        self.completed.lock().unwrap().push(session_id.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryProfile {
    pub saved: Mutex<Vec<String>>,
}

#[async_trait]
impl ProfileStore for MemoryProfile {
    async fn save_preferred_name(&self, name: &str) -> Result<(), VoiceError> {
        self.saved.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

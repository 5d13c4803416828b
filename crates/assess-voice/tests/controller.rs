mod common;

use assess_types::{AgentContext, Utterance};
use assess_voice::{
    LeadIn, NamePreferenceDirective, TurnEvent, TurnOutcome, TurnPhase, TurnRequest, VoiceError,
};
use common::*;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};

fn drain(rx: &mut broadcast::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn phases(events: &[TurnEvent]) -> Vec<TurnPhase> {
    events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::PhaseChanged { to, .. } => Some(*to),
            _ => None,
        })
        .collect()
}

fn collected(rx: &mut mpsc::UnboundedReceiver<Utterance>) -> Vec<Utterance> {
    let mut out = Vec::new();
    while let Ok(u) = rx.try_recv() {
        out.push(u);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn five_seconds_of_speech_yields_one_utterance_and_a_followup_prompt() {
    let h = harness();
    h.capture
        .push_script(vec![speech(ms(5_000)), silence(ms(2_100))]);
    h.transcriber.reply("Sé que la IA aprende de datos.");
    h.transcriber.reply("No, nada más.");

    let mut events = h.controller.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = h
        .controller
        .run_turn(
            TurnRequest::new("¿Qué sabes de IA?").with_lead_in(LeadIn::Greeting),
            &tx,
        )
        .await
        .unwrap();

    let utterances = collected(&mut rx);
    assert_eq!(utterances.len(), 1, "no-more follow-up must not be emitted");
    let utterance = &utterances[0];
    assert_eq!(utterance.text, "Sé que la IA aprende de datos.");
    assert!(
        (5_000..=5_100).contains(&utterance.duration_ms),
        "duration was {}ms",
        utterance.duration_ms
    );
    assert_eq!(
        outcome,
        TurnOutcome::Answered {
            utterances: vec![utterance.clone()]
        }
    );

    let spoken = h.synthesizer.spoken();
    assert!(spoken[0].contains("¿Qué sabes de IA?"));
    assert!(spoken[0].starts_with("Hola"));
    assert_eq!(spoken[1], "¿Hay algo más que quieras añadir?");

    let events = drain(&mut events);
    assert_eq!(
        phases(&events),
        vec![
            TurnPhase::Speaking,
            TurnPhase::Listening,
            TurnPhase::Processing,
            TurnPhase::Followup,
            TurnPhase::Processing,
            TurnPhase::Idle,
        ]
    );
    assert!(events.contains(&TurnEvent::Status("Listening…".to_string())));
    assert!(events.contains(&TurnEvent::Status("Processing…".to_string())));
    assert_eq!(h.controller.phase(), TurnPhase::Idle);
    assert!(h.capture.all_tracks_stopped());
    assert!(!h.microphone.is_active());
}

#[tokio::test(start_paused = true)]
async fn followup_with_content_is_a_second_utterance() {
    let h = harness();
    h.transcriber.reply("La uso para programar.");
    h.transcriber.reply("También para traducir textos.");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = h
        .controller
        .run_turn(TurnRequest::new("¿Usas IA?"), &tx)
        .await
        .unwrap();

    let utterances = collected(&mut rx);
    assert_eq!(utterances.len(), 2);
    assert_eq!(utterances[1].text, "También para traducir textos.");
    assert!(matches!(outcome, TurnOutcome::Answered { utterances } if utterances.len() == 2));
}

#[tokio::test(start_paused = true)]
async fn punctuation_only_followup_is_dropped_without_ending_the_answer() {
    let h = harness();
    h.transcriber.reply("La uso para programar.");
    h.transcriber.reply("…?!");

    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = h
        .controller
        .run_turn(TurnRequest::new("¿Usas IA?"), &tx)
        .await
        .unwrap();

    let utterances = collected(&mut rx);
    assert_eq!(utterances.len(), 1);
    assert_eq!(utterances[0].text, "La uso para programar.");
    assert!(matches!(outcome, TurnOutcome::Answered { utterances } if utterances.len() == 1));
}

#[tokio::test(start_paused = true)]
async fn hard_cap_stops_a_noisy_recording() {
    let mut context = AgentContext::default();
    context.limits.max_user_turn_ms = 4_000;
    let h = harness_with(context);
    h.capture.push_script(vec![speech(ms(60_000))]);
    h.transcriber.reply("Hablo sin parar.");
    h.transcriber.reply("nada más");

    let (tx, mut rx) = mpsc::unbounded_channel();
    h.controller
        .run_turn(TurnRequest::new("¿Algo?"), &tx)
        .await
        .unwrap();

    let utterances = collected(&mut rx);
    assert_eq!(utterances.len(), 1);
    assert!(utterances[0].duration_ms >= 4_000 && utterances[0].duration_ms < 4_200);
}

#[tokio::test(start_paused = true)]
async fn name_preference_reports_choice_without_emitting_an_utterance() {
    let h = harness();
    h.transcriber.reply("prefiero que me digas Jose");

    let reported = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&reported);
    let directive = NamePreferenceDirective::new(
        vec!["Maria".to_string(), "Jose".to_string()],
        move |name| seen.lock().unwrap().push(name.to_string()),
    );

    let mut events = h.controller.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = h
        .controller
        .run_turn(
            TurnRequest::new("¿Qué sabes de IA?").with_name_directive(directive),
            &tx,
        )
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TurnOutcome::NameResolved {
            name: "Jose".to_string(),
            defaulted: false
        }
    );
    assert_eq!(*reported.lock().unwrap(), vec!["Jose".to_string()]);
    assert!(collected(&mut rx).is_empty());
    assert_eq!(h.transcriber.calls(), 1, "no follow-up after a name turn");

    let spoken = h.synthesizer.spoken();
    assert!(spoken[0].contains("Maria o Jose"));
    assert!(!spoken[0].contains("¿Qué sabes de IA?"));
    assert_eq!(spoken.last().unwrap(), "Perfecto, te llamaré Jose.");

    let events = drain(&mut events);
    assert_eq!(
        phases(&events),
        vec![
            TurnPhase::Speaking,
            TurnPhase::Listening,
            TurnPhase::Processing,
            TurnPhase::Idle
        ]
    );
    assert!(events.contains(&TurnEvent::NameChosen {
        name: "Jose".to_string(),
        defaulted: false
    }));
}

#[tokio::test(start_paused = true)]
async fn unmatched_name_is_reasked_then_defaults_to_first_candidate() {
    let h = harness();
    h.transcriber.reply("como sea");
    h.transcriber.reply("me da igual");
    let candidates = vec!["Maria".to_string(), "Jose".to_string()];
    let (tx, _rx) = mpsc::unbounded_channel();

    let first = h
        .controller
        .run_turn(
            TurnRequest::new("q").with_name_directive(NamePreferenceDirective::new(
                candidates.clone(),
                |_| panic!("nothing was chosen"),
            )),
            &tx,
        )
        .await
        .unwrap();
    assert_eq!(first, TurnOutcome::NameUnresolved);

    let second = h
        .controller
        .run_turn(
            TurnRequest::new("q").with_name_directive(
                NamePreferenceDirective::new(candidates, |_| {}).with_attempt(2),
            ),
            &tx,
        )
        .await
        .unwrap();
    assert_eq!(
        second,
        TurnOutcome::NameResolved {
            name: "Maria".to_string(),
            defaulted: true
        }
    );

    let spoken = h.synthesizer.spoken();
    assert!(spoken.iter().any(|s| s.starts_with("Perdona, no te he entendido")));
}

#[tokio::test(start_paused = true)]
async fn transcription_failure_returns_to_idle_without_an_utterance() {
    let h = harness();
    h.transcriber
        .fail(VoiceError::TranscriptionFailed("502".to_string()));
    h.transcriber.reply("Segunda vez.");
    h.transcriber.reply("nada más");

    let mut events = h.controller.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let err = h
        .controller
        .run_turn(TurnRequest::new("¿Qué sabes de IA?"), &tx)
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::TranscriptionFailed(_)));
    assert!(err.is_recoverable());
    assert!(collected(&mut rx).is_empty());
    assert_eq!(h.controller.phase(), TurnPhase::Idle);
    assert!(h.capture.all_tracks_stopped());
    assert_eq!(phases(&drain(&mut events)).last(), Some(&TurnPhase::Idle));

    // Re-entering retries the question.
    h.controller
        .run_turn(TurnRequest::new("¿Qué sabes de IA?"), &tx)
        .await
        .unwrap();
    assert_eq!(collected(&mut rx).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn synthesis_failure_aborts_before_listening() {
    let h = harness();
    h.synthesizer.set_failing(true);

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = h
        .controller
        .run_turn(TurnRequest::new("q"), &tx)
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::SynthesisFailed(_)));
    assert_eq!(h.capture.streams_opened(), 0);
    assert_eq!(h.controller.phase(), TurnPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn missing_microphone_is_fatal_for_the_turn() {
    let h = harness();
    h.capture.set_unavailable(true);

    let (tx, _rx) = mpsc::unbounded_channel();
    let err = h
        .controller
        .run_turn(TurnRequest::new("q"), &tx)
        .await
        .unwrap_err();
    assert!(matches!(err, VoiceError::DeviceUnavailable(_)));
    assert!(!err.is_recoverable());
    assert!(!h.microphone.is_active());
}

#[tokio::test(start_paused = true)]
async fn second_turn_is_refused_while_one_is_active() {
    let h = harness();
    h.transcriber.reply("respuesta");
    h.transcriber.reply("nada más");

    let controller = Arc::clone(&h.controller);
    let mut events = h.controller.subscribe();
    let running = tokio::spawn(async move {
        let (tx, _rx) = mpsc::unbounded_channel();
        controller.run_turn(TurnRequest::new("q"), &tx).await
    });

    loop {
        if let Ok(TurnEvent::PhaseChanged {
            to: TurnPhase::Speaking,
            ..
        }) = events.recv().await
        {
            break;
        }
    }
    let (tx, _rx) = mpsc::unbounded_channel();
    let refused = h.controller.run_turn(TurnRequest::new("q"), &tx).await;
    assert!(matches!(refused, Err(VoiceError::TurnInProgress)));

    assert!(running.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn turn_is_refused_while_narration_plays() {
    let h = harness();
    let narration = Arc::clone(&h.narration);
    let speaking = tokio::spawn(async move { narration.speak("Un momento.", "Kore").await });
    tokio::time::sleep(ms(50)).await;
    assert!(h.narration.is_speaking());

    let (tx, _rx) = mpsc::unbounded_channel();
    let refused = h.controller.run_turn(TurnRequest::new("q"), &tx).await;
    assert!(matches!(refused, Err(VoiceError::TurnInProgress)));
    assert!(speaking.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn teardown_mid_listening_releases_everything() {
    let h = harness();
    h.capture.push_script(vec![speech(ms(100_000))]);

    let controller = Arc::clone(&h.controller);
    let mut events = h.controller.subscribe();
    let running = tokio::spawn(async move {
        let (tx, rx) = mpsc::unbounded_channel();
        let result = controller.run_turn(TurnRequest::new("q"), &tx).await;
        (result, rx)
    });

    loop {
        if let Ok(TurnEvent::PhaseChanged {
            to: TurnPhase::Listening,
            ..
        }) = events.recv().await
        {
            break;
        }
    }
    tokio::time::sleep(ms(1_000)).await;
    assert!(h.microphone.is_active());

    h.controller.teardown();
    assert_eq!(h.controller.phase(), TurnPhase::Idle);
    let at_teardown = drain(&mut events);
    assert_eq!(phases(&at_teardown), vec![TurnPhase::Idle]);

    let (result, mut utterances) = running.await.unwrap();
    assert!(matches!(result, Err(VoiceError::Cancelled)));
    assert!(utterances.try_recv().is_err());
    assert!(h.capture.all_tracks_stopped());
    assert!(!h.microphone.is_active());
    assert_eq!(h.transcriber.calls(), 0);

    let frames = h.capture.frames_sent();
    tokio::time::sleep(ms(5_000)).await;
    assert_eq!(h.capture.frames_sent(), frames, "capture kept producing");
    assert!(drain(&mut events).is_empty(), "events after teardown");
}

#[tokio::test(start_paused = true)]
async fn teardown_while_speaking_interrupts_narration() {
    let h = harness();
    let controller = Arc::clone(&h.controller);
    let mut events = h.controller.subscribe();
    let running = tokio::spawn(async move {
        let (tx, _rx) = mpsc::unbounded_channel();
        controller.run_turn(TurnRequest::new("q"), &tx).await
    });

    loop {
        if let Ok(TurnEvent::PhaseChanged {
            to: TurnPhase::Speaking,
            ..
        }) = events.recv().await
        {
            break;
        }
    }
    tokio::time::sleep(ms(200)).await;
    h.controller.teardown();

    assert!(matches!(running.await.unwrap(), Err(VoiceError::Cancelled)));
    assert!(!h.narration.is_speaking());
    assert_eq!(h.output.active(), 0);
    assert!(h.output.completed().is_empty());
    assert_eq!(h.capture.streams_opened(), 0);
}

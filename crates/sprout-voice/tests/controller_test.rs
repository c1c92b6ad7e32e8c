//! End-to-end controller tests over scripted backends and a placeholder
//! speaker, with the tokio clock paused so debounce and fallback timing are
//! deterministic.

use sprout_core::{
    ChildProfile, CompanionConfig, ConversationBackend, ConversationReply, CoreError,
    RoutineCatalog, ScriptedBackend, TimeOfDay,
};
use sprout_voice::controller::{CompanionController, CompanionEvent};
use sprout_voice::listener::MicControl;
use sprout_voice::speaker::{PlaceholderSpeaker, SpeakerSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

fn reply(message: &str) -> ConversationReply {
    ConversationReply {
        message: message.to_string(),
        indicates_progress: false,
        indicates_frustration: false,
    }
}

fn progress(message: &str) -> ConversationReply {
    ConversationReply {
        indicates_progress: true,
        ..reply(message)
    }
}

fn frustrated(message: &str) -> ConversationReply {
    ConversationReply {
        indicates_frustration: true,
        ..reply(message)
    }
}

fn profile() -> ChildProfile {
    ChildProfile {
        name: "Maya".to_string(),
        likes: vec!["dinosaurs".to_string()],
        ..Default::default()
    }
}

fn build(
    backend: Arc<ScriptedBackend>,
    speaker: Arc<PlaceholderSpeaker>,
) -> (
    Arc<CompanionController>,
    mpsc::UnboundedReceiver<CompanionEvent>,
) {
    let (controller, events) = CompanionController::new(
        &CompanionConfig::default(),
        profile(),
        RoutineCatalog::builtin(),
        backend as Arc<dyn ConversationBackend>,
        speaker as Arc<dyn SpeakerSink>,
    );
    controller.pin_time_of_day(TimeOfDay::Morning);
    (controller, events)
}

fn drain_events(rx: &mut mpsc::UnboundedReceiver<CompanionEvent>) -> Vec<CompanionEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

/// Mic double that records start/stop calls in order.
#[derive(Default)]
struct RecordingMic {
    listening: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl MicControl for RecordingMic {
    fn start(&self) {
        self.listening.store(true, Ordering::SeqCst);
        self.calls.lock().unwrap().push("start");
    }

    fn stop(&self) {
        self.listening.store(false, Ordering::SeqCst);
        self.calls.lock().unwrap().push("stop");
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[tokio::test(start_paused = true)]
async fn serializes_turns_one_at_a_time() {
    let backend =
        Arc::new(ScriptedBackend::always("okay!").with_delay(Duration::from_secs(1)));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend.clone(), speaker);

    controller.on_transcript("one");
    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.on_transcript("two");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(backend.seen_utterances(), vec!["one", "two"]);
    assert_eq!(backend.max_in_flight(), 1);
}

#[tokio::test(start_paused = true)]
async fn transcripts_during_playback_wait_their_turn() {
    let backend = Arc::new(ScriptedBackend::always("okay!"));
    let speaker = Arc::new(PlaceholderSpeaker::with_playback(Duration::from_secs(2)));
    let (controller, _events) = build(backend.clone(), speaker.clone());

    controller.on_transcript("first");
    // Playback of the first reply runs from ~300ms to ~2.3s; both of these
    // land mid-playback (spaced past the debounce window) and must queue.
    tokio::time::sleep(Duration::from_millis(500)).await;
    controller.on_transcript("second");
    tokio::time::sleep(Duration::from_millis(400)).await;
    controller.on_transcript("third");

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(backend.seen_utterances(), vec!["first", "second", "third"]);
    assert_eq!(backend.max_in_flight(), 1);
    assert_eq!(speaker.spoken().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn mic_is_stopped_during_playback_and_resumed_after() {
    let backend = Arc::new(ScriptedBackend::always("hello Maya!"));
    let speaker = Arc::new(PlaceholderSpeaker::with_playback(Duration::from_secs(1)));
    let (controller, _events) = build(backend, speaker);
    let mic = Arc::new(RecordingMic::default());
    controller.attach_mic(mic.clone() as Arc<dyn MicControl>);
    controller.start_listening();
    assert!(mic.is_listening());

    controller.on_transcript("hi");
    tokio::time::sleep(Duration::from_millis(800)).await;

    // Mid-playback: speaking, not listening, mic off.
    let status = controller.status();
    assert!(status.speaking);
    assert!(!status.listening);
    assert!(!mic.is_listening());

    tokio::time::sleep(Duration::from_secs(2)).await;
    let status = controller.status();
    assert!(!status.speaking);
    assert!(status.listening);
    assert!(mic.is_listening());

    let calls = mic.calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["start", "stop", "start"]);
}

#[tokio::test(start_paused = true)]
async fn progress_speaks_reply_plus_next_instruction() {
    let backend = Arc::new(ScriptedBackend::new(vec![Ok(progress("Great job!"))]));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend, speaker.clone());

    controller.on_transcript("time to brush my teeth");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.status().step_index, 0);

    controller.on_transcript("I put the toothpaste on");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = controller.status();
    assert_eq!(status.active_routine.as_deref(), Some("teeth"));
    assert_eq!(status.step_index, 1);

    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 2);
    // Reply first, then the instruction for the step the cursor moved to.
    assert!(spoken[1].starts_with("Great job!"));
    assert!(spoken[1].contains("Brush the top teeth"));
}

#[tokio::test(start_paused = true)]
async fn progress_on_last_step_ends_the_routine() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Ok(progress("Nice!")),
        Ok(progress("Nice!")),
        Ok(progress("Nice!")),
        Ok(progress("All done!")),
    ]));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend, speaker.clone());

    controller.on_transcript("let's brush teeth");
    tokio::time::sleep(Duration::from_secs(1)).await;

    for _ in 0..4 {
        controller.on_transcript("done!");
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let status = controller.status();
    assert_eq!(status.active_routine, None);
    assert_eq!(status.step_index, 0);
    // The final reply is spoken as-is, with no further instruction appended.
    let spoken = speaker.spoken();
    assert_eq!(spoken.last().map(String::as_str), Some("All done!"));
}

#[tokio::test(start_paused = true)]
async fn frustration_ladder_escalates_and_raises_help_alert() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Ok(frustrated("That's okay.")),
        Ok(frustrated("Let's try again.")),
        Ok(frustrated("You're doing fine.")),
        Ok(frustrated("It's alright.")),
    ]));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, mut events) = build(backend, speaker.clone());

    // Counter 1: mild, no intervention line.
    controller.on_transcript("it won't work");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(speaker.spoken().len(), 1);

    // Counter 2: still mild.
    controller.on_transcript("this is hard");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(speaker.spoken().len(), 2);

    // Counter 3: moderate, distraction drawn from likes.
    controller.on_transcript("I can't do it");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 4);
    assert!(spoken[3].contains("dinosaurs"));

    // Counter 4: high, grown-up suggestion plus sticky alert.
    controller.on_transcript("no no no");
    tokio::time::sleep(Duration::from_secs(1)).await;
    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 6);
    assert!(spoken[5].contains("Maya"));
    assert!(spoken[5].contains("grown-up"));

    let status = controller.status();
    assert!(status.help_alert);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, CompanionEvent::HelpAlert(true))));

    // Alert survives progress; only the caregiver clears it.
    controller.dismiss_help_alert();
    let status = controller.status();
    assert!(!status.help_alert);
    assert_eq!(status.frustration_counter, 0);
}

#[tokio::test(start_paused = true)]
async fn failure_speaks_filler_then_one_offline_phrase() {
    let backend = Arc::new(ScriptedBackend::new(Vec::new()));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, mut events) = build(backend, speaker.clone());

    controller.on_transcript("hello?");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 1);
    assert!(spoken[0].contains("thinking"));
    assert!(controller.status().offline);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, CompanionEvent::Offline(true))));

    // The delayed phrase fires once, well after the filler.
    tokio::time::sleep(Duration::from_secs(30)).await;
    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 2);
    assert_ne!(spoken[1], spoken[0]);
}

#[tokio::test(start_paused = true)]
async fn new_transcript_cancels_the_pending_offline_phrase() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(CoreError::Conversation("down".to_string())),
        Ok(reply("back online!")),
    ]));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, mut events) = build(backend, speaker.clone());

    controller.on_transcript("hello?");
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(speaker.spoken().len(), 1);

    // A fresh utterance before the 10s fallback supersedes the timer, and a
    // successful turn clears the offline flag.
    controller.on_transcript("are you there?");
    tokio::time::sleep(Duration::from_secs(30)).await;

    let spoken = speaker.spoken();
    assert_eq!(spoken.len(), 2);
    assert_eq!(spoken[1], "back online!");
    assert!(!controller.status().offline);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, CompanionEvent::Offline(false))));
}

#[tokio::test(start_paused = true)]
async fn repeated_failures_keep_a_single_fallback_timer() {
    let backend = Arc::new(ScriptedBackend::new(Vec::new()));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend, speaker.clone());

    controller.on_transcript("hello?");
    tokio::time::sleep(Duration::from_secs(3)).await;
    controller.on_transcript("hello??");
    tokio::time::sleep(Duration::from_secs(30)).await;

    // Two fillers (one per failed turn) and exactly one delayed phrase, from
    // the replacement timer.
    assert_eq!(speaker.spoken().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn transcript_during_offline_phrase_playback_is_processed() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(CoreError::Conversation("down".to_string())),
        Ok(reply("here it comes!")),
    ]));
    let speaker = Arc::new(PlaceholderSpeaker::with_playback(Duration::from_secs(2)));
    let (controller, _events) = build(backend.clone(), speaker.clone());

    controller.on_transcript("tell me a story");
    // Filler plays ~0.3-2.3s; the delayed offline phrase starts ~12.3s and
    // plays until ~14.3s. This one lands mid-phrase and must queue.
    tokio::time::sleep(Duration::from_secs(13)).await;
    controller.on_transcript("are you there");
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(
        backend.seen_utterances(),
        vec!["tell me a story", "are you there"]
    );
    assert_eq!(controller.status().queue_len, 0);
    assert_eq!(
        speaker.spoken().last().map(String::as_str),
        Some("here it comes!")
    );
}

#[tokio::test(start_paused = true)]
async fn progress_outside_a_routine_resets_the_counter() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Ok(frustrated("That's okay.")),
        Ok(frustrated("Take your time.")),
        Ok(progress("You did it!")),
    ]));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend, speaker);

    controller.on_transcript("it won't fit");
    tokio::time::sleep(Duration::from_secs(1)).await;
    controller.on_transcript("still stuck");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(controller.status().frustration_counter, 2);

    // No routine is active; the reset applies regardless.
    controller.on_transcript("oh I got it");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = controller.status();
    assert_eq!(status.active_routine, None);
    assert_eq!(status.frustration_counter, 0);
}

#[tokio::test(start_paused = true)]
async fn backend_failure_does_not_wedge_the_queue() {
    let backend = Arc::new(ScriptedBackend::new(vec![
        Err(CoreError::Conversation("down".to_string())),
        Ok(reply("recovered")),
    ]));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend.clone(), speaker.clone());

    controller.on_transcript("first");
    tokio::time::sleep(Duration::from_secs(20)).await;
    controller.on_transcript("second");
    tokio::time::sleep(Duration::from_secs(1)).await;

    // The failed turn released the busy guard; the next turn went through.
    assert_eq!(backend.seen_utterances(), vec!["first", "second"]);
    assert!(speaker.spoken().iter().any(|s| s == "recovered"));
}

#[tokio::test(start_paused = true)]
async fn trigger_match_is_skipped_while_a_routine_is_active() {
    let backend = Arc::new(ScriptedBackend::always("keep going!"));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend.clone(), speaker);

    controller.on_transcript("brush my teeth please");
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        controller.status().active_routine.as_deref(),
        Some("teeth")
    );

    // Mentions another trigger word, but mid-routine it goes to the service.
    controller.on_transcript("can I wash my hands");
    tokio::time::sleep(Duration::from_secs(1)).await;

    let status = controller.status();
    assert_eq!(status.active_routine.as_deref(), Some("teeth"));
    assert_eq!(backend.seen_utterances(), vec!["can I wash my hands"]);
    let requests = backend.seen_requests();
    assert_eq!(
        requests[0].active_routine.as_ref().map(|r| r.id.as_str()),
        Some("teeth")
    );
}

#[tokio::test(start_paused = true)]
async fn history_sent_to_the_service_is_truncated() {
    let backend = Arc::new(ScriptedBackend::always("mhm"));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend.clone(), speaker);

    for i in 0..12 {
        controller.on_transcript(format!("line {}", i));
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    let requests = backend.seen_requests();
    let last = requests.last().unwrap();
    assert_eq!(last.recent_history.len(), 10);
    // Full log keeps everything.
    assert_eq!(controller.log().len(), 24);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drops_pending_work() {
    let backend = Arc::new(ScriptedBackend::always("hello"));
    let speaker = Arc::new(PlaceholderSpeaker::new());
    let (controller, _events) = build(backend.clone(), speaker.clone());

    controller.on_transcript("hi there");
    controller.shutdown();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(backend.seen_utterances().is_empty());
    assert!(speaker.spoken().is_empty());
    controller.on_transcript("still there?");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(backend.seen_utterances().is_empty());
}

//! **Turn-taking controller** — the heart of the companion.
//!
//! Owns the transcript queue, the mic/speaker mutual exclusion, the routine
//! step cursor, the frustration counter, and the avatar-state derivation.
//! Transcripts are debounced on intake, processed strictly one at a time in
//! FIFO order, and every awaited external call degrades to a spoken fallback
//! instead of an error. The busy guard is a compare-and-set flag released on
//! every exit path, so the queue cannot deadlock.

use crate::avatar::{derive_avatar, AvatarInputs, AvatarState, TouchGesture};
use crate::frustration::{FrustrationLevel, FrustrationState};
use crate::listener::MicControl;
use crate::speaker::SpeakerSink;
use futures::future::{abortable, AbortHandle, Aborted};
use futures::FutureExt;
use sprout_core::{
    ChildProfile, CompanionConfig, ConversationBackend, ConversationReply, ConversationRequest,
    Message, MessageRole, Routine, RoutineCatalog, TimeOfDay,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Spoken immediately when the remote service fails, before the delayed
/// offline phrase.
const FILLER_PHRASE: &str = "Hold on, I'm thinking...";

/// Offline phrase set, one of which is spoken if the remote service stays
/// unreachable past the fallback delay.
const OFFLINE_PHRASES: [&str; 4] = [
    "Hmm, my thinking cap is a little slow right now. Let's try again in a moment!",
    "My brain is taking a tiny nap. Can you say that one more time?",
    "Oops, I lost my train of thought! Let's keep playing anyway.",
    "I'm a little sleepy in my head, but I'm still right here with you!",
];

/// Clock-seeded pick, same scheme as the distraction offer.
fn pick_phrase(phrases: &[String]) -> String {
    let nanos = chrono::Utc::now().timestamp_subsec_nanos() as usize;
    phrases[nanos % phrases.len()].clone()
}

/// Events surfaced to the UI layer.
#[derive(Debug, Clone)]
pub enum CompanionEvent {
    /// Raw transcript for live captioning; emitted pre-debounce and never
    /// waits on the queue.
    Caption(String),
    /// A message was appended to the conversation log.
    MessageAppended(Message),
    /// The derived avatar state changed (or may have).
    Avatar(AvatarState),
    /// Offline indicator: true after a remote failure, false on recovery.
    Offline(bool),
    /// The sticky caregiver help alert was raised or dismissed.
    HelpAlert(bool),
    /// Speech output failed on both paths; spoken interaction pauses until
    /// the next utterance.
    SpeechTrouble(String),
}

/// The active guided routine, if any. At most one at a time.
#[derive(Debug, Clone)]
pub struct RoutineSession {
    pub routine: Routine,
    /// Zero-based cursor into `routine.steps`.
    pub step_index: usize,
}

/// Snapshot of controller state for the UI and for tests.
#[derive(Debug, Clone)]
pub struct ControllerStatus {
    pub listening: bool,
    pub speaking: bool,
    pub processing: bool,
    pub queue_len: usize,
    pub active_routine: Option<String>,
    pub step_index: usize,
    pub frustration_counter: u32,
    pub frustration_level: FrustrationLevel,
    pub help_alert: bool,
    pub offline: bool,
}

struct ControllerState {
    queue: VecDeque<String>,
    /// Most recent transcript inside the debounce window.
    pending: Option<String>,
    /// Bumped per intake; a stale debounce task sees a newer generation and
    /// drops out.
    debounce_gen: u64,
    /// Bumped per processing attempt; a scheduled offline phrase fires only
    /// if nothing superseded it.
    attempt_gen: u64,
    listening: bool,
    speaking: bool,
    processing: bool,
    offline: bool,
    session: Option<RoutineSession>,
    frustration: FrustrationState,
    log: Vec<Message>,
    gesture: Option<(AvatarState, Instant)>,
    fallback_timer: Option<JoinHandle<()>>,
    inflight: Option<AbortHandle>,
}

/// The turn-taking controller. Construct once per session; share via `Arc`.
pub struct CompanionController {
    profile: ChildProfile,
    catalog: RoutineCatalog,
    conversation: Arc<dyn ConversationBackend>,
    speaker: Arc<dyn SpeakerSink>,
    mic: Mutex<Option<Arc<dyn MicControl>>>,
    debounce: Duration,
    fallback_delay: Duration,
    gesture_hold: Duration,
    history_limit: usize,
    offline_phrases: Mutex<Vec<String>>,
    pinned_time: Mutex<Option<TimeOfDay>>,
    /// Single-flight guard for the queue drain. Not the cosmetic state value.
    draining: AtomicBool,
    /// Cleared on shutdown; callbacks against a disposed controller no-op.
    live: AtomicBool,
    state: Mutex<ControllerState>,
    events: mpsc::UnboundedSender<CompanionEvent>,
}

impl CompanionController {
    pub fn new(
        config: &CompanionConfig,
        profile: ChildProfile,
        catalog: RoutineCatalog,
        conversation: Arc<dyn ConversationBackend>,
        speaker: Arc<dyn SpeakerSink>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<CompanionEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Self {
            profile,
            catalog,
            conversation,
            speaker,
            mic: Mutex::new(None),
            debounce: Duration::from_millis(config.debounce_ms),
            fallback_delay: Duration::from_secs(config.offline_fallback_secs),
            gesture_hold: Duration::from_millis(config.gesture_hold_ms),
            history_limit: config.history_limit,
            offline_phrases: Mutex::new(
                OFFLINE_PHRASES.iter().map(|s| s.to_string()).collect(),
            ),
            pinned_time: Mutex::new(None),
            draining: AtomicBool::new(false),
            live: AtomicBool::new(true),
            state: Mutex::new(ControllerState {
                queue: VecDeque::new(),
                pending: None,
                debounce_gen: 0,
                attempt_gen: 0,
                listening: false,
                speaking: false,
                processing: false,
                offline: false,
                session: None,
                frustration: FrustrationState::new(),
                log: Vec::new(),
                gesture: None,
                fallback_timer: None,
                inflight: None,
            }),
            events: event_tx,
        });
        (controller, event_rx)
    }

    /// Attach the microphone control handle once the listener is running.
    pub fn attach_mic(&self, mic: Arc<dyn MicControl>) {
        *self.mic.lock().unwrap_or_else(|e| e.into_inner()) = Some(mic);
    }

    /// Replace the offline phrase set with caregiver overrides. An empty list
    /// keeps the defaults.
    pub fn set_offline_phrases(&self, phrases: Vec<String>) {
        if phrases.is_empty() {
            return;
        }
        *self.offline_phrases.lock().unwrap_or_else(|e| e.into_inner()) = phrases;
    }

    /// Pin the time-of-day bucket instead of reading the wall clock. Used by
    /// tests and demos that must not depend on when they run.
    pub fn pin_time_of_day(&self, bucket: TimeOfDay) {
        *self.pinned_time.lock().unwrap_or_else(|e| e.into_inner()) = Some(bucket);
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn mic_handle(&self) -> Option<Arc<dyn MicControl>> {
        self.mic.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn time_of_day(&self) -> TimeOfDay {
        self.pinned_time
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(TimeOfDay::now)
    }

    // ------------------------------------------------------------------
    // Transcript intake
    // ------------------------------------------------------------------

    /// Called by the speech input source for every finalized transcript.
    /// Near-duplicate results inside the debounce window coalesce to the most
    /// recent one; the raw text is surfaced for captioning regardless.
    pub fn on_transcript(self: &Arc<Self>, text: impl Into<String>) {
        if !self.live.load(Ordering::SeqCst) {
            return;
        }
        let text = text.into();
        let _ = self.events.send(CompanionEvent::Caption(text.clone()));

        let generation = {
            let mut st = self.state();
            st.pending = Some(text);
            st.debounce_gen += 1;
            st.debounce_gen
        };

        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.debounce).await;
            if !this.live.load(Ordering::SeqCst) {
                return;
            }
            let committed = {
                let mut st = this.state();
                if st.debounce_gen != generation {
                    // A newer result arrived inside the window.
                    return;
                }
                match st.pending.take() {
                    Some(t) => {
                        st.queue.push_back(t);
                        true
                    }
                    None => false,
                }
            };
            if committed && !this.speaker.is_speaking() {
                this.drain_queue().await;
            }
        });
    }

    // ------------------------------------------------------------------
    // Queue drain — single-flight
    // ------------------------------------------------------------------

    /// Idempotent and reentrant-safe: a second call while a drain is in
    /// flight is a no-op. Pops one transcript at a time, in receipt order,
    /// and never starts an item while the speaker is still playing a prior
    /// turn's reply.
    pub async fn drain_queue(self: &Arc<Self>) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                return;
            }
            loop {
                let next = self.state().queue.pop_front();
                let Some(text) = next else { break };
                self.handle_utterance(text).await;
                // The next item may start as soon as this one's playback has
                // ended, but never over it.
                if self.speaker.is_speaking() {
                    break;
                }
                if self.state().queue.is_empty() {
                    break;
                }
            }
            self.draining.store(false, Ordering::SeqCst);
            // A transcript may have been committed between the last pop and
            // the guard release; pick it up rather than strand it.
            if self.state().queue.is_empty() || self.speaker.is_speaking() {
                return;
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-utterance handling
    // ------------------------------------------------------------------

    async fn handle_utterance(self: &Arc<Self>, text: String) {
        info!(utterance = %text, "processing turn");
        // A new attempt supersedes any scheduled offline phrase.
        self.cancel_offline_fallback();
        self.push_message(MessageRole::User, text.clone());

        let matched = {
            let st = self.state();
            if st.session.is_none() {
                self.catalog.find_trigger_match(&text).cloned()
            } else {
                None
            }
        };

        if let Some(routine) = matched {
            self.start_routine(routine).await;
        } else {
            self.remote_turn(text).await;
        }
    }

    /// Trigger short-circuit: local, deterministic, no remote call.
    async fn start_routine(self: &Arc<Self>, routine: Routine) {
        let Some(first) = routine.steps.first().cloned() else {
            warn!(routine = %routine.id, "routine has no steps; ignoring trigger");
            return;
        };
        info!(routine = %routine.id, "starting routine");
        let greeting = format!("{} time! First: {}", routine.name, first.instruction);
        {
            let mut st = self.state();
            st.session = Some(RoutineSession {
                routine,
                step_index: 0,
            });
        }
        self.push_message(MessageRole::Assistant, greeting.clone());
        self.say(&greeting).await;
    }

    async fn remote_turn(self: &Arc<Self>, text: String) {
        let request = {
            let mut st = self.state();
            st.processing = true;
            let start = st.log.len().saturating_sub(self.history_limit);
            ConversationRequest {
                user_utterance: text,
                profile: self.profile.clone(),
                active_routine: st.session.as_ref().map(|s| s.routine.clone()),
                current_step_index: st.session.as_ref().map(|s| s.step_index).unwrap_or(0),
                recent_history: st.log[start..].to_vec(),
                time_of_day: self.time_of_day(),
            }
        };
        self.emit_avatar();

        let conversation = Arc::clone(&self.conversation);
        let (fut, abort_handle) = abortable(async move { conversation.respond(request).await });
        {
            let mut st = self.state();
            // Turns are serialized by the drain, so the slot is empty here in
            // steady state; the handle exists so shutdown() can cut a request
            // that is still on the wire.
            if let Some(stale) = st.inflight.replace(abort_handle) {
                stale.abort();
            }
        }

        let outcome = fut.await;
        {
            let mut st = self.state();
            st.processing = false;
            st.inflight = None;
        }

        match outcome {
            Ok(Ok(reply)) => {
                let was_offline = {
                    let mut st = self.state();
                    std::mem::replace(&mut st.offline, false)
                };
                if was_offline {
                    let _ = self.events.send(CompanionEvent::Offline(false));
                }
                self.apply_reply(reply).await;
            }
            Ok(Err(e)) => {
                warn!("conversation service failed: {}", e);
                self.speak_offline_fallback().await;
            }
            Err(Aborted) => {
                debug!("conversation turn superseded; dropping");
            }
        }
        self.emit_avatar();
    }

    // ------------------------------------------------------------------
    // Routine progression + frustration
    // ------------------------------------------------------------------

    async fn apply_reply(self: &Arc<Self>, reply: ConversationReply) {
        let (spoken, escalation) = {
            let mut st = self.state();
            let mut spoken = reply.message.clone();

            if reply.indicates_progress {
                // The reset applies to every progress signal, even outside a
                // routine; only the cursor needs an active session.
                st.frustration.record_progress();
                if let Some(session) = st.session.as_mut() {
                    let next_index = session.step_index + 1;
                    if next_index < session.routine.steps.len() {
                        // Read the next instruction before moving the cursor.
                        let next = session.routine.steps[next_index].instruction.clone();
                        spoken = format!("{} {}", reply.message, next);
                        session.step_index = next_index;
                    } else {
                        info!(routine = %session.routine.id, "routine complete");
                        st.session = None;
                    }
                }
            }

            let escalation = if reply.indicates_frustration {
                Some(st.frustration.record_frustration(&self.profile))
            } else {
                None
            };

            (spoken, escalation)
        };

        self.push_message(MessageRole::Assistant, spoken.clone());
        self.say(&spoken).await;

        if let Some(escalation) = escalation {
            if escalation.help_alert_raised {
                let _ = self.events.send(CompanionEvent::HelpAlert(true));
            }
            if let Some(line) = escalation.utterance {
                self.push_message(MessageRole::Assistant, line.clone());
                self.say(&line).await;
            }
        }
    }

    /// Abandon the active routine without finishing it.
    pub fn abandon_routine(&self) {
        let mut st = self.state();
        if st.session.take().is_some() {
            info!("routine abandoned");
        }
    }

    // ------------------------------------------------------------------
    // Failure fallback
    // ------------------------------------------------------------------

    // Returns a boxed future to break the async recursion cycle
    // (`speak_offline_fallback` → spawned timer → `drain_queue` →
    // `remote_turn` → `speak_offline_fallback`) so `Send` is provable.
    fn speak_offline_fallback(self: &Arc<Self>) -> futures::future::BoxFuture<'_, ()> {
        async move {
        {
            let mut st = self.state();
            st.offline = true;
        }
        let _ = self.events.send(CompanionEvent::Offline(true));
        self.push_message(MessageRole::Assistant, FILLER_PHRASE);
        self.say(FILLER_PHRASE).await;

        let generation = self.state().attempt_gen;
        let this = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(this.fallback_delay).await;
            if !this.live.load(Ordering::SeqCst) {
                return;
            }
            if this.state().attempt_gen != generation {
                // A newer transcript superseded this fallback.
                return;
            }
            let phrase = {
                let phrases = this
                    .offline_phrases
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                pick_phrase(&phrases)
            };
            this.push_message(MessageRole::Assistant, phrase.clone());
            this.say(&phrase).await;
            // This playback ran outside the drain loop, so transcripts that
            // queued behind it have no other wake-up.
            if !this.speaker.is_speaking() {
                this.drain_queue().await;
            }
        });

        let mut st = self.state();
        // One outstanding retry timer, never one per failure.
        if let Some(old) = st.fallback_timer.replace(timer) {
            old.abort();
        }
        }
        .boxed()
    }

    fn cancel_offline_fallback(&self) {
        let mut st = self.state();
        st.attempt_gen += 1;
        if let Some(timer) = st.fallback_timer.take() {
            timer.abort();
        }
    }

    // ------------------------------------------------------------------
    // Speech output — mic/speaker mutual exclusion
    // ------------------------------------------------------------------

    /// Speak through the output sink. The mic is stopped before playback
    /// starts and resumed only after it ends; Listening and Speaking are
    /// never simultaneously true.
    async fn say(self: &Arc<Self>, text: &str) {
        let was_listening = {
            let mut st = self.state();
            let was = st.listening;
            st.listening = false;
            st.speaking = true;
            was
        };
        if let Some(mic) = self.mic_handle() {
            mic.stop();
        }
        self.emit_avatar();

        if let Err(e) = self.speaker.speak(text).await {
            warn!("speech output failed on both paths: {}", e);
            let _ = self
                .events
                .send(CompanionEvent::SpeechTrouble(e.to_string()));
        }

        let resume = {
            let mut st = self.state();
            st.speaking = false;
            let resume = was_listening && self.live.load(Ordering::SeqCst);
            st.listening = resume;
            resume
        };
        if resume {
            if let Some(mic) = self.mic_handle() {
                mic.start();
            }
        }
        self.emit_avatar();
    }

    // ------------------------------------------------------------------
    // Mic toggle
    // ------------------------------------------------------------------

    pub fn start_listening(&self) {
        {
            let mut st = self.state();
            if st.speaking {
                return;
            }
            st.listening = true;
        }
        if let Some(mic) = self.mic_handle() {
            mic.start();
        }
        self.emit_avatar();
    }

    /// Explicitly stopping the mic also cancels any scheduled offline phrase:
    /// with the mic off there is nobody mid-conversation to reassure.
    pub fn stop_listening(&self) {
        self.cancel_offline_fallback();
        self.state().listening = false;
        if let Some(mic) = self.mic_handle() {
            mic.stop();
        }
        self.emit_avatar();
    }

    // ------------------------------------------------------------------
    // Avatar + gestures + alerts
    // ------------------------------------------------------------------

    /// Derived avatar display state. Pure function of current inputs.
    pub fn avatar_state(&self) -> AvatarState {
        let st = self.state();
        let gesture = st
            .gesture
            .and_then(|(expr, expiry)| (Instant::now() < expiry).then_some(expr));
        derive_avatar(AvatarInputs {
            help_alert: st.frustration.help_alert(),
            speaking: st.speaking,
            listening: st.listening,
            processing: st.processing,
            time_of_day: self.time_of_day(),
            frustration: st.frustration.level(),
            gesture,
        })
    }

    /// Touch interaction: transient expressive override, auto-reverting after
    /// the hold window.
    pub fn on_gesture(&self, gesture: TouchGesture) {
        let expiry = Instant::now() + self.gesture_hold;
        self.state().gesture = Some((gesture.expression(), expiry));
        self.emit_avatar();
    }

    /// Caregiver action: clears the sticky alert and resets frustration.
    pub fn dismiss_help_alert(&self) {
        self.state().frustration.dismiss_help_alert();
        let _ = self.events.send(CompanionEvent::HelpAlert(false));
        self.emit_avatar();
    }

    fn emit_avatar(&self) {
        let _ = self.events.send(CompanionEvent::Avatar(self.avatar_state()));
    }

    fn push_message(&self, role: MessageRole, content: impl Into<String>) {
        let message = Message::now(role, content);
        self.state().log.push(message.clone());
        let _ = self.events.send(CompanionEvent::MessageAppended(message));
    }

    // ------------------------------------------------------------------
    // Introspection + lifecycle
    // ------------------------------------------------------------------

    pub fn status(&self) -> ControllerStatus {
        let st = self.state();
        ControllerStatus {
            listening: st.listening,
            speaking: st.speaking,
            processing: st.processing,
            queue_len: st.queue.len(),
            active_routine: st.session.as_ref().map(|s| s.routine.id.clone()),
            step_index: st.session.as_ref().map(|s| s.step_index).unwrap_or(0),
            frustration_counter: st.frustration.counter(),
            frustration_level: st.frustration.level(),
            help_alert: st.frustration.help_alert(),
            offline: st.offline,
        }
    }

    /// Full conversation log (the request context is truncated separately).
    pub fn log(&self) -> Vec<Message> {
        self.state().log.clone()
    }

    /// Tear down: stop timers, abort in-flight work, silence the speaker.
    /// Late callbacks against the disposed controller become no-ops.
    pub fn shutdown(&self) {
        self.live.store(false, Ordering::SeqCst);
        {
            let mut st = self.state();
            if let Some(timer) = st.fallback_timer.take() {
                timer.abort();
            }
            if let Some(inflight) = st.inflight.take() {
                inflight.abort();
            }
            st.pending = None;
            st.queue.clear();
        }
        self.speaker.stop();
        if let Some(mic) = self.mic_handle() {
            mic.stop();
        }
        info!("controller shut down");
    }
}

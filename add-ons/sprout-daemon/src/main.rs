//! Sprout Companion Service
//!
//! A long-running daemon that wires the microphone, the turn-taking
//! controller, and the speaker into one voice loop. UI frontends subscribe to
//! controller events; this binary logs them.

use sprout_core::{
    ChildProfile, CompanionBridge, CompanionConfig, ParentSettings, ProfileStore, RoutineCatalog,
};
use sprout_voice::controller::{CompanionController, CompanionEvent};
use sprout_voice::listener::{ListenerConfig, ListenerEvent, MicControl, VoiceListener};
use sprout_voice::speaker::{FallbackTts, RemoteTts, SilentTts, Speaker, SpeakerSink, TtsBackend};
use sprout_voice::stt::{RemoteStt, SttBackend};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!(
            "[sprout-daemon] .env not loaded: {} (using system environment)",
            e
        );
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = CompanionConfig::from_env();

    let store = ProfileStore::open_path(&config.store_path).expect("open profile store");
    let profile = store
        .get_profile()
        .await
        .expect("read profile")
        .unwrap_or_else(|| {
            tracing::info!("no saved profile; starting with defaults");
            ChildProfile::default()
        });
    let settings = store
        .get_settings()
        .await
        .expect("read settings")
        .unwrap_or_else(ParentSettings::default);

    // Speech output: remote synthesis degrading to the silent local path.
    let mut remote_tts = RemoteTts::new(
        config.tts_api_url.clone(),
        config.tts_api_key.clone(),
        profile.sensory_preference,
    );
    if let Some(ref voice) = settings.voice {
        remote_tts = remote_tts.with_voice(voice.clone());
    }
    let tts: Arc<dyn TtsBackend> = Arc::new(FallbackTts::new(
        Box::new(remote_tts),
        Box::new(SilentTts),
    ));
    let speaker: Arc<dyn SpeakerSink> =
        Arc::new(Speaker::new(tts).expect("open audio output"));

    let conversation = Arc::new(CompanionBridge::new(
        config.chat_api_url.clone(),
        config.chat_api_key.clone(),
    ));

    let (controller, mut companion_events) = CompanionController::new(
        &config,
        profile,
        RoutineCatalog::builtin(),
        conversation,
        speaker,
    );
    controller.set_offline_phrases(settings.offline_phrases.clone());

    // Speech input: mic -> VAD -> STT -> transcripts.
    let stt: Arc<dyn SttBackend> = Arc::new(RemoteStt::new(
        config.stt_api_url.clone(),
        config.stt_api_key.clone(),
    ));
    let mut session = VoiceListener::new(ListenerConfig::default())
        .start(stt)
        .expect("start voice listener");
    controller.attach_mic(Arc::clone(&session.control) as Arc<dyn MicControl>);
    controller.start_listening();

    tracing::info!(
        chat_api = %config.chat_api_url,
        store_path = %config.store_path,
        "sprout daemon started, listening"
    );

    loop {
        tokio::select! {
            Some(event) = session.events.recv() => {
                match event {
                    ListenerEvent::Transcript(text) => controller.on_transcript(text),
                    ListenerEvent::ListeningChanged(on) => {
                        tracing::debug!(listening = on, "mic state changed");
                    }
                    ListenerEvent::Error { message, benign } if benign => {
                        tracing::debug!("listener hiccup: {}", message);
                    }
                    ListenerEvent::Error { message, .. } => {
                        tracing::warn!("listener failed: {}; disabling mic", message);
                        controller.stop_listening();
                    }
                }
            }
            Some(event) = companion_events.recv() => {
                match event {
                    CompanionEvent::Caption(text) => tracing::debug!(caption = %text, "heard"),
                    CompanionEvent::MessageAppended(msg) => {
                        tracing::info!(role = ?msg.role, "{}", msg.content);
                    }
                    CompanionEvent::Avatar(state) => tracing::debug!(avatar = ?state, "avatar"),
                    CompanionEvent::Offline(offline) => {
                        tracing::warn!(offline, "connectivity changed");
                    }
                    CompanionEvent::HelpAlert(raised) => {
                        tracing::warn!(raised, "caregiver help alert");
                    }
                    CompanionEvent::SpeechTrouble(message) => {
                        tracing::warn!("speech output trouble: {}", message);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("CTRL-C received; shutting down");
                controller.shutdown();
                break;
            }
        }
    }
}

//! sprout-voice: the voice interaction loop for the companion.
//!
//! Capture and transcription (`listener`), speech output (`speaker`), and the
//! turn-taking controller (`controller`) that keeps them mutually exclusive.
//! The controller also owns routine progression, frustration tracking, and
//! avatar-state derivation.

pub mod audio;
pub mod avatar;
pub mod controller;
pub mod error;
pub mod frustration;
pub mod listener;
pub mod speaker;
pub mod stt;

pub use avatar::{derive_avatar, AvatarInputs, AvatarState, TouchGesture};
pub use controller::{
    CompanionController, CompanionEvent, ControllerStatus, RoutineSession,
};
pub use error::{VoiceError, VoiceResult};
pub use frustration::{Escalation, FrustrationLevel, FrustrationState};
pub use listener::{
    ListenerConfig, ListenerEvent, ListenerSession, MicControl, VoiceListener,
};
pub use speaker::{
    FallbackTts, PlaceholderSpeaker, RemoteTts, SilentTts, Speaker, SpeakerSink, TtsBackend,
};
pub use stt::{RemoteStt, ScriptedStt, SpeechClip, SttBackend};

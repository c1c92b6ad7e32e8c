//! Companion configuration loaded from the environment.
//!
//! Endpoints, API keys, and the handful of timing knobs that shape the
//! turn-taking controller. Change behavior without code edits.

/// Configuration for the companion, loaded from environment variables.
///
/// | Env | Default | Description |
/// |-----|---------|--------------|
/// | SPROUT_CHAT_API_URL | http://localhost:8787 | Base URL of the conversation service. |
/// | SPROUT_CHAT_API_KEY | (none) | Bearer key for the conversation service, if required. |
/// | SPROUT_TTS_API_URL | http://localhost:8787 | Base URL of the speech-synthesis service. |
/// | SPROUT_STT_API_URL | https://api.openai.com/v1 | Base URL of the transcription service. |
/// | SPROUT_DEBOUNCE_MS | 300 | Window for coalescing near-duplicate transcripts. |
/// | SPROUT_OFFLINE_FALLBACK_SECS | 10 | Delay before the offline phrase is spoken after a failure. |
/// | SPROUT_GESTURE_HOLD_MS | 2000 | How long a touch-gesture expression overrides the avatar. |
#[derive(Debug, Clone)]
pub struct CompanionConfig {
    /// Base URL of the conversation service (no trailing slash).
    pub chat_api_url: String,
    /// Optional bearer key for the conversation service.
    pub chat_api_key: Option<String>,
    /// Base URL of the speech-synthesis service.
    pub tts_api_url: String,
    /// Optional bearer key for the speech-synthesis service.
    pub tts_api_key: Option<String>,
    /// Base URL of the transcription service (OpenAI-compatible).
    pub stt_api_url: String,
    /// Optional bearer key for the transcription service.
    pub stt_api_key: Option<String>,
    /// Debounce window for transcript intake, in milliseconds.
    pub debounce_ms: u64,
    /// Delay before speaking an offline phrase after a remote failure, in seconds.
    pub offline_fallback_secs: u64,
    /// How long a touch-gesture expression holds before reverting, in milliseconds.
    pub gesture_hold_ms: u64,
    /// How many recent messages are sent as conversation context.
    pub history_limit: usize,
    /// Path for the sled-backed profile store.
    pub store_path: String,
}

impl Default for CompanionConfig {
    fn default() -> Self {
        Self {
            chat_api_url: "http://localhost:8787".to_string(),
            chat_api_key: None,
            tts_api_url: "http://localhost:8787".to_string(),
            tts_api_key: None,
            stt_api_url: "https://api.openai.com/v1".to_string(),
            stt_api_key: None,
            debounce_ms: 300,
            offline_fallback_secs: 10,
            gesture_hold_ms: 2000,
            history_limit: 10,
            store_path: "./data/sprout_profiles".to_string(),
        }
    }
}

impl CompanionConfig {
    /// Load configuration from environment. Unset or invalid => defaults (see struct field docs).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            chat_api_url: env_string("SPROUT_CHAT_API_URL", &defaults.chat_api_url),
            chat_api_key: env_opt_string("SPROUT_CHAT_API_KEY"),
            tts_api_url: env_string("SPROUT_TTS_API_URL", &defaults.tts_api_url),
            tts_api_key: env_opt_string("SPROUT_TTS_API_KEY"),
            stt_api_url: env_string("SPROUT_STT_API_URL", &defaults.stt_api_url),
            stt_api_key: env_opt_string("SPROUT_STT_API_KEY"),
            debounce_ms: env_u64("SPROUT_DEBOUNCE_MS", defaults.debounce_ms),
            offline_fallback_secs: env_u64(
                "SPROUT_OFFLINE_FALLBACK_SECS",
                defaults.offline_fallback_secs,
            ),
            gesture_hold_ms: env_u64("SPROUT_GESTURE_HOLD_MS", defaults.gesture_hold_ms),
            history_limit: defaults.history_limit,
            store_path: env_string("SPROUT_STORE_PATH", &defaults.store_path),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => default.to_string(),
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
    match std::env::var(name) {
        Ok(v) => v.trim().parse().unwrap_or(default),
        Err(_) => default,
    }
}

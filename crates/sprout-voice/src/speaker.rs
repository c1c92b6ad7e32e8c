//! **Speech output** — remote synthesis with a local fallback, and playback.
//!
//! The speaker is the one place allowed to make noise. `speak()` resolves only
//! when playback has finished, which is what lets the controller keep the
//! microphone and the speaker mutually exclusive. `stop()` interrupts playback
//! immediately.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use rodio::{OutputStream, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Backend that turns text into audio bytes (WAV/MP3). Return an empty vec to
/// skip playback while keeping the turn flow intact.
#[async_trait]
pub trait TtsBackend: Send + Sync {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>>;
}

/// Production backend: POSTs `{ text, sensoryPreference }` to `{base}/speech`
/// and receives raw audio bytes.
pub struct RemoteTts {
    base_url: String,
    api_key: Option<String>,
    sensory_preference: sprout_core::SensoryPreference,
    voice: Option<String>,
    client: reqwest::Client,
}

impl RemoteTts {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        sensory_preference: sprout_core::SensoryPreference,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            api_key,
            sensory_preference,
            voice: None,
            client,
        }
    }

    /// Set a fixed voice identifier from parent settings.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

#[async_trait]
impl TtsBackend for RemoteTts {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let url = format!("{}/speech", self.base_url.trim_end_matches('/'));
        let mut body = serde_json::json!({
            "text": text,
            "sensoryPreference": self.sensory_preference,
        });
        if let Some(ref voice) = self.voice {
            body["voice"] = serde_json::json!(voice);
        }
        let mut builder = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        let res = builder
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Local-synthesis hook: returns empty audio so the turn flow continues
/// silently. Swap in an on-device engine here when one is wired up.
#[derive(Debug, Default)]
pub struct SilentTts;

#[async_trait]
impl TtsBackend for SilentTts {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
        Ok(Vec::new())
    }
}

/// Tries the high-quality backend first and degrades to the local one on any
/// failure. Errors only when both paths fail.
pub struct FallbackTts {
    primary: Box<dyn TtsBackend>,
    fallback: Box<dyn TtsBackend>,
}

impl FallbackTts {
    pub fn new(primary: Box<dyn TtsBackend>, fallback: Box<dyn TtsBackend>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl TtsBackend for FallbackTts {
    async fn synthesize(&self, text: &str) -> VoiceResult<Vec<u8>> {
        match self.primary.synthesize(text).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                warn!("TTS primary failed, using local fallback: {}", e);
                self.fallback.synthesize(text).await
            }
        }
    }
}

/// The speech output sink seen by the controller.
#[async_trait]
pub trait SpeakerSink: Send + Sync {
    /// Synthesize and play; resolves when playback completes.
    async fn speak(&self, text: &str) -> VoiceResult<()>;
    /// Interrupt playback immediately and clear the queue.
    fn stop(&self);
    /// True while audio is being fetched or played.
    fn is_speaking(&self) -> bool;
}

enum PlayCmd {
    Play {
        bytes: Vec<u8>,
        done: oneshot::Sender<VoiceResult<()>>,
    },
}

/// Rodio-backed speaker. The `OutputStream` is not `Send`, so playback runs on
/// a dedicated thread; the shared `Sink` lets `stop()` cut audio from any task.
pub struct Speaker {
    tts: Arc<dyn TtsBackend>,
    sink: Arc<Sink>,
    cmd_tx: mpsc::UnboundedSender<PlayCmd>,
    busy: Arc<AtomicBool>,
}

impl Speaker {
    pub fn new(tts: Arc<dyn TtsBackend>) -> VoiceResult<Self> {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<PlayCmd>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<VoiceResult<Arc<Sink>>>();

        thread::spawn(move || {
            let (stream, handle) = match OutputStream::try_default() {
                Ok(pair) => pair,
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                    return;
                }
            };
            let sink = match Sink::try_new(&handle) {
                Ok(s) => Arc::new(s),
                Err(e) => {
                    let _ = ready_tx.send(Err(VoiceError::Playback(e.to_string())));
                    return;
                }
            };
            if ready_tx.send(Ok(Arc::clone(&sink))).is_err() {
                return;
            }
            // Keep the stream alive for as long as commands can arrive.
            let _stream = stream;
            while let Some(cmd) = cmd_rx.blocking_recv() {
                match cmd {
                    PlayCmd::Play { bytes, done } => {
                        let result = match rodio::Decoder::new(Cursor::new(bytes)) {
                            Ok(source) => {
                                sink.append(source.convert_samples::<f32>());
                                sink.sleep_until_end();
                                Ok(())
                            }
                            Err(e) => {
                                Err(VoiceError::Playback(format!("decode failed: {}", e)))
                            }
                        };
                        let _ = done.send(result);
                    }
                }
            }
        });

        let sink = ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("playback thread exited".to_string()))??;
        info!("Speaker: playback sink ready");
        Ok(Self {
            tts,
            sink,
            cmd_tx,
            busy: Arc::new(AtomicBool::new(false)),
        })
    }
}

#[async_trait]
impl SpeakerSink for Speaker {
    async fn speak(&self, text: &str) -> VoiceResult<()> {
        self.busy.store(true, Ordering::SeqCst);
        let result = async {
            let bytes = self.tts.synthesize(text).await?;
            if bytes.is_empty() {
                return Ok(());
            }
            let (done_tx, done_rx) = oneshot::channel();
            self.cmd_tx
                .send(PlayCmd::Play {
                    bytes,
                    done: done_tx,
                })
                .map_err(|e| VoiceError::ChannelSend(e.to_string()))?;
            done_rx
                .await
                .map_err(|_| VoiceError::Playback("playback thread dropped".to_string()))?
        }
        .await;
        self.busy.store(false, Ordering::SeqCst);
        result
    }

    fn stop(&self) {
        self.sink.stop();
        info!("Speaker: stopped (interruption or shutdown)");
    }

    fn is_speaking(&self) -> bool {
        self.busy.load(Ordering::SeqCst) || !self.sink.empty()
    }
}

/// Test speaker: records utterances and simulates playback duration with a
/// tokio sleep, so paused-clock tests can observe the speaking window.
#[derive(Default)]
pub struct PlaceholderSpeaker {
    utterances: Mutex<Vec<String>>,
    speaking: AtomicBool,
    /// Simulated playback duration per utterance.
    pub playback: Duration,
}

impl PlaceholderSpeaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_playback(playback: Duration) -> Self {
        Self {
            playback,
            ..Default::default()
        }
    }

    /// Everything spoken so far, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.utterances.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl SpeakerSink for PlaceholderSpeaker {
    async fn speak(&self, text: &str) -> VoiceResult<()> {
        self.utterances
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        self.speaking.store(true, Ordering::SeqCst);
        if !self.playback.is_zero() {
            tokio::time::sleep(self.playback).await;
        }
        self.speaking.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.speaking.store(false, Ordering::SeqCst);
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn silent_tts_returns_empty() {
        let tts = SilentTts;
        let out = tts.synthesize("hello").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn fallback_uses_local_path_when_primary_fails() {
        struct FailingTts;
        #[async_trait]
        impl TtsBackend for FailingTts {
            async fn synthesize(&self, _text: &str) -> VoiceResult<Vec<u8>> {
                Err(VoiceError::Tts("service down".to_string()))
            }
        }
        let tts = FallbackTts::new(Box::new(FailingTts), Box::new(SilentTts));
        let out = tts.synthesize("hello").await.unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn placeholder_speaker_records_in_order() {
        let speaker = PlaceholderSpeaker::new();
        speaker.speak("one").await.unwrap();
        speaker.speak("two").await.unwrap();
        assert_eq!(speaker.spoken(), vec!["one", "two"]);
        assert!(!speaker.is_speaking());
    }
}

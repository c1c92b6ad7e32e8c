//! **Speech input source** — continuous capture, VAD gap detection, and
//! transcription.
//!
//! Audio flows: mic chunks → WebRTC VAD → gap detector (800ms of silence
//! commits a clip) → STT → `ListenerEvent::Transcript`. The control handle
//! gates the whole pipeline so the controller can suppress the microphone
//! while the speaker plays.

use crate::audio::{AudioChunk, MicCapture, MicConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::stt::{SpeechClip, SttBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Events emitted by the listener.
#[derive(Debug, Clone)]
pub enum ListenerEvent {
    /// A finalized transcript, ready for the controller.
    Transcript(String),
    /// The microphone was started or stopped.
    ListeningChanged(bool),
    /// Pipeline trouble. Benign causes (silence timeouts, empty
    /// transcriptions, transient STT failures) keep the pipeline running;
    /// non-benign ones mean the mic should be disabled.
    Error { message: String, benign: bool },
}

/// Configuration for gap-based transcript finalization.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub mic: MicConfig,
    /// Silence after speech that commits a clip (default 800ms).
    pub gap: Duration,
    /// Minimum speech duration to commit (default 200ms); shorter bursts drop.
    pub min_speech: Duration,
    /// Hard cap on one clip before auto-commit (default 30s).
    pub max_turn: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            mic: MicConfig::default(),
            gap: Duration::from_millis(800),
            min_speech: Duration::from_millis(200),
            max_turn: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapState {
    Idle,
    Speech,
    Gap,
}

/// Buffers speech and commits a clip when enough silence follows it.
struct GapDetector {
    config: ListenerConfig,
    state: GapState,
    speech_start: Option<Instant>,
    last_speech: Option<Instant>,
    buffer: Vec<f32>,
}

impl GapDetector {
    fn new(config: ListenerConfig) -> Self {
        Self {
            config,
            state: GapState::Idle,
            speech_start: None,
            last_speech: None,
            buffer: Vec::new(),
        }
    }

    /// Feed one VAD-classified chunk. Returns a committed clip when a gap (or
    /// the max-turn cap) closes a stretch of speech.
    fn process_at(&mut self, is_speech: bool, chunk: &[f32], now: Instant) -> Option<SpeechClip> {
        match (self.state, is_speech) {
            (GapState::Idle, true) => {
                debug!("listener: speech started");
                self.state = GapState::Speech;
                self.speech_start = Some(now);
                self.last_speech = Some(now);
                self.buffer.clear();
                self.buffer.extend_from_slice(chunk);
                None
            }
            (GapState::Speech, true) | (GapState::Gap, true) => {
                self.state = GapState::Speech;
                self.last_speech = Some(now);
                self.buffer.extend_from_slice(chunk);
                if let Some(start) = self.speech_start {
                    if now.duration_since(start) >= self.config.max_turn {
                        debug!("listener: max turn reached, committing");
                        return self.commit(now);
                    }
                }
                None
            }
            (GapState::Speech, false) => {
                self.state = GapState::Gap;
                None
            }
            (GapState::Gap, false) => {
                let last = self.last_speech?;
                if now.duration_since(last) >= self.config.gap {
                    return self.commit(now);
                }
                None
            }
            (GapState::Idle, false) => None,
        }
    }

    fn commit(&mut self, now: Instant) -> Option<SpeechClip> {
        let duration = self
            .speech_start
            .map(|start| now.duration_since(start))
            .unwrap_or_default();
        let clip = if duration < self.config.min_speech {
            debug!("listener: speech too short ({:?}), dropping", duration);
            None
        } else {
            Some(SpeechClip {
                samples: std::mem::take(&mut self.buffer),
                sample_rate: self.config.mic.sample_rate,
                duration,
            })
        };
        self.reset();
        clip
    }

    fn reset(&mut self) {
        self.state = GapState::Idle;
        self.speech_start = None;
        self.last_speech = None;
        self.buffer.clear();
    }
}

/// Start/stop handle for the microphone. The controller stops the mic before
/// the speaker opens and resumes it after playback ends.
pub trait MicControl: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_listening(&self) -> bool;
}

/// Gate over the capture pipeline; shared with the VAD thread.
pub struct ListenerControl {
    enabled: AtomicBool,
    events: mpsc::UnboundedSender<ListenerEvent>,
}

impl MicControl for ListenerControl {
    fn start(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            let _ = self.events.send(ListenerEvent::ListeningChanged(true));
        }
    }

    fn stop(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            let _ = self.events.send(ListenerEvent::ListeningChanged(false));
        }
    }

    fn is_listening(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Running listener session. Keep the handle alive to keep capturing.
pub struct ListenerSession {
    pub control: Arc<ListenerControl>,
    pub events: mpsc::UnboundedReceiver<ListenerEvent>,
    /// Keeps the capture stream alive; drop to stop for good.
    pub handle: ListenerHandle,
}

pub struct ListenerHandle {
    _stream: cpal::Stream,
}

/// The speech input source: wires capture, VAD, gap detection and STT.
pub struct VoiceListener {
    config: ListenerConfig,
}

impl VoiceListener {
    pub fn new(config: ListenerConfig) -> Self {
        Self { config }
    }

    /// Start listening. Must be called from within a tokio runtime (the STT
    /// stage is spawned on it). A device or stream failure here is non-benign;
    /// the caller should surface it once and disable the mic toggle.
    pub fn start(self, stt: Arc<dyn SttBackend>) -> VoiceResult<ListenerSession> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<AudioChunk>();
        let (clip_tx, mut clip_rx) = mpsc::unbounded_channel::<SpeechClip>();

        let capture = MicCapture::new(self.config.mic.clone())?;
        let stream = capture.start_capture(chunk_tx)?;

        let control = Arc::new(ListenerControl {
            enabled: AtomicBool::new(true),
            events: event_tx.clone(),
        });

        // VAD + gap detection on a dedicated thread (the VAD is not Send).
        let gate = Arc::clone(&control);
        let config = self.config.clone();
        let sample_rate = match config.mic.sample_rate {
            8000 => SampleRate::Rate8kHz,
            16000 => SampleRate::Rate16kHz,
            32000 => SampleRate::Rate32kHz,
            48000 => SampleRate::Rate48kHz,
            other => {
                return Err(VoiceError::Config(format!(
                    "VAD supports 8/16/32/48 kHz, got {} Hz",
                    other
                )))
            }
        };
        thread::spawn(move || {
            let mut vad = Vad::new();
            vad.set_mode(VadMode::Aggressive);
            vad.set_sample_rate(sample_rate);
            let mut detector = GapDetector::new(config);
            info!("listener: VAD thread started");

            while let Some(chunk) = chunk_rx.blocking_recv() {
                if !gate.is_listening() {
                    detector.reset();
                    continue;
                }
                let pcm_i16: Vec<i16> = chunk
                    .samples
                    .iter()
                    .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                    .collect();
                let is_speech = match vad.is_voice_segment(&pcm_i16) {
                    Ok(v) => v,
                    Err(_) => continue, // odd-sized tail chunk; skip
                };
                if let Some(clip) = detector.process_at(is_speech, &chunk.samples, Instant::now())
                {
                    if clip_tx.send(clip).is_err() {
                        break;
                    }
                }
            }
            info!("listener: VAD thread ended");
        });

        // STT stage: transcribe committed clips and emit transcripts.
        let events = event_tx;
        tokio::spawn(async move {
            while let Some(clip) = clip_rx.recv().await {
                match stt.transcribe(&clip).await {
                    Ok(text) => {
                        let text = text.trim().to_string();
                        if text.is_empty() {
                            // Silence or noise-only clip; benign, keep going.
                            continue;
                        }
                        if events.send(ListenerEvent::Transcript(text)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("listener: STT failed: {}", e);
                        let _ = events.send(ListenerEvent::Error {
                            message: e.to_string(),
                            benign: true,
                        });
                    }
                }
            }
        });

        Ok(ListenerSession {
            control,
            events: event_rx,
            handle: ListenerHandle { _stream: stream },
        })
    }
}

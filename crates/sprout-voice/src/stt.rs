//! Speech-to-text: turn a finalized clip of PCM into a transcript string.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::time::Duration;

/// A finalized stretch of speech, committed by the gap detector.
#[derive(Debug, Clone)]
pub struct SpeechClip {
    /// PCM samples (f32, -1.0..1.0), mono.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Approximate speech duration.
    pub duration: Duration,
}

/// Backend for converting a clip to text. Empty string means nothing was
/// recognized.
#[async_trait]
pub trait SttBackend: Send + Sync {
    async fn transcribe(&self, clip: &SpeechClip) -> VoiceResult<String>;
}

/// Encode f32 PCM (mono) to 16-bit WAV bytes for API upload.
fn pcm_f32_to_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let file_len = 44 + data_len as u32;

    let mut buf = Vec::with_capacity(44 + data_len);
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(file_len - 8).to_le_bytes());
    buf.extend_from_slice(b"WAVE");
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * 2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &s in samples {
        let i = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        buf.extend_from_slice(&i.to_le_bytes());
    }
    buf
}

/// Remote transcription via an OpenAI-compatible `audio/transcriptions`
/// endpoint (multipart WAV upload).
pub struct RemoteStt {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl RemoteStt {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into(),
            api_key,
            model: "whisper-1".to_string(),
            client,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl SttBackend for RemoteStt {
    async fn transcribe(&self, clip: &SpeechClip) -> VoiceResult<String> {
        if clip.samples.is_empty() {
            return Ok(String::new());
        }
        let wav = pcm_f32_to_wav(&clip.samples, clip.sample_rate);
        let url = format!(
            "{}/audio/transcriptions",
            self.base_url.trim_end_matches('/')
        );
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("clip.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());
        let mut builder = self.client.post(&url).multipart(form);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key);
        }
        let res = builder
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let json: serde_json::Value = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        let text = json
            .get("text")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .trim()
            .to_string();
        Ok(text)
    }
}

/// Scripted STT: pops prepared transcripts in order. Use to exercise the
/// listener without a microphone or API.
#[derive(Debug, Default)]
pub struct ScriptedStt {
    transcripts: std::sync::Mutex<std::collections::VecDeque<String>>,
}

impl ScriptedStt {
    pub fn new(transcripts: Vec<String>) -> Self {
        Self {
            transcripts: std::sync::Mutex::new(transcripts.into_iter().collect()),
        }
    }
}

#[async_trait]
impl SttBackend for ScriptedStt {
    async fn transcribe(&self, _clip: &SpeechClip) -> VoiceResult<String> {
        Ok(self
            .transcripts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default())
    }
}

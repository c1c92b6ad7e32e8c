//! Microphone capture via CPAL.
//!
//! Captures mono audio in fixed-size chunks (30ms at 16kHz by default, the
//! frame size the VAD requires) and forwards them over a channel. Playback
//! lives in `speaker.rs`.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capture configuration.
#[derive(Debug, Clone)]
pub struct MicConfig {
    /// Sample rate in Hz (default 16000; must be one the VAD accepts).
    pub sample_rate: u32,
    /// Mono capture.
    pub channels: u16,
    /// Chunk size in samples (default 480 = 30ms at 16kHz).
    pub chunk_size: usize,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            chunk_size: 480,
        }
    }
}

/// One chunk of captured audio (f32, -1.0..1.0).
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub timestamp: std::time::Instant,
}

/// Microphone capture using the default input device.
pub struct MicCapture {
    config: MicConfig,
    device: Device,
    stream_config: StreamConfig,
}

impl MicCapture {
    pub fn new(config: MicConfig) -> VoiceResult<Self> {
        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("no input device available".to_string()))?;
        info!(
            "Mic: using input device '{}' at {}Hz",
            device.name().unwrap_or_else(|_| "unknown".to_string()),
            config.sample_rate
        );

        let stream_config = StreamConfig {
            channels: config.channels,
            sample_rate: cpal::SampleRate(config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(config.chunk_size as u32),
        };

        Ok(Self {
            config,
            device,
            stream_config,
        })
    }

    /// Start capturing. Keep the returned `Stream` alive; dropping it stops
    /// capture.
    pub fn start_capture(self, chunk_tx: mpsc::UnboundedSender<AudioChunk>) -> VoiceResult<Stream> {
        let chunk_size = self.config.chunk_size;
        let mut buffer = Vec::with_capacity(chunk_size);

        let stream = self.device.build_input_stream(
            &self.stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                for &sample in data {
                    buffer.push(sample);
                    if buffer.len() >= chunk_size {
                        let chunk = AudioChunk {
                            samples: buffer.clone(),
                            timestamp: std::time::Instant::now(),
                        };
                        if chunk_tx.send(chunk).is_err() {
                            // Receiver gone; capture is winding down.
                        }
                        buffer.clear();
                    }
                }
            },
            move |err| {
                warn!("Mic: stream error: {}", err);
            },
            None,
        )?;

        stream.play()?;
        info!("Mic: capture started");
        Ok(stream)
    }
}

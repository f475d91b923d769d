//! Speech synthesis client.
//!
//! Turns narration text into decoded audio samples through an external
//! text-to-speech call. The remote contract is fixed: base64-encoded
//! 16-bit little-endian PCM, 24 kHz, mono. Retry policy belongs to the
//! orchestrator, not this layer.

use crate::story::Language;
use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Sample rate of synthesized audio.
pub const SAMPLE_RATE: u32 = 24_000;

/// Errors from speech synthesis.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("TTS error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse TTS response: {0}")]
    Parse(String),

    #[error("TTS returned no audio payload")]
    EmptyAudio,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Decoded mono audio ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Text-to-speech engine.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language: Language)
        -> Result<AudioClip, SynthesisError>;
}

/// HTTP text-to-speech client.
///
/// POSTs the utterance to a speech endpoint and decodes the base64 PCM
/// payload from the JSON response.
pub struct HttpSynthesizer {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    voice: String,
}

const DEFAULT_VOICE: &str = "narrator";

impl HttpSynthesizer {
    /// Create a client for the given endpoint and API key.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            voice: DEFAULT_VOICE.to_string(),
        }
    }

    /// Create a client from `NARRATOR_TTS_URL` and `NARRATOR_TTS_KEY`.
    pub fn from_env() -> Result<Self, SynthesisError> {
        let endpoint = std::env::var("NARRATOR_TTS_URL")
            .map_err(|_| SynthesisError::Config("NARRATOR_TTS_URL not set".to_string()))?;
        let api_key = std::env::var("NARRATOR_TTS_KEY")
            .map_err(|_| SynthesisError::Config("NARRATOR_TTS_KEY not set".to_string()))?;
        Ok(Self::new(endpoint, api_key))
    }

    /// Set the voice identity.
    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
    voice: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct TtsResponse {
    #[serde(default)]
    audio: Option<String>,
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        language: Language,
    ) -> Result<AudioClip, SynthesisError> {
        let request = TtsRequest {
            text,
            voice: &self.voice,
            language: language.tag(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| SynthesisError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Api {
                status,
                message: body,
            });
        }

        let body: TtsResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::Parse(e.to_string()))?;

        let encoded = body.audio.ok_or(SynthesisError::EmptyAudio)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| SynthesisError::Parse(format!("invalid base64 audio: {e}")))?;
        if bytes.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        Ok(AudioClip {
            samples: decode_pcm16(&bytes),
            sample_rate: SAMPLE_RATE,
        })
    }
}

/// Convert 16-bit little-endian PCM bytes to normalized f32 samples.
///
/// A trailing odd byte is discarded.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pcm16_values() {
        // 0, i16::MAX, i16::MIN as little-endian pairs.
        let bytes = [0x00, 0x00, 0xff, 0x7f, 0x00, 0x80];
        let samples = decode_pcm16(&bytes);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], 0.0);
        assert!((samples[1] - (32767.0 / 32768.0)).abs() < 1e-6);
        assert_eq!(samples[2], -1.0);
    }

    #[test]
    fn test_decode_pcm16_discards_trailing_byte() {
        let samples = decode_pcm16(&[0x00, 0x00, 0x12]);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn test_clip_duration() {
        let clip = AudioClip {
            samples: vec![0.0; SAMPLE_RATE as usize],
            sample_rate: SAMPLE_RATE,
        };
        assert_eq!(clip.duration_secs(), 1.0);
        assert!(!clip.is_empty());
    }

    #[test]
    fn test_client_creation() {
        let synthesizer =
            HttpSynthesizer::new("https://tts.example/v1/speech", "key").with_voice("sage");
        assert_eq!(synthesizer.voice, "sage");
        assert_eq!(synthesizer.endpoint, "https://tts.example/v1/speech");
    }
}

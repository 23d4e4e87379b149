//! Providers backed by OpenAI-compatible HTTP APIs.
//!
//! Each provider reads its endpoint, key, and model from the environment at
//! construction time, so any OpenAI-compatible service works by pointing the
//! `*_API_URL` variable at it.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::error::{VoiceError, VoiceResult};
use crate::history::ChatTurn;
use crate::ingest::frame_level;
use crate::providers::{
    GenerationProvider, RecognitionEvent, RecognitionProvider, RecognitionSessionHandle,
    SynthesisProvider,
};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1";

fn env_first(keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| std::env::var(k).ok())
        .filter(|v| !v.is_empty())
}

fn require_key(keys: &[&str]) -> VoiceResult<String> {
    env_first(keys).ok_or_else(|| {
        VoiceError::ProviderSetup(format!("none of {} is set", keys.join(", ")))
    })
}

/// Streaming chat completions.
pub struct OpenAiGeneration {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
}

impl OpenAiGeneration {
    pub fn from_env() -> VoiceResult<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: env_first(&["GENERATION_API_URL"])
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: require_key(&["GENERATION_API_KEY", "LLM_API_KEY", "OPENAI_API_KEY"])?,
            model: env_first(&["GENERATION_MODEL"]).unwrap_or_else(|| "gpt-4o-mini".to_string()),
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiGeneration {
    fn name(&self) -> &str {
        "openai"
    }

    async fn stream_reply(
        &self,
        turns: Vec<ChatTurn>,
        connection_id: String,
        chunk_tx: mpsc::Sender<String>,
    ) -> VoiceResult<()> {
        let request = ChatRequest {
            model: &self.model,
            messages: &turns,
            stream: true,
        };
        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| VoiceError::Generation(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Generation(format!(
                "upstream returned {status}: {body}"
            )));
        }

        let mut stream = response.bytes_stream();
        let mut carry = String::new();

        while let Some(chunk) = stream.next().await {
            let bytes =
                chunk.map_err(|e| VoiceError::Generation(format!("stream read failed: {e}")))?;
            carry.push_str(&String::from_utf8_lossy(&bytes));

            // SSE events are newline-delimited; a partial line stays in the carry
            while let Some(pos) = carry.find('\n') {
                let line = carry[..pos].trim().to_string();
                carry.drain(..=pos);

                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                if data == "[DONE]" {
                    return Ok(());
                }
                let parsed: Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::trace!(connection = %connection_id, %e, "skipping sse line");
                        continue;
                    }
                };
                if let Some(text) = parsed["choices"][0]["delta"]["content"].as_str() {
                    if !text.is_empty() && chunk_tx.send(text.to_string()).await.is_err() {
                        return Err(VoiceError::Canceled("receiver gone".into()));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Speech synthesis through the `/audio/speech` endpoint.
pub struct OpenAiSynthesis {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    voice: String,
}

impl OpenAiSynthesis {
    pub fn from_env() -> VoiceResult<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: env_first(&["SYNTHESIS_API_URL"])
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: require_key(&["SYNTHESIS_API_KEY", "OPENAI_API_KEY"])?,
            model: env_first(&["SYNTHESIS_MODEL"]).unwrap_or_else(|| "tts-1".to_string()),
            voice: env_first(&["SYNTHESIS_VOICE"]).unwrap_or_else(|| "alloy".to_string()),
        })
    }
}

#[async_trait]
impl SynthesisProvider for OpenAiSynthesis {
    fn name(&self) -> &str {
        "openai"
    }

    async fn text_to_speech(
        &self,
        text: &str,
        _connection_id: &str,
    ) -> VoiceResult<Option<Vec<u8>>> {
        let response = self
            .client
            .post(format!("{}/audio/speech", self.api_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
                "voice": self.voice,
            }))
            .send()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Synthesis(format!(
                "upstream returned {status}: {body}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Synthesis(format!("body read failed: {e}")))?;
        if bytes.is_empty() {
            Ok(None)
        } else {
            Ok(Some(bytes.to_vec()))
        }
    }
}

/// Batch transcription through the `/audio/transcriptions` endpoint.
///
/// The API has no streaming mode, so a session task batches frames into
/// utterances: audio accumulates while speech is present, and a silence gap
/// closes the utterance and ships it as a WAV upload. No partial hypotheses
/// are produced.
pub struct OpenAiRecognition {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    sample_rate: u32,
    vad_threshold: f32,
}

/// Silence that closes an utterance.
const UTTERANCE_GAP: Duration = Duration::from_millis(800);

impl OpenAiRecognition {
    pub fn from_env(config: &GatewayConfig) -> VoiceResult<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: env_first(&["RECOGNITION_API_URL"])
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: require_key(&["RECOGNITION_API_KEY", "OPENAI_API_KEY"])?,
            model: env_first(&["RECOGNITION_MODEL"]).unwrap_or_else(|| "whisper-1".to_string()),
            sample_rate: config.input_sample_rate,
            vad_threshold: config.vad_threshold,
        })
    }

    async fn transcribe(&self, pcm: Vec<u8>) -> VoiceResult<String> {
        let wav = pcm16_to_wav(&pcm, self.sample_rate);
        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Recognition(format!("multipart setup failed: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", part);

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.api_url))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Recognition(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(VoiceError::Recognition(format!(
                "upstream returned {status}: {body}"
            )));
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| VoiceError::Recognition(format!("bad response body: {e}")))?;
        Ok(parsed["text"].as_str().unwrap_or_default().to_string())
    }
}

#[async_trait]
impl RecognitionProvider for OpenAiRecognition {
    fn name(&self) -> &str {
        "openai"
    }

    async fn start_session(
        &self,
        connection_id: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> VoiceResult<RecognitionSessionHandle> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let stop = CancellationToken::new();
        let stop_task = stop.clone();

        let provider = Self {
            client: self.client.clone(),
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            sample_rate: self.sample_rate,
            vad_threshold: self.vad_threshold,
        };
        let connection_id = connection_id.to_string();

        tokio::spawn(async move {
            let _ = events.send(RecognitionEvent::Started);
            let mut utterance: Vec<u8> = Vec::new();
            let mut voiced = false;
            let mut last_voice = Instant::now();

            loop {
                let frame = tokio::select! {
                    _ = stop_task.cancelled() => None,
                    frame = audio_rx.recv() => frame,
                    _ = tokio::time::sleep(UTTERANCE_GAP), if voiced => {
                        // silence timer expired with no new frames
                        Some(Vec::new())
                    }
                };
                let Some(frame) = frame else { break };

                if !frame.is_empty() {
                    if frame_level(&frame) >= provider.vad_threshold {
                        voiced = true;
                        last_voice = Instant::now();
                    }
                    utterance.extend_from_slice(&frame);
                }

                if voiced && last_voice.elapsed() >= UTTERANCE_GAP {
                    let pcm = std::mem::take(&mut utterance);
                    voiced = false;
                    match provider.transcribe(pcm).await {
                        Ok(text) if !text.trim().is_empty() => {
                            let _ = events.send(RecognitionEvent::Final(text));
                        }
                        Ok(_) => {}
                        Err(e) => {
                            let _ = events.send(RecognitionEvent::Error(e.to_string()));
                        }
                    }
                }
            }

            // flush whatever is buffered when the session closes
            if voiced && !utterance.is_empty() {
                match provider.transcribe(utterance).await {
                    Ok(text) if !text.trim().is_empty() => {
                        let _ = events.send(RecognitionEvent::Final(text));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = events.send(RecognitionEvent::Error(e.to_string()));
                    }
                }
            }
            tracing::debug!(connection = %connection_id, "recognition session closed");
            let _ = events.send(RecognitionEvent::Stopped);
        });

        Ok(RecognitionSessionHandle { audio_tx, stop })
    }
}

/// Wrap raw little-endian PCM16 mono samples in a minimal WAV container.
fn pcm16_to_wav(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    let byte_rate = sample_rate * 2;
    let data_len = pcm.len() as u32;
    let mut wav = Vec::with_capacity(44 + pcm.len());

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&1u16.to_le_bytes()); // mono
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&2u16.to_le_bytes()); // block align
    wav.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_well_formed() {
        let pcm = vec![0u8; 320];
        let wav = pcm16_to_wav(&pcm, 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(wav.len(), 44 + 320);
        // data length field
        assert_eq!(u32::from_le_bytes([wav[40], wav[41], wav[42], wav[43]]), 320);
        // sample rate field
        assert_eq!(
            u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]),
            16_000
        );
    }

    #[test]
    fn missing_api_key_is_a_setup_error() {
        // scoped to variable names no other test reads
        let err = require_key(&["DUPLEX_TEST_NONEXISTENT_KEY"]);
        assert!(matches!(err, Err(VoiceError::ProviderSetup(_))));
    }
}

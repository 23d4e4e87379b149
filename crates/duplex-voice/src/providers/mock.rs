//! Offline providers used for development and tests. The pipeline works end
//! to end with no network access and no API keys.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{VoiceError, VoiceResult};
use crate::history::ChatTurn;
use crate::providers::{
    GenerationProvider, RecognitionEvent, RecognitionProvider, RecognitionSessionHandle,
    SynthesisProvider,
};

/// Recognizer that consumes audio and, once stopped, emits a placeholder
/// transcript if it saw any frames.
#[derive(Default)]
pub struct MockRecognition;

impl MockRecognition {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RecognitionProvider for MockRecognition {
    fn name(&self) -> &str {
        "mock"
    }

    async fn start_session(
        &self,
        connection_id: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> VoiceResult<RecognitionSessionHandle> {
        let (audio_tx, mut audio_rx) = mpsc::channel::<Vec<u8>>(64);
        let stop = CancellationToken::new();
        let stop_task = stop.clone();
        let connection_id = connection_id.to_string();

        tokio::spawn(async move {
            let _ = events.send(RecognitionEvent::Started);
            let mut bytes_seen: usize = 0;
            loop {
                tokio::select! {
                    _ = stop_task.cancelled() => break,
                    frame = audio_rx.recv() => {
                        match frame {
                            Some(frame) => bytes_seen += frame.len(),
                            None => break,
                        }
                    }
                }
            }
            if bytes_seen > 0 {
                tracing::debug!(connection = %connection_id, bytes_seen, "mock transcript");
                let _ = events.send(RecognitionEvent::Final(
                    "[audio transcription placeholder]".to_string(),
                ));
            }
            let _ = events.send(RecognitionEvent::Stopped);
        });

        Ok(RecognitionSessionHandle { audio_tx, stop })
    }
}

/// Synthesizer that produces no audio. Useful for text-only clients.
#[derive(Default)]
pub struct MockSynthesis;

impl MockSynthesis {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SynthesisProvider for MockSynthesis {
    fn name(&self) -> &str {
        "mock"
    }

    async fn text_to_speech(
        &self,
        _text: &str,
        _connection_id: &str,
    ) -> VoiceResult<Option<Vec<u8>>> {
        Ok(None)
    }
}

/// Generator that streams a canned reply word by word.
#[derive(Default)]
pub struct MockGeneration;

impl MockGeneration {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GenerationProvider for MockGeneration {
    fn name(&self) -> &str {
        "mock"
    }

    async fn stream_reply(
        &self,
        turns: Vec<ChatTurn>,
        _connection_id: String,
        chunk_tx: mpsc::Sender<String>,
    ) -> VoiceResult<()> {
        let last = turns
            .last()
            .map(|t| t.content.clone())
            .unwrap_or_default();
        let reply = format!("You said: {last}. I am a placeholder assistant.");
        for word in reply.split_inclusive(' ') {
            chunk_tx
                .send(word.to_string())
                .await
                .map_err(|_| VoiceError::Canceled("receiver gone".into()))?;
        }
        Ok(())
    }
}

//! Provider traits for recognition, generation, and synthesis backends.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::error::VoiceResult;
use crate::history::ChatTurn;

/// Events emitted by an active recognition session.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEvent {
    /// Recognizer is live and consuming audio
    Started,
    /// Interim hypothesis, may be revised
    Partial(String),
    /// Committed transcript for one utterance
    Final(String),
    /// Recognizer shut down cleanly
    Stopped,
    /// Session ended before producing a final result
    Canceled(String),
    /// Recognizer failure, session is unusable
    Error(String),
}

/// Handle to a running recognition session.
///
/// Audio is pushed through a bounded channel so a stalled recognizer sheds
/// frames instead of backing up the socket reader.
#[derive(Debug)]
pub struct RecognitionSessionHandle {
    pub audio_tx: mpsc::Sender<Vec<u8>>,
    pub stop: CancellationToken,
}

impl RecognitionSessionHandle {
    /// Forward a frame, dropping it if the recognizer is not keeping up.
    pub fn push_audio(&self, frame: Vec<u8>) {
        if let Err(e) = self.audio_tx.try_send(frame) {
            tracing::trace!("recognizer backpressure, frame dropped: {e}");
        }
    }

    pub fn stop(&self) {
        self.stop.cancel();
    }
}

#[async_trait]
pub trait RecognitionProvider: Send + Sync {
    fn name(&self) -> &str;

    /// One-time setup, called when the provider becomes active.
    async fn initialize(&self, _config: &GatewayConfig) -> VoiceResult<()> {
        Ok(())
    }

    /// Open a streaming recognition session for one connection.
    async fn start_session(
        &self,
        connection_id: &str,
        events: mpsc::UnboundedSender<RecognitionEvent>,
    ) -> VoiceResult<RecognitionSessionHandle>;

    /// Release provider-side resources for a connection.
    async fn stop_session(&self, _connection_id: &str) -> VoiceResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self, _config: &GatewayConfig) -> VoiceResult<()> {
        Ok(())
    }

    /// Stream a reply for the given transcript, pushing text chunks as they
    /// arrive. Returns once the stream is exhausted or the receiver is gone.
    async fn stream_reply(
        &self,
        turns: Vec<ChatTurn>,
        connection_id: String,
        chunk_tx: mpsc::Sender<String>,
    ) -> VoiceResult<()>;

    /// Best-effort abort of any in-flight request for this connection.
    async fn cancel(&self, _connection_id: &str) -> VoiceResult<()> {
        Ok(())
    }
}

#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn initialize(&self, _config: &GatewayConfig) -> VoiceResult<()> {
        Ok(())
    }

    /// Synthesize one sentence. `Ok(None)` means the provider produced no
    /// audio (valid for text-only deployments).
    async fn text_to_speech(&self, text: &str, connection_id: &str)
        -> VoiceResult<Option<Vec<u8>>>;

    /// Best-effort abort of any in-flight synthesis for this connection.
    async fn cancel(&self, _connection_id: &str) -> VoiceResult<()> {
        Ok(())
    }
}

//! End-to-end turn flow over the public API with scripted providers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use duplex_voice::config::GatewayConfig;
use duplex_voice::error::VoiceResult;
use duplex_voice::generation;
use duplex_voice::history::{ChatTurn, Role};
use duplex_voice::ingest;
use duplex_voice::protocol::{Outbound, ServerMessage};
use duplex_voice::providers::{GenerationProvider, SynthesisProvider};
use duplex_voice::registry::ProviderRegistry;
use duplex_voice::session::ConnectionSession;

struct ScriptedGeneration;

#[async_trait]
impl GenerationProvider for ScriptedGeneration {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_reply(
        &self,
        _turns: Vec<ChatTurn>,
        _connection_id: String,
        chunk_tx: mpsc::Sender<String>,
    ) -> VoiceResult<()> {
        for chunk in ["Sure", ". Second ", "sentence", ". And a tail"] {
            if chunk_tx.send(chunk.to_string()).await.is_err() {
                return Ok(());
            }
        }
        Ok(())
    }
}

struct BeepSynthesis;

#[async_trait]
impl SynthesisProvider for BeepSynthesis {
    fn name(&self) -> &str {
        "beep"
    }

    async fn text_to_speech(
        &self,
        _text: &str,
        _connection_id: &str,
    ) -> VoiceResult<Option<Vec<u8>>> {
        Ok(Some(vec![1, 2, 3, 4]))
    }
}

fn harness() -> (
    Arc<ConnectionSession>,
    Arc<ProviderRegistry>,
    mpsc::UnboundedReceiver<Outbound>,
) {
    let config = Arc::new(GatewayConfig::default());
    let mut registry = ProviderRegistry::new(Arc::clone(&config));
    registry.register_generation("scripted", |_| Ok(Arc::new(ScriptedGeneration) as _));
    registry.register_synthesis("beep", |_| Ok(Arc::new(BeepSynthesis) as _));
    registry.set_active_generation("scripted").unwrap();
    registry.set_active_synthesis("beep").unwrap();
    registry.set_active_recognition("mock").unwrap();

    let (tx, rx) = mpsc::unbounded_channel();
    let session = ConnectionSession::new("it-test", config, tx);
    (session, Arc::new(registry), rx)
}

async fn drain_until_idle(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut out = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(frame)) => out.push(frame),
            _ => return out,
        }
    }
}

#[tokio::test]
async fn text_turn_produces_transcript_audio_and_history() {
    let (session, providers, mut rx) = harness();

    let reply = generation::process_input(&session, &providers, "hi")
        .await
        .unwrap();
    assert_eq!(reply.as_deref(), Some("Sure. Second sentence. And a tail"));

    let frames = drain_until_idle(&mut rx).await;

    // cumulative text updates, one per chunk
    let llm_updates: Vec<&str> = frames
        .iter()
        .filter_map(|f| match f {
            Outbound::Message(ServerMessage::LlmResponse { payload }) => Some(payload.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(llm_updates.len(), 4);
    assert_eq!(llm_updates[0], "Sure");
    assert_eq!(llm_updates[3], "Sure. Second sentence. And a tail");

    // two complete sentences plus the flushed tail
    let audio_frames = frames
        .iter()
        .filter(|f| matches!(f, Outbound::Audio(_)))
        .count();
    assert_eq!(audio_frames, 3);

    // history: system, user, assistant
    let turns = session.history_snapshot();
    assert_eq!(turns.len(), 3);
    assert_eq!(turns[0].role, Role::System);
    assert_eq!(turns[1], ChatTurn::user("hi"));
    assert_eq!(turns[2].content, "Sure. Second sentence. And a tail");
}

#[tokio::test]
async fn barge_in_cancels_playback_and_notifies_once() {
    let (session, providers, mut rx) = harness();

    // simulate an assistant mid-reply
    let handle = session.begin_generation();

    // loud PCM16 frames
    let mut frame = Vec::with_capacity(320);
    for _ in 0..160 {
        frame.extend_from_slice(&8000i16.to_le_bytes());
    }
    for _ in 0..5 {
        assert!(ingest::ingest(&session, &providers, frame.clone()));
    }

    assert!(handle.token.is_cancelled());

    let frames = drain_until_idle(&mut rx).await;
    let interruptions = frames
        .iter()
        .filter(|f| matches!(f, Outbound::Message(ServerMessage::Interrupted)))
        .count();
    assert_eq!(interruptions, 1);
}

#[tokio::test]
async fn new_input_supersedes_queued_playback() {
    let (session, providers, mut rx) = harness();

    let first = generation::process_input(&session, &providers, "first question")
        .await
        .unwrap();
    assert!(first.is_some());
    drain_until_idle(&mut rx).await;

    let second = generation::process_input(&session, &providers, "second question")
        .await
        .unwrap();
    assert!(second.is_some());

    let turns = session.history_snapshot();
    assert_eq!(turns.len(), 5);
    assert_eq!(turns[3], ChatTurn::user("second question"));
    assert_eq!(turns[4].role, Role::Assistant);
}

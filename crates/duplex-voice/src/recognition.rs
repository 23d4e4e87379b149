//! Recognition session lifecycle and event routing.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};

use crate::error::{VoiceError, VoiceResult};
use crate::generation;
use crate::interrupt;
use crate::protocol::ServerMessage;
use crate::providers::RecognitionEvent;
use crate::registry::ProviderRegistry;
use crate::session::ConnectionSession;

/// Open a recognition session and spawn the event router for it.
///
/// Starting twice is a no-op; the existing session keeps running.
pub async fn start(
    session: &Arc<ConnectionSession>,
    providers: &Arc<ProviderRegistry>,
) -> VoiceResult<()> {
    if session.has_recognition() {
        tracing::debug!(connection = %session.id, "recognition already running");
        return Ok(());
    }

    let provider = providers.recognition()?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let budget = Duration::from_secs(session.config.recognizer_start_timeout_secs);
    let handle = timeout(budget, provider.start_session(&session.id, event_tx))
        .await
        .map_err(|_| {
            VoiceError::Timeout(format!(
                "recognizer did not start within {}s",
                budget.as_secs()
            ))
        })??;

    session.set_recognition(handle);

    let session = Arc::clone(session);
    let providers = Arc::clone(providers);
    tokio::spawn(async move {
        route_events(session, providers, event_rx).await;
    });
    Ok(())
}

/// Stop the active recognition session, if any.
pub async fn stop(
    session: &Arc<ConnectionSession>,
    providers: &Arc<ProviderRegistry>,
) -> VoiceResult<()> {
    let Some(handle) = session.take_recognition() else {
        return Ok(());
    };
    handle.stop();
    session.set_speaking(false);

    let provider = providers.recognition()?;
    let budget = Duration::from_secs(session.config.recognizer_stop_timeout_secs);
    match timeout(budget, provider.stop_session(&session.id)).await {
        Ok(res) => res,
        Err(_) => {
            tracing::warn!(
                connection = %session.id,
                "recognizer stop exceeded {}s, releasing anyway",
                budget.as_secs()
            );
            Ok(())
        }
    }
}

/// Teardown variant of [`stop`]: never fails, never blocks past the budget.
pub async fn force_stop(session: &Arc<ConnectionSession>, providers: &Arc<ProviderRegistry>) {
    if let Err(e) = stop(session, providers).await {
        tracing::warn!(connection = %session.id, %e, "recognizer stop failed during teardown");
    }
}

/// Drain recognizer events into client messages and pipeline actions.
async fn route_events(
    session: Arc<ConnectionSession>,
    providers: Arc<ProviderRegistry>,
    mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
) {
    while let Some(event) = events.recv().await {
        if !session.is_active() {
            return;
        }
        match event {
            RecognitionEvent::Started => {
                session.set_speaking(true);
                session.send(ServerMessage::RecognitionStarted);
            }
            RecognitionEvent::Partial(text) => {
                if text.is_empty() {
                    continue;
                }
                // the user is audibly talking over us
                interrupt::cancel(&session, &providers, true);
                session.send(ServerMessage::PartialTranscription { payload: text });
            }
            RecognitionEvent::Final(text) => {
                let text = text.trim().to_string();
                if text.is_empty() {
                    tracing::debug!(connection = %session.id, "empty final transcript dropped");
                    continue;
                }
                interrupt::cancel(&session, &providers, true);
                session.send(ServerMessage::Transcription {
                    payload: text.clone(),
                });

                let session = Arc::clone(&session);
                let providers = Arc::clone(&providers);
                tokio::spawn(async move {
                    if let Err(e) = generation::process_input(&session, &providers, &text).await {
                        if !e.is_cancellation() {
                            tracing::warn!(connection = %session.id, %e, "turn failed");
                        }
                    }
                });
            }
            RecognitionEvent::Stopped => {
                session.set_speaking(false);
                session.send(ServerMessage::RecognitionStopped);
            }
            RecognitionEvent::Canceled(reason) => {
                tracing::debug!(connection = %session.id, reason, "recognition canceled");
            }
            RecognitionEvent::Error(message) => {
                tracing::warn!(connection = %session.id, message, "recognizer error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::protocol::Outbound;

    fn harness() -> (
        Arc<ConnectionSession>,
        Arc<ProviderRegistry>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let config = Arc::new(GatewayConfig::default());
        let registry = Arc::new(ProviderRegistry::with_mocks(Arc::clone(&config)).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new("test", config, tx);
        (session, registry, rx)
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let (session, providers, _rx) = harness();
        start(&session, &providers).await.unwrap();
        assert!(session.has_recognition());
        start(&session, &providers).await.unwrap();
        assert!(session.has_recognition());
    }

    #[tokio::test]
    async fn stop_without_session_is_a_no_op() {
        let (session, providers, _rx) = harness();
        stop(&session, &providers).await.unwrap();
    }

    #[tokio::test]
    async fn partial_event_interrupts_and_forwards() {
        let (session, providers, mut rx) = harness();
        session.begin_generation();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route_events(
            Arc::clone(&session),
            Arc::clone(&providers),
            event_rx,
        ));

        event_tx
            .send(RecognitionEvent::Partial("hel".to_string()))
            .unwrap();
        drop(event_tx);
        router.await.unwrap();

        let mut saw_interrupt = false;
        let mut saw_partial = false;
        while let Ok(out) = rx.try_recv() {
            match out {
                Outbound::Message(ServerMessage::Interrupted) => saw_interrupt = true,
                Outbound::Message(ServerMessage::PartialTranscription { payload }) => {
                    assert_eq!(payload, "hel");
                    saw_partial = true;
                }
                _ => {}
            }
        }
        assert!(saw_interrupt);
        assert!(saw_partial);
    }

    #[tokio::test]
    async fn empty_final_transcript_is_dropped() {
        let (session, providers, mut rx) = harness();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let router = tokio::spawn(route_events(
            Arc::clone(&session),
            Arc::clone(&providers),
            event_rx,
        ));

        event_tx
            .send(RecognitionEvent::Final("   ".to_string()))
            .unwrap();
        drop(event_tx);
        router.await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(session.history_snapshot().len(), 1);
    }
}

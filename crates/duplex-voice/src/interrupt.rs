//! Barge-in interruption.
//!
//! One synchronous entry point cancels whatever the session is doing on the
//! output side: the in-flight generation stream, the sentence currently being
//! synthesized, and everything still queued. It is the only place that
//! resets the synthesis state, so every trigger (speech onset, partial or
//! final transcript, teardown) converges on identical cleanup.

use std::sync::Arc;

use crate::protocol::ServerMessage;
use crate::registry::ProviderRegistry;
use crate::session::ConnectionSession;

/// Cancel all in-flight and queued output for the session.
///
/// Returns whether anything was actually cancelled. The `interrupted`
/// notification is only sent when work was cut short, so repeated triggers
/// against an idle session stay silent.
pub fn cancel(
    session: &Arc<ConnectionSession>,
    providers: &Arc<ProviderRegistry>,
    notify_client: bool,
) -> bool {
    let mut cancelled = false;
    let mut synthesis_was_live = false;

    if let Some(handle) = session.take_generation() {
        handle.token.cancel();
        cancelled = true;
    }

    {
        let mut synth = match session.synthesis.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(job) = synth.current.take() {
            job.token.cancel();
            cancelled = true;
            synthesis_was_live = true;
        }
        if !synth.queue.is_empty() {
            synth.queue.clear();
            cancelled = true;
        }
        synth.processing = false;
    }

    // the token only stops us from consuming the result; ask the provider to
    // drop its side of the call as well
    if synthesis_was_live {
        if let Ok(rt) = tokio::runtime::Handle::try_current() {
            if let Ok(provider) = providers.synthesis() {
                let connection_id = session.id.clone();
                rt.spawn(async move {
                    if let Err(e) = provider.cancel(&connection_id).await {
                        tracing::debug!(connection = %connection_id, %e, "provider-side synthesis cancel failed");
                    }
                });
            }
        }
    }

    if cancelled {
        tracing::debug!(connection = %session.id, "interrupted in-flight output");
        if notify_client && session.is_active() {
            session.send(ServerMessage::Interrupted);
        }
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::protocol::Outbound;
    use tokio::sync::mpsc;

    fn harness() -> (
        Arc<ConnectionSession>,
        Arc<ProviderRegistry>,
        mpsc::UnboundedReceiver<Outbound>,
    ) {
        let config = Arc::new(GatewayConfig::default());
        let providers = Arc::new(ProviderRegistry::with_mocks(Arc::clone(&config)).unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new("test", config, tx);
        (session, providers, rx)
    }

    #[test]
    fn idle_session_cancel_is_silent() {
        let (session, providers, mut rx) = harness();
        assert!(!cancel(&session, &providers, true));
        assert!(!cancel(&session, &providers, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn active_generation_is_cancelled_and_notified_once() {
        let (session, providers, mut rx) = harness();
        let handle = session.begin_generation();

        assert!(cancel(&session, &providers, true));
        assert!(handle.token.is_cancelled());
        match rx.try_recv() {
            Ok(Outbound::Message(ServerMessage::Interrupted)) => {}
            other => panic!("expected interrupted, got {other:?}"),
        }

        // second trigger finds nothing to cancel
        assert!(!cancel(&session, &providers, true));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn queued_synthesis_is_flushed() {
        let (session, providers, _rx) = harness();
        {
            let mut synth = session.synthesis.lock().unwrap();
            synth.queue.push_back("First sentence.".into());
            synth.queue.push_back("Second sentence.".into());
            synth.processing = true;
        }
        assert!(cancel(&session, &providers, false));
        let synth = session.synthesis.lock().unwrap();
        assert!(synth.queue.is_empty());
        assert!(!synth.processing);
        assert!(synth.current.is_none());
    }

    #[tokio::test]
    async fn live_synthesis_job_is_cancelled() {
        let (session, providers, _rx) = harness();
        let job = {
            let mut synth = session.synthesis.lock().unwrap();
            synth.queue.push_back("Mid-flight sentence.".into());
            synth.processing = true;
            synth.begin_job()
        };
        assert!(cancel(&session, &providers, false));
        assert!(job.token.is_cancelled());
        assert!(session.synthesis.lock().unwrap().current.is_none());
    }
}

//! Ordered, single-flight sentence synthesis.
//!
//! Sentences land in a per-session queue and a single worker drains it, one
//! provider call at a time, so audio frames reach the client in sentence
//! order. The worker peeks rather than pops, and every await is bracketed by
//! a job-ownership check: an interruption can reset the queue and hand it to
//! a fresh worker at any time, and a worker that lost ownership must not
//! touch the state again.

use std::sync::Arc;

use tokio::time::{timeout, Duration};

use crate::error::VoiceError;
use crate::protocol::{ErrorPayload, ServerMessage};
use crate::registry::ProviderRegistry;
use crate::session::ConnectionSession;

/// Queue a sentence and make sure a worker is draining the queue.
pub fn enqueue(
    session: &Arc<ConnectionSession>,
    providers: &Arc<ProviderRegistry>,
    sentence: String,
) {
    let sentence = sentence.trim().to_string();
    if sentence.is_empty() {
        return;
    }

    let spawn_worker = {
        let mut synth = match session.synthesis.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        synth.queue.push_back(sentence);
        if synth.processing {
            false
        } else {
            synth.processing = true;
            true
        }
    };

    if spawn_worker {
        let session = Arc::clone(session);
        let providers = Arc::clone(providers);
        tokio::spawn(async move {
            process_loop(session, providers).await;
        });
    }
}

async fn process_loop(session: Arc<ConnectionSession>, providers: Arc<ProviderRegistry>) {
    loop {
        let (sentence, job) = {
            let mut synth = match session.synthesis.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !session.is_active() || synth.queue.is_empty() {
                synth.processing = false;
                synth.current = None;
                return;
            }
            if synth.current.is_some() {
                // another worker claimed the queue between iterations
                return;
            }
            let sentence = match synth.queue.front() {
                Some(s) => s.clone(),
                None => {
                    synth.processing = false;
                    return;
                }
            };
            (sentence, synth.begin_job())
        };

        let provider = match providers.synthesis() {
            Ok(p) => p,
            Err(e) => {
                fail(&session, job.id, e);
                return;
            }
        };

        let budget = Duration::from_secs(session.config.synthesis_timeout_secs);
        let result = tokio::select! {
            _ = job.token.cancelled() => Err(VoiceError::Canceled("synthesis interrupted".into())),
            res = timeout(budget, provider.text_to_speech(&sentence, &session.id)) => {
                match res {
                    Ok(inner) => inner,
                    Err(_) => Err(VoiceError::Timeout(format!(
                        "synthesis exceeded {}s", budget.as_secs()
                    ))),
                }
            }
        };

        match result {
            Err(e) if e.is_cancellation() => {
                // interruption already reset the queue and flags
                tracing::debug!(connection = %session.id, "synthesis cancelled");
                return;
            }
            Err(e) => {
                fail(&session, job.id, e);
                return;
            }
            Ok(audio) => {
                let mut synth = match session.synthesis.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if !synth.owns(job.id) {
                    // an interruption handed the queue to another worker
                    // while the provider call was in flight
                    return;
                }
                drop(synth);

                if let Some(bytes) = audio {
                    if !bytes.is_empty() {
                        session.send_audio(bytes);
                    }
                }

                let mut synth = match session.synthesis.lock() {
                    Ok(g) => g,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if !synth.owns(job.id) {
                    return;
                }
                if synth.queue.front() == Some(&sentence) {
                    synth.queue.pop_front();
                }
                synth.current = None;
            }
        }
    }
}

/// Flush the queue and surface one typed error, but only if the failing
/// attempt still owns the queue. A superseded worker reports nothing.
fn fail(session: &Arc<ConnectionSession>, job_id: u64, error: VoiceError) {
    {
        let mut synth = match session.synthesis.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !synth.owns(job_id) {
            return;
        }
        synth.queue.clear();
        synth.processing = false;
        synth.current = None;
    }
    tracing::warn!(connection = %session.id, %error, "synthesis failed, flushing queue");
    if session.is_active() {
        session.send(ServerMessage::Error {
            payload: ErrorPayload::with_details("synthesis failed", error.to_string()),
        });
    }
}

//! Per-connection session state.
//!
//! A [`ConnectionSession`] is shared between the socket reader, the socket
//! writer, the heartbeat task, and every pipeline task spawned on behalf of
//! the connection. All locks here are `std::sync::Mutex` held for short
//! critical sections and never across an await point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::history::{ChatTurn, ConversationHistory};
use crate::protocol::{Outbound, ServerMessage};
use crate::providers::RecognitionSessionHandle;
use crate::registry::ProviderRegistry;

/// Cancellation handle for one generation attempt.
///
/// The id pairs with the session's generation sequence so a streaming task
/// can detect that it has been superseded even after its token was replaced.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    pub id: u64,
    pub token: CancellationToken,
}

#[derive(Debug, Default)]
pub struct SynthesisState {
    pub queue: std::collections::VecDeque<String>,
    pub processing: bool,
    pub current: Option<SynthesisJob>,
    pub(crate) next_job: u64,
}

impl SynthesisState {
    /// Claim the queue head for one worker iteration.
    pub(crate) fn begin_job(&mut self) -> SynthesisJob {
        let job = SynthesisJob {
            id: self.next_job,
            token: CancellationToken::new(),
        };
        self.next_job += 1;
        self.current = Some(job.clone());
        job
    }

    /// Whether the given attempt still owns the queue head.
    pub(crate) fn owns(&self, job_id: u64) -> bool {
        self.current.as_ref().map(|j| j.id) == Some(job_id)
    }
}

/// One queue-head synthesis attempt. The id lets the worker verify it still
/// owns the queue after an await, mirroring [`GenerationHandle`].
#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub id: u64,
    pub token: CancellationToken,
}

pub struct ConnectionSession {
    pub id: String,
    pub config: Arc<GatewayConfig>,
    active: AtomicBool,
    speaking: AtomicBool,
    generation_seq: AtomicU64,
    generation: Mutex<Option<GenerationHandle>>,
    pub(crate) synthesis: Mutex<SynthesisState>,
    history: Mutex<ConversationHistory>,
    recognition: Mutex<Option<RecognitionSessionHandle>>,
    outbound: mpsc::UnboundedSender<Outbound>,
    last_pong: Mutex<Instant>,
}

impl ConnectionSession {
    pub fn new(
        id: impl Into<String>,
        config: Arc<GatewayConfig>,
        outbound: mpsc::UnboundedSender<Outbound>,
    ) -> Arc<Self> {
        let history = ConversationHistory::new(&config.system_prompt, config.max_history);
        Arc::new(Self {
            id: id.into(),
            config,
            active: AtomicBool::new(true),
            speaking: AtomicBool::new(false),
            generation_seq: AtomicU64::new(0),
            generation: Mutex::new(None),
            synthesis: Mutex::new(SynthesisState::default()),
            history: Mutex::new(history),
            recognition: Mutex::new(None),
            outbound,
            last_pong: Mutex::new(Instant::now()),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Flip the session inactive. Returns true for the caller that actually
    /// performed the transition, so teardown runs exactly once.
    pub fn mark_closed(&self) -> bool {
        self.active.swap(false, Ordering::SeqCst)
    }

    pub fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    pub fn set_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::SeqCst);
    }

    /// Queue a structured message for the writer task. Failures mean the
    /// writer is gone, which the read loop will notice on its own.
    pub fn send(&self, message: ServerMessage) {
        if self.outbound.send(Outbound::Message(message)).is_err() {
            tracing::trace!(connection = %self.id, "outbound channel closed");
        }
    }

    pub fn send_audio(&self, audio: Vec<u8>) {
        if self.outbound.send(Outbound::Audio(audio)).is_err() {
            tracing::trace!(connection = %self.id, "outbound channel closed");
        }
    }

    pub fn send_ping(&self) -> bool {
        self.outbound.send(Outbound::Ping).is_ok()
    }

    pub fn send_pong(&self, payload: Vec<u8>) {
        let _ = self.outbound.send(Outbound::Pong(payload));
    }

    pub fn send_close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }

    pub fn note_pong(&self) {
        if let Ok(mut at) = self.last_pong.lock() {
            *at = Instant::now();
        }
    }

    pub fn last_pong(&self) -> Instant {
        self.last_pong
            .lock()
            .map(|at| *at)
            .unwrap_or_else(|_| Instant::now())
    }

    /// Install a fresh generation handle, replacing (without cancelling) any
    /// previous one. Callers cancel the old handle via [`crate::interrupt`].
    pub fn begin_generation(&self) -> GenerationHandle {
        let handle = GenerationHandle {
            id: self.generation_seq.fetch_add(1, Ordering::SeqCst) + 1,
            token: CancellationToken::new(),
        };
        if let Ok(mut slot) = self.generation.lock() {
            *slot = Some(handle.clone());
        }
        handle
    }

    /// Whether the given attempt is still the newest one for this session.
    pub fn generation_is_current(&self, id: u64) -> bool {
        self.generation
            .lock()
            .map(|slot| slot.as_ref().map(|h| h.id) == Some(id))
            .unwrap_or(false)
    }

    /// Clear the slot, but only if it still belongs to the given attempt.
    pub fn clear_generation(&self, id: u64) {
        if let Ok(mut slot) = self.generation.lock() {
            if slot.as_ref().map(|h| h.id) == Some(id) {
                *slot = None;
            }
        }
    }

    pub fn take_generation(&self) -> Option<GenerationHandle> {
        self.generation.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Run a closure against the conversation history.
    pub fn with_history<T>(&self, f: impl FnOnce(&mut ConversationHistory) -> T) -> T {
        let mut guard = match self.history.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    pub fn history_snapshot(&self) -> Vec<ChatTurn> {
        self.with_history(|h| h.snapshot())
    }

    pub fn set_recognition(&self, handle: RecognitionSessionHandle) {
        if let Ok(mut slot) = self.recognition.lock() {
            *slot = Some(handle);
        }
    }

    pub fn take_recognition(&self) -> Option<RecognitionSessionHandle> {
        self.recognition.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn has_recognition(&self) -> bool {
        self.recognition
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Forward an audio frame to the active recognizer, if any.
    pub fn push_audio(&self, frame: Vec<u8>) {
        if let Ok(slot) = self.recognition.lock() {
            if let Some(handle) = slot.as_ref() {
                handle.push_audio(frame);
            }
        }
    }
}

/// Tear a session down: cancel in-flight work, stop recognition, and ask the
/// writer to close the socket. Safe to call from multiple triggers; only the
/// first caller does the work.
pub async fn teardown(
    session: &Arc<ConnectionSession>,
    providers: &Arc<ProviderRegistry>,
    reason: &str,
) {
    if !session.mark_closed() {
        return;
    }
    tracing::info!(connection = %session.id, reason, "tearing down session");
    crate::interrupt::cancel(session, providers, false);
    crate::recognition::force_stop(session, providers).await;
    session.send_close();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> (Arc<ConnectionSession>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ConnectionSession::new("test", Arc::new(GatewayConfig::default()), tx);
        (session, rx)
    }

    #[test]
    fn mark_closed_transitions_once() {
        let (session, _rx) = test_session();
        assert!(session.is_active());
        assert!(session.mark_closed());
        assert!(!session.mark_closed());
        assert!(!session.is_active());
    }

    #[test]
    fn generation_handles_supersede_each_other() {
        let (session, _rx) = test_session();
        let first = session.begin_generation();
        assert!(session.generation_is_current(first.id));
        let second = session.begin_generation();
        assert!(!session.generation_is_current(first.id));
        assert!(session.generation_is_current(second.id));

        // a stale attempt cannot clear the newer slot
        session.clear_generation(first.id);
        assert!(session.generation_is_current(second.id));
        session.clear_generation(second.id);
        assert!(!session.generation_is_current(second.id));
    }

    #[test]
    fn history_is_seeded_with_system_prompt() {
        let (session, _rx) = test_session();
        let turns = session.history_snapshot();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].role, crate::history::Role::System);
    }
}

//! LLM turn processing: stream a reply, segment it into sentences, and feed
//! the synthesis queue while forwarding cumulative text to the client.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{VoiceError, VoiceResult};
use crate::interrupt;
use crate::protocol::{ErrorPayload, ServerMessage};
use crate::registry::ProviderRegistry;
use crate::session::ConnectionSession;
use crate::synthesis;

/// Characters that close a sentence for synthesis purposes. Covers CJK
/// full-width punctuation alongside ASCII.
const SENTENCE_TERMINATORS: &[char] = &['。', '！', '？', '；', '.', '!', '?', ';'];

/// Split the buffer at the first sentence terminator, returning the complete
/// sentence and leaving the remainder in place.
fn extract_sentence(buffer: &mut String) -> Option<String> {
    let (idx, ch) = buffer
        .char_indices()
        .find(|(_, c)| SENTENCE_TERMINATORS.contains(c))?;
    let split = idx + ch.len_utf8();
    let rest = buffer.split_off(split);
    let sentence = std::mem::replace(buffer, rest);
    Some(sentence)
}

/// Run one assistant turn for the given user input.
///
/// Any previous turn is cancelled silently first (a new utterance supersedes
/// the old answer without a client notification, since the transcript
/// delivery already implies it). Returns the full assistant reply, or `None`
/// when the turn was superseded mid-stream.
pub async fn process_input(
    session: &Arc<ConnectionSession>,
    providers: &Arc<ProviderRegistry>,
    text: &str,
) -> VoiceResult<Option<String>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    interrupt::cancel(session, providers, false);

    let provider = providers.generation()?;
    if let Err(e) = provider.cancel(&session.id).await {
        tracing::debug!(connection = %session.id, %e, "provider cancel failed");
    }

    session.with_history(|h| h.push_user(text));
    let turns = session.history_snapshot();

    let handle = session.begin_generation();
    let (chunk_tx, mut chunk_rx) = mpsc::channel::<String>(32);

    let stream_task = {
        let provider = Arc::clone(&provider);
        let connection_id = session.id.clone();
        let token = handle.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => Err(VoiceError::Canceled("generation superseded".into())),
                res = provider.stream_reply(turns, connection_id, chunk_tx) => res,
            }
        })
    };

    let mut full_response = String::new();
    let mut sentence_buffer = String::new();

    loop {
        let chunk = tokio::select! {
            _ = handle.token.cancelled() => None,
            chunk = chunk_rx.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };

        if !session.generation_is_current(handle.id) || !session.is_active() {
            tracing::debug!(connection = %session.id, "generation superseded mid-stream");
            stream_task.abort();
            return Ok(None);
        }

        full_response.push_str(&chunk);
        sentence_buffer.push_str(&chunk);
        session.send(ServerMessage::LlmResponse {
            payload: full_response.clone(),
        });

        while let Some(sentence) = extract_sentence(&mut sentence_buffer) {
            synthesis::enqueue(session, providers, sentence);
        }
    }

    let stream_result = match stream_task.await {
        Ok(res) => res,
        Err(e) if e.is_cancelled() => Err(VoiceError::Canceled("generation superseded".into())),
        Err(e) => Err(VoiceError::Generation(format!("stream task panicked: {e}"))),
    };

    match stream_result {
        Ok(()) => {}
        Err(e) if e.is_cancellation() => {
            tracing::debug!(connection = %session.id, "generation cancelled");
            session.clear_generation(handle.id);
            return Ok(None);
        }
        Err(e) => {
            // discard the partial reply; the user turn stays so a retry has context
            tracing::warn!(connection = %session.id, %e, "generation failed");
            interrupt::cancel(session, providers, false);
            if session.is_active() {
                session.send(ServerMessage::Error {
                    payload: ErrorPayload::with_details("generation failed", e.to_string()),
                });
            }
            session.clear_generation(handle.id);
            return Err(e);
        }
    }

    if !session.generation_is_current(handle.id) {
        return Ok(None);
    }

    let leftover = sentence_buffer.trim();
    if !leftover.is_empty() {
        synthesis::enqueue(session, providers, leftover.to_string());
    }

    if !full_response.is_empty() {
        session.with_history(|h| h.push_assistant(full_response.clone()));
    }
    session.clear_generation(handle.id);
    Ok(Some(full_response))
}

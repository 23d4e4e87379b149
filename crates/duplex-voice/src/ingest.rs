//! Inbound audio frame handling.
//!
//! Frames are little-endian PCM16 mono. Each frame gets a cheap energy check
//! so speech onset can interrupt playback before the recognizer has produced
//! a single hypothesis.

use std::sync::Arc;

use crate::error::{VoiceError, VoiceResult};
use crate::interrupt;
use crate::protocol::ServerMessage;
use crate::registry::ProviderRegistry;
use crate::session::ConnectionSession;

/// Samples inspected per frame for the energy estimate.
const VAD_WINDOW_SAMPLES: usize = 100;

fn validate_frame(frame: &[u8]) -> VoiceResult<()> {
    if frame.is_empty() {
        return Err(VoiceError::AudioFormat("empty frame".into()));
    }
    if frame.len() % 2 != 0 {
        return Err(VoiceError::AudioFormat(format!(
            "odd length {}, PCM16 required",
            frame.len()
        )));
    }
    Ok(())
}

/// Mean absolute amplitude of the leading samples, normalized to 0.0..1.0.
pub fn frame_level(frame: &[u8]) -> f32 {
    let samples = frame.len() / 2;
    let window = samples.min(VAD_WINDOW_SAMPLES);
    if window == 0 {
        return 0.0;
    }
    let mut sum = 0.0f32;
    for i in 0..window {
        let sample = i16::from_le_bytes([frame[2 * i], frame[2 * i + 1]]);
        sum += (sample as f32).abs() / 32768.0;
    }
    sum / window as f32
}

/// Process one binary frame: validate, detect speech onset, forward to the
/// recognizer. Returns false when the frame was rejected.
///
/// A speech onset (the not-speaking to speaking transition) always notifies
/// the client once, whether or not output was in flight; sustained speech
/// does not notify again until the recognizer closes the utterance.
pub fn ingest(
    session: &Arc<ConnectionSession>,
    providers: &Arc<ProviderRegistry>,
    frame: Vec<u8>,
) -> bool {
    if let Err(e) = validate_frame(&frame) {
        tracing::warn!(connection = %session.id, %e, "dropping audio frame");
        return false;
    }

    let level = frame_level(&frame);
    if level >= session.config.vad_threshold && !session.is_speaking() {
        session.set_speaking(true);
        tracing::debug!(connection = %session.id, level, "speech onset");
        interrupt::cancel(session, providers, false);
        if session.is_active() {
            session.send(ServerMessage::Interrupted);
        }
    }

    session.push_audio(frame);
    true
}

//! Error types for the Duplex voice orchestration core.

use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice orchestration core
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio format error: {0}")]
    AudioFormat(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Recognition error: {0}")]
    Recognition(String),

    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Canceled: {0}")]
    Canceled(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider setup error: {0}")]
    ProviderSetup(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl VoiceError {
    /// Cancellation is the expected outcome of barge-in, never a client-visible failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, VoiceError::Canceled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_not_a_failure() {
        assert!(VoiceError::Canceled("superseded".into()).is_cancellation());
        assert!(!VoiceError::Synthesis("api error".into()).is_cancellation());
    }
}

use thiserror::Error;

/// Audio transcoding failures.  A failed segment is dropped; the call
/// continues.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("empty audio payload")]
    Empty,
    #[error("audio payload too small: {0} bytes")]
    TooSmall(usize),
}

/// Speech-to-text failures.  Transient errors are retried locally;
/// definitive rejections are not.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("transient transcription failure: {0}")]
    Transient(String),
    #[error("transcription rejected by provider: {0}")]
    Definitive(String),
    #[error("transcription failed after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Chat-completion failures for the free-text utterance path.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("transient completion failure: {0}")]
    Transient(String),
    #[error("completion rejected by provider: {0}")]
    Definitive(String),
}

/// Final-scoring failures.  Exhaustion routes the raw transcript to the
/// dead-letter area instead of losing it.
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("score response was not valid structured output: {0}")]
    Malformed(String),
    #[error("scoring provider failure: {0}")]
    Provider(#[from] GenerateError),
}

/// Session registry failures.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no session for call {0}")]
    UnknownCall(String),
    #[error("session already exists for call {0}")]
    Duplicate(String),
}

/// Telephony control-plane failures.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("telephony api request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("telephony api returned {status}: {body}")]
    Api { status: u16, body: String },
}

/// Result-sink failures.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("result sink request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("result sink returned {0}")]
    Status(u16),
    #[error("dead-letter write failed: {0}")]
    Io(#[from] std::io::Error),
}

use crate::consts::{MAX_TRANSCRIBE_ATTEMPTS, RETRY_BACKOFF_MILLIS};
use crate::error::TranscriptionError;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

const TRANSCRIBE_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bytes in, text out.  An empty transcript means the provider heard no
/// speech; callers must treat that as "candidate said nothing", not a
/// fault.
pub trait Transcriber: Send + Sync {
    fn transcribe(
        &self,
        audio: Vec<u8>,
    ) -> impl std::future::Future<Output = Result<String, TranscriptionError>> + Send;
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

pub struct WhisperTranscriber {
    http_client: reqwest::Client,
    api_key: String,
}

impl WhisperTranscriber {
    pub fn new(http_client: reqwest::Client, api_key: String) -> Self {
        Self {
            http_client,
            api_key,
        }
    }

    async fn attempt(&self, audio: Vec<u8>) -> Result<String, TranscriptionError> {
        let file = Part::bytes(audio)
            .file_name("segment.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionError::Definitive(e.to_string()))?;
        let form = Form::new()
            .part("file", file)
            .text("model", "whisper-1")
            .text("response_format", "json")
            .text("language", "en");
        let resp = self
            .http_client
            .post(TRANSCRIBE_URL)
            .timeout(TRANSCRIBE_TIMEOUT)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            let body = resp
                .json::<TranscriptionResponse>()
                .await
                .map_err(|e| TranscriptionError::Transient(e.to_string()))?;
            return Ok(body.text.trim().to_string());
        }
        let body = resp.text().await.unwrap_or_default();
        if is_transient_status(status.as_u16()) {
            Err(TranscriptionError::Transient(format!("{status}: {body}")))
        } else {
            Err(TranscriptionError::Definitive(format!("{status}: {body}")))
        }
    }
}

impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, TranscriptionError> {
        for attempt in 1..=MAX_TRANSCRIBE_ATTEMPTS {
            match self.attempt(audio.clone()).await {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "transcription complete");
                    return Ok(text);
                }
                Err(TranscriptionError::Transient(msg)) => {
                    warn!(attempt, error = %msg, "transient transcription failure");
                    if attempt < MAX_TRANSCRIBE_ATTEMPTS {
                        sleep(Duration::from_millis(RETRY_BACKOFF_MILLIS * attempt as u64)).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(TranscriptionError::Exhausted {
            attempts: MAX_TRANSCRIBE_ATTEMPTS,
        })
    }
}

/// 5xx and rate-limit responses are worth another attempt; any other
/// rejection is definitive.
pub fn is_transient_status(status: u16) -> bool {
    status >= 500 || status == 429
}

use crate::call_control::TwilioCallControl;
use crate::generate::OpenAiGenerator;
use crate::session::SessionStore;
use crate::sink::HttpResultSink;
use crate::transcribe::WhisperTranscriber;

use std::env;
use std::sync::Arc;
use std::time::Duration;

/// Normalized internal event union.  Everything downstream of the call
/// control adapter operates on these, never on raw provider payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    CallStarted,
    SpeechRecognized(String),
    DigitPressed(char),
    CallEnded,
}

/// Process configuration, read once at startup.
#[derive(Clone)]
pub struct Config {
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub twilio_from_number: String,
    pub openai_api_key: String,
    /// Externally reachable host for websocket/status callback URLs.
    pub public_host: String,
    pub result_sink_url: String,
    pub dead_letter_dir: String,
    /// Trailing silence after which a speech segment is considered done.
    pub silence_timeout: Duration,
    /// Sessions idle beyond this bound are reclaimed by the reaper.
    pub max_session_idle: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let twilio_account_sid =
            env::var("TWILIO_ACCOUNT_SID").expect("TWILIO_ACCOUNT_SID not set!");
        let twilio_auth_token = env::var("TWILIO_AUTH_TOKEN").expect("TWILIO_AUTH_TOKEN not set!");
        let twilio_from_number =
            env::var("TWILIO_FROM_NUMBER").expect("TWILIO_FROM_NUMBER not set!");
        let openai_api_key = env::var("OPENAI_API_KEY").expect("OPENAI_API_KEY not set!");
        let public_host = env::var("PUBLIC_HOST").expect("PUBLIC_HOST not set!");
        let result_sink_url = env::var("RESULT_SINK_URL").expect("RESULT_SINK_URL not set!");
        let dead_letter_dir =
            env::var("DEAD_LETTER_DIR").unwrap_or_else(|_| "dead_letters".to_string());
        let silence_timeout = Duration::from_secs(
            env::var("SILENCE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(2),
        );
        let max_session_idle = Duration::from_secs(
            env::var("MAX_SESSION_IDLE_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(600),
        );

        Self {
            twilio_account_sid,
            twilio_auth_token,
            twilio_from_number,
            openai_api_key,
            public_host,
            result_sink_url,
            dead_letter_dir,
            silence_timeout,
            max_session_idle,
        }
    }
}

pub struct AppState {
    pub config: Config,
    pub store: Arc<SessionStore>,
    pub control: Arc<TwilioCallControl>,
    pub generator: Arc<OpenAiGenerator>,
    pub transcriber: Arc<WhisperTranscriber>,
    pub sink: Arc<HttpResultSink>,
}

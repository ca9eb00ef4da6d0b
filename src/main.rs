mod audio;
mod call_control;
mod error;
mod generate;
mod handlers;
mod interview;
mod session;
mod sink;
mod tasks;
mod transcribe;
mod twilio_types;
mod types;

use crate::call_control::TwilioCallControl;
use crate::generate::OpenAiGenerator;
use crate::session::SessionStore;
use crate::sink::HttpResultSink;
use crate::transcribe::WhisperTranscriber;
use crate::types::{AppState, Config};

use axum::{
    routing::{get, post},
    Router,
};
use std::env;
use std::sync::Arc;
use tracing_subscriber::prelude::*;

pub mod consts {
    /// Telephony audio: 8kHz mono mu-law.
    pub const SAMPLE_RATE_HZ: u32 = 8_000;
    /// RIFF + fmt (with extension size) + fact + data chunk headers.
    pub const WAV_HEADER_SZ: usize = 58;
    /// Mean absolute deviation from the mu-law zero level below which a
    /// frame counts as silence.
    pub const SILENCE_MAD_THRESHOLD: f64 = 6.0;
    pub const MIN_FRAME_BYTES: usize = 32;
    /// Half a second of speech; anything shorter is discarded as noise.
    pub const MIN_SEGMENT_BYTES: usize = 4_000;
    /// 90 seconds of continuous speech forces a segment boundary.
    pub const MAX_SEGMENT_BYTES: usize = 720_000;

    pub const MAX_TRANSCRIBE_ATTEMPTS: u32 = 3;
    pub const MAX_COMPLETION_ATTEMPTS: u32 = 3;
    pub const SCORING_ATTEMPTS: u32 = 2;
    pub const PERSIST_ATTEMPTS: u32 = 3;
    pub const RETRY_BACKOFF_MILLIS: u64 = 500;

    pub const CONCLUSION_PROMPT: &str =
        "Thank you for your time. Do you have any questions for me?";
    pub const FAREWELL: &str =
        "Thank you for speaking with me today. We will be in touch with the results. Goodbye.";
    pub const APOLOGY: &str =
        "I am sorry, we have run into a problem on our end. Thank you for your time. Goodbye.";
    pub const REPROMPT: &str = "I didn't hear anything. Please go ahead when you are ready.";
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let subscriber = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_file(true)
                .with_line_number(true),
        )
        .with(tracing_subscriber::filter::Targets::new().with_targets([
            ("hyper", tracing_subscriber::filter::LevelFilter::OFF),
            ("askara_rs", tracing_subscriber::filter::LevelFilter::DEBUG),
        ]));
    tracing::subscriber::set_global_default(subscriber).unwrap();

    let config = Config::from_env();
    let http_client = reqwest::Client::new();
    let store = Arc::new(SessionStore::new());
    let control = Arc::new(TwilioCallControl::new(
        http_client.clone(),
        config.twilio_account_sid.clone(),
        config.twilio_auth_token.clone(),
        config.twilio_from_number.clone(),
        config.public_host.clone(),
    ));
    let generator = Arc::new(OpenAiGenerator::new(
        http_client.clone(),
        config.openai_api_key.clone(),
    ));
    let transcriber = Arc::new(WhisperTranscriber::new(
        http_client.clone(),
        config.openai_api_key.clone(),
    ));
    let sink = Arc::new(HttpResultSink::new(
        http_client.clone(),
        config.result_sink_url.clone(),
        config.dead_letter_dir.clone(),
    ));

    tokio::spawn(tasks::reap_idle_sessions(
        store.clone(),
        config.max_session_idle,
    ));

    let app_state = Arc::new(AppState {
        config,
        store,
        control,
        generator,
        transcriber,
        sink,
    });

    let app = Router::new()
        .route("/calls", post(handlers::place_call_handler))
        .route("/media", get(handlers::media_handler))
        .route("/twilio/status", post(handlers::status_handler))
        .route("/", get(|| async { "Askara interview service is running" }))
        .with_state(app_state);

    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    axum::Server::bind(&format!("0.0.0.0:{port}").parse().unwrap())
        .serve(app.into_make_service())
        .await
        .unwrap();
}

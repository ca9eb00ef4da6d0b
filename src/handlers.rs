use crate::audio::{SegmenterConfig, SpeechSegmenter};
use crate::interview::{run_session, InterviewDeps};
use crate::session::CallSession;
use crate::tasks::{ingest_media_frames, run_segment_pipeline};
use crate::twilio_types::{StartMeta, TwilioMessage, TwilioStatusPayload};
use crate::types::{AppState, SessionEvent};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use futures_util::stream::{SplitStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Invocation from the external scheduler: place the interview call for
/// this candidate now.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PlaceCallRequest {
    #[serde(default)]
    pub name: Option<String>,
    pub phone: String,
    pub job_role: String,
    pub job_description: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceCallResponse {
    pub call_sid: String,
}

pub async fn place_call_handler(
    State(app_state): State<Arc<AppState>>,
    Json(req): Json<PlaceCallRequest>,
) -> impl IntoResponse {
    info!(phone=%req.phone, role=%req.job_role, "placing interview call");
    let call_sid = match app_state.control.place_call(&req.phone).await {
        Ok(sid) => sid,
        Err(e) => {
            error!(error=%e, "failed to place call");
            return (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": "call placement failed" })),
            )
                .into_response();
        }
    };

    let session = CallSession::new(
        call_sid.clone(),
        req.phone,
        req.job_role,
        req.job_description,
    );
    let (events_tx, events_rx) = mpsc::channel(32);
    if let Err(e) = app_state.store.create(session, events_tx) {
        // The provider handed out a sid we already track; nothing sane to
        // do but refuse.
        error!(call=%call_sid, error=%e, "failed to register session");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": "session registration failed" })),
        )
            .into_response();
    }
    tokio::spawn(run_session(
        call_sid.clone(),
        events_rx,
        InterviewDeps {
            store: app_state.store.clone(),
            generator: app_state.generator.clone(),
            control: app_state.control.clone(),
            sink: app_state.sink.clone(),
        },
    ));

    (StatusCode::OK, Json(PlaceCallResponse { call_sid })).into_response()
}

/// Capture the Start message from the beginning of a media websocket
/// stream for the call sid.
async fn get_stream_start(twilio_stream: &mut SplitStream<WebSocket>) -> Option<StartMeta> {
    loop {
        match twilio_stream.next().await {
            Some(Ok(Message::Text(json))) => match serde_json::from_str(&json) {
                Ok(TwilioMessage::Connected { protocol, version }) => {
                    trace!("got connected message with {protocol} and {version}");
                }
                Ok(TwilioMessage::Start { start, .. }) => break Some(start),
                Ok(_) => {
                    error!("expected only Connected or Start at the head of a stream");
                    break None;
                }
                Err(e) => {
                    error!(error=%e, "failed to deserialize stream preamble");
                    break None;
                }
            },
            Some(Ok(_)) => {
                warn!("unexpected websocket message type in stream preamble");
            }
            Some(Err(e)) => {
                error!(error=%e, "websocket error in stream preamble");
                break None;
            }
            None => break None,
        }
    }
}

pub async fn media_handler(
    ws: WebSocketUpgrade,
    State(app_state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| socket_handler(socket, app_state))
}

async fn socket_handler(socket: WebSocket, app_state: Arc<AppState>) {
    let (_sink, mut twilio_stream) = socket.split();
    let start = match get_stream_start(&mut twilio_stream).await {
        Some(start) => start,
        None => return,
    };
    let call_sid = start.call_sid;
    debug!(call=%call_sid, stream=%start.stream_sid, "media stream connected");

    // A stream for a call we never placed is an integration error, never
    // something to fabricate a session for.
    if app_state.store.get(&call_sid).is_none() {
        error!(call=%call_sid, "media stream for unknown call; closing");
        return;
    }
    if app_state
        .store
        .dispatch(&call_sid, SessionEvent::CallStarted)
        .await
        .is_err()
    {
        return;
    }

    let segmenter = SpeechSegmenter::new(SegmenterConfig {
        silence_timeout: app_state.config.silence_timeout,
        ..Default::default()
    });
    let (segments_tx, segments_rx) = mpsc::channel(8);
    let pipeline = tokio::spawn(run_segment_pipeline(
        call_sid.clone(),
        segments_rx,
        app_state.transcriber.clone(),
        app_state.store.clone(),
    ));
    ingest_media_frames(
        call_sid.clone(),
        twilio_stream,
        segmenter,
        segments_tx,
        app_state.store.clone(),
    )
    .await;
    // Closing the segment channel lets the pipeline drain and exit.
    if let Err(e) = pipeline.await {
        error!(call=%call_sid, error=%e, "segment pipeline panicked");
    }
}

pub async fn status_handler(
    State(app_state): State<Arc<AppState>>,
    body: String,
) -> impl IntoResponse {
    trace!(body=%body, "status callback body");
    let payload = match serde_urlencoded::from_str::<TwilioStatusPayload>(&body) {
        Ok(payload) => payload,
        Err(e) => {
            error!(error=%e, "failed to deserialize status callback");
            return StatusCode::BAD_REQUEST;
        }
    };
    if !payload.call_status.is_terminal() {
        debug!(call=%payload.call_sid, status=?payload.call_status, "non-terminal status");
        return StatusCode::OK;
    }
    info!(call=%payload.call_sid, status=?payload.call_status, "terminal call status");
    if let Err(e) = app_state
        .store
        .dispatch(&payload.call_sid, SessionEvent::CallEnded)
        .await
    {
        // Fatal for this event only; other sessions are unaffected.
        error!(call=%payload.call_sid, error=%e, "status callback for unknown call");
    }
    StatusCode::OK
}

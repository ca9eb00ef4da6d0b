use crate::audio::{transcode, SpeechSegmenter};
use crate::session::SessionStore;
use crate::transcribe::Transcriber;
use crate::twilio_types::TwilioMessage;
use crate::types::SessionEvent;

use axum::extract::ws::{Message, WebSocket};
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::stream::{SplitStream, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// How often the trailing-silence window is polled.
const SILENCE_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn decode_frame(payload: &str) -> Option<Vec<u8>> {
    match STANDARD.decode(payload) {
        Ok(frame) => Some(frame),
        Err(e) => {
            warn!(error=%e, "dropping undecodable media frame");
            None
        }
    }
}

/// Task that turns the call's media websocket into speech segments and
/// DTMF events.  One instance per stream connection; the segmenter's
/// buffer dies with the connection, so a capture restart starts clean.
pub async fn ingest_media_frames(
    call_sid: String,
    mut twilio_stream: SplitStream<WebSocket>,
    mut segmenter: SpeechSegmenter,
    segments: mpsc::Sender<Vec<u8>>,
    store: Arc<SessionStore>,
) {
    let mut poll = tokio::time::interval(SILENCE_POLL_INTERVAL);
    loop {
        tokio::select! {
            _ = poll.tick() => {
                if let Some(segment) = segmenter.check_silence(Instant::now()) {
                    debug!(call=%call_sid, bytes = segment.len(), "speech segment complete");
                    if segments.send(segment).await.is_err() {
                        break;
                    }
                }
            }
            msg = twilio_stream.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        error!(call=%call_sid, error=%e, "media websocket error");
                        break;
                    }
                    None => {
                        debug!(call=%call_sid, "media stream closed");
                        break;
                    }
                };
                match msg {
                    Message::Text(json) => match serde_json::from_str::<TwilioMessage>(&json) {
                        Ok(TwilioMessage::Media { media, .. }) => {
                            if let Some(frame) = decode_frame(&media.payload) {
                                if let Some(segment) = segmenter.push_frame(&frame, Instant::now()) {
                                    debug!(call=%call_sid, bytes = segment.len(), "segment forced at ceiling");
                                    if segments.send(segment).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Ok(TwilioMessage::Dtmf { dtmf, .. }) => {
                            if let Some(digit) = dtmf.digit.chars().next() {
                                if store
                                    .dispatch(&call_sid, SessionEvent::DigitPressed(digit))
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                        }
                        Ok(TwilioMessage::Stop { .. }) => {
                            // The stream stops on every spoken utterance;
                            // end-of-call arrives on the status callback.
                            debug!(call=%call_sid, "got stop message");
                            break;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(call=%call_sid, error=%e, "dropping unparsable media message");
                        }
                    },
                    Message::Ping(_) | Message::Pong(_) => {}
                    Message::Close(_) => break,
                    other => {
                        warn!(call=%call_sid, message=?other, "unsupported websocket message");
                    }
                }
            }
        }
    }
}

/// Task that runs the transcode-transcribe pipeline for one call.  A
/// single consumer keeps segments causally ordered: segment N finishes or
/// fails before segment N+1 begins, so history order matches speech
/// order.  A failed segment degrades that segment only.
pub async fn run_segment_pipeline<T: Transcriber>(
    call_sid: String,
    mut segments: mpsc::Receiver<Vec<u8>>,
    transcriber: Arc<T>,
    store: Arc<SessionStore>,
) {
    while let Some(segment) = segments.recv().await {
        let wav = match transcode(&segment) {
            Ok(wav) => wav,
            Err(e) => {
                warn!(call=%call_sid, error=%e, "dropping unconvertible segment");
                continue;
            }
        };
        let text = match transcriber.transcribe(wav).await {
            Ok(text) => text,
            Err(e) => {
                warn!(call=%call_sid, error=%e, "dropping segment after failed transcription");
                continue;
            }
        };
        debug!(call=%call_sid, transcript=%text, "segment transcribed");
        if store
            .dispatch(&call_sid, SessionEvent::SpeechRecognized(text))
            .await
            .is_err()
        {
            debug!(call=%call_sid, "session gone; discarding transcript");
            break;
        }
    }
}

/// Background task reclaiming sessions whose call died without a terminal
/// status callback.  Injecting CallEnded routes them through the normal
/// scoring/teardown path.
pub async fn reap_idle_sessions(store: Arc<SessionStore>, max_idle: Duration) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        debug!(live = store.live_calls(), "idle session sweep");
        for call_sid in store.idle_calls(max_idle) {
            info!(call=%call_sid, "reclaiming idle session");
            if store
                .dispatch(&call_sid, SessionEvent::CallEnded)
                .await
                .is_err()
            {
                // Queue already gone; drop the registry entry directly.
                store.remove(&call_sid);
            }
        }
    }
}

pub fn wrap_twiml(twiml: String) -> String {
    format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>{twiml}")
}

mod twiml {
    use xmlserde::xml_serde_enum;
    use xmlserde_derives::XmlSerialize;

    #[derive(PartialEq, Eq, XmlSerialize)]
    #[xmlserde(root = b"Response")]
    pub struct Response {
        #[xmlserde(ty = "untag")]
        pub actions: Vec<ResponseAction>,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum ResponseAction {
        #[xmlserde(name = b"Say")]
        Say(SayAction),
        #[xmlserde(name = b"Connect")]
        Connect(ConnectAction),
        #[xmlserde(name = b"Hangup")]
        Hangup(HangupAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct SayAction {
        #[xmlserde(ty = "text")]
        pub text: String,
        #[xmlserde(name = b"voice", ty = "attr")]
        pub voice: Option<String>,
        #[xmlserde(name = b"loop", ty = "attr")]
        pub lp: Option<u16>,
        #[xmlserde(name = b"language", ty = "attr")]
        pub language: Option<String>,
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct HangupAction {
        #[xmlserde(ty = "text")]
        pub text: String,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub struct ConnectAction {
        #[xmlserde(ty = "untag")]
        pub connection: Connection,
    }

    #[derive(PartialEq, Eq, XmlSerialize)]
    pub enum Connection {
        #[xmlserde(name = b"Stream")]
        Stream(StreamAction),
    }

    #[derive(PartialEq, Eq, XmlSerialize, Default)]
    pub struct StreamAction {
        #[xmlserde(name = b"url", ty = "attr")]
        pub url: String,
        #[xmlserde(name = b"name", ty = "attr")]
        pub name: Option<String>,
        #[xmlserde(name = b"track", ty = "attr")]
        pub track: Option<StreamTrack>,
    }

    xml_serde_enum! {
        #[derive(PartialEq, Eq, Debug)]
        StreamTrack {
            Inbound => "inbound_track",
            Outbound => "outbound_track",
            Both => "both_tracks",
        }
    }
}
pub use twiml::*;

mod ws {
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    /// Messages arriving on the media websocket.  Audio frames, DTMF
    /// presses, and stream lifecycle markers all come in on this socket.
    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "lowercase", tag = "event")]
    pub enum TwilioMessage {
        Connected {
            protocol: String,
            version: String,
        },
        Start {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            start: StartMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Media {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            media: MediaMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Dtmf {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            dtmf: DtmfMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Stop {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            stop: StopMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
        Mark {
            #[serde(rename = "sequenceNumber")]
            sequence_number: String,
            mark: MarkMeta,
            #[serde(rename = "streamSid")]
            stream_sid: String,
        },
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize, Debug)]
    pub struct StartMeta {
        #[serde(rename = "streamSid")]
        pub stream_sid: String,
        #[serde(rename = "accountSid")]
        pub account_sid: String,
        #[serde(rename = "callSid")]
        pub call_sid: String,
        #[serde(default)]
        pub tracks: Vec<String>,
        #[serde(rename = "customParameters", default)]
        pub custom_parameters: HashMap<String, String>,
        #[serde(rename = "mediaFormat")]
        pub media_format: MediaFormat,
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize, Debug)]
    pub struct MediaFormat {
        pub encoding: String,
        #[serde(rename = "sampleRate")]
        pub sample_rate: u32,
        pub channels: u16,
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize)]
    pub struct MediaMeta {
        pub track: MediaTrack,
        pub chunk: String,
        pub timestamp: String,
        pub payload: String,
    }

    #[derive(Serialize, Deserialize)]
    #[serde(rename_all = "lowercase")]
    pub enum MediaTrack {
        Inbound,
        Outbound,
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize)]
    pub struct DtmfMeta {
        pub track: String,
        pub digit: String,
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize)]
    pub struct StopMeta {
        #[serde(rename = "accountSid")]
        pub account_sid: String,
        #[serde(rename = "callSid")]
        pub call_sid: String,
    }

    #[allow(dead_code)]
    #[derive(Serialize, Deserialize)]
    pub struct MarkMeta {
        pub name: String,
    }
}
pub use ws::*;

mod status {
    use serde::Deserialize;

    #[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
    #[serde(rename_all = "kebab-case")]
    pub enum CallStatus {
        Queued,
        Initiated,
        Ringing,
        InProgress,
        Completed,
        Busy,
        Failed,
        NoAnswer,
        Canceled,
    }

    impl CallStatus {
        /// Statuses that mean the call is over and the session must move
        /// to scoring/teardown.
        pub fn is_terminal(&self) -> bool {
            matches!(
                self,
                CallStatus::Completed
                    | CallStatus::Busy
                    | CallStatus::Failed
                    | CallStatus::NoAnswer
                    | CallStatus::Canceled
            )
        }
    }

    /// Form payload Twilio posts to the status callback URL.
    #[allow(dead_code)]
    #[derive(Deserialize, Debug)]
    #[serde(rename_all = "PascalCase")]
    pub struct TwilioStatusPayload {
        pub account_sid: String,
        pub call_sid: String,
        pub call_status: CallStatus,
        pub from: String,
        pub to: String,
        #[serde(default)]
        pub call_duration: Option<String>,
    }

    /// Response body from the Twilio call-creation/update API; we only
    /// care about the assigned call sid.
    #[derive(Deserialize, Debug)]
    pub struct TwilioCallResource {
        pub sid: String,
    }
}
pub use status::*;

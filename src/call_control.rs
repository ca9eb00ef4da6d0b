use crate::error::ControlError;
use crate::twilio_types::{
    wrap_twiml, ConnectAction, Connection, HangupAction, Response, ResponseAction, SayAction,
    StreamAction, StreamTrack, TwilioCallResource,
};

use std::collections::HashMap;
use tracing::{debug, error};

/// A decision the state machine wants carried out on the live call.
/// `Speak` re-arms audio capture after the line is spoken so the candidate
/// can reply; `SpeakAndHangup` closes the call after the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallInstruction {
    Speak(String),
    SpeakAndHangup(String),
    Hangup,
}

pub trait CallControl: Send + Sync {
    fn execute(
        &self,
        call_sid: &str,
        instruction: CallInstruction,
    ) -> impl std::future::Future<Output = Result<(), ControlError>> + Send;
}

pub struct TwilioCallControl {
    http_client: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    /// Externally reachable host, used to build the media stream and
    /// status callback URLs Twilio calls back on.
    public_host: String,
}

impl TwilioCallControl {
    pub fn new(
        http_client: reqwest::Client,
        account_sid: String,
        auth_token: String,
        from_number: String,
        public_host: String,
    ) -> Self {
        Self {
            http_client,
            account_sid,
            auth_token,
            from_number,
            public_host,
        }
    }

    fn capture_action(&self) -> ResponseAction {
        ResponseAction::Connect(ConnectAction {
            connection: Connection::Stream(StreamAction {
                url: format!("wss://{}/media", self.public_host),
                track: Some(StreamTrack::Inbound),
                ..Default::default()
            }),
        })
    }

    /// Render one instruction as TwiML.  Speaking always ends by
    /// reconnecting the inbound media stream; capture is suspended while
    /// the provider reads the line, which is the desired half-duplex
    /// behavior.
    pub fn twiml_for(&self, instruction: &CallInstruction) -> String {
        let actions = match instruction {
            CallInstruction::Speak(text) => vec![
                ResponseAction::Say(SayAction {
                    text: text.clone(),
                    ..Default::default()
                }),
                self.capture_action(),
            ],
            CallInstruction::SpeakAndHangup(text) => vec![
                ResponseAction::Say(SayAction {
                    text: text.clone(),
                    ..Default::default()
                }),
                ResponseAction::Hangup(HangupAction::default()),
            ],
            CallInstruction::Hangup => vec![ResponseAction::Hangup(HangupAction::default())],
        };
        wrap_twiml(xmlserde::xml_serialize(Response { actions }))
    }

    /// Place the outbound interview call.  The initial TwiML only opens
    /// the media stream; the state machine speaks the greeting once the
    /// stream reports in, so every utterance flows through one path.
    pub async fn place_call(&self, to: &str) -> Result<String, ControlError> {
        let account_sid = &self.account_sid;
        let url =
            format!("https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Calls.json");
        let twiml = wrap_twiml(xmlserde::xml_serialize(Response {
            actions: vec![self.capture_action()],
        }));
        let status_callback = format!("https://{}/twilio/status", self.public_host);
        let mut form = HashMap::new();
        form.insert("To", to.to_string());
        form.insert("From", self.from_number.clone());
        form.insert("Twiml", twiml);
        form.insert("StatusCallback", status_callback);
        let resp = self
            .http_client
            .post(url)
            .basic_auth(account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(status = status.as_u16(), body = %body, "call placement rejected");
            return Err(ControlError::Api {
                status: status.as_u16(),
                body,
            });
        }
        let resource = resp.json::<TwilioCallResource>().await?;
        debug!(call=%resource.sid, to=%to, "outbound call placed");
        Ok(resource.sid)
    }

    async fn update_call(&self, call_sid: &str, twiml: String) -> Result<(), ControlError> {
        let account_sid = &self.account_sid;
        let url = format!(
            "https://api.twilio.com/2010-04-01/Accounts/{account_sid}/Calls/{call_sid}.json"
        );
        let mut form = HashMap::new();
        form.insert("Twiml", twiml);
        let resp = self
            .http_client
            .post(url)
            .basic_auth(account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            error!(call=%call_sid, status = status.as_u16(), body = %body, "call update rejected");
            return Err(ControlError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

impl CallControl for TwilioCallControl {
    async fn execute(
        &self,
        call_sid: &str,
        instruction: CallInstruction,
    ) -> Result<(), ControlError> {
        debug!(call=%call_sid, instruction=?instruction, "executing call instruction");
        let twiml = self.twiml_for(&instruction);
        self.update_call(call_sid, twiml).await
    }
}

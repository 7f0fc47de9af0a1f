use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::SignalingError;
use crate::media::{IceCandidate, MediaEvent};

/// Messages sent from client to server
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ClientMessage {
    /// Negotiate a media session from the browser's SDP offer
    #[serde(rename = "start", rename_all = "camelCase")]
    Start { sdp_offer: String },

    /// Tear down the session
    #[serde(rename = "stop")]
    Stop,

    /// Candidate discovered by the browser
    #[serde(rename = "onIceCandidate")]
    OnIceCandidate { candidate: IceCandidate },
}

impl ClientMessage {
    const KINDS: [&'static str; 3] = ["start", "stop", "onIceCandidate"];

    /// Parse an inbound text frame.
    ///
    /// A missing or malformed `id` is a protocol error, an unrecognized `id`
    /// is reported by name.
    pub fn parse(text: &str) -> Result<Self, SignalingError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| SignalingError::Protocol(e.to_string()))?;

        let kind = match value.get("id") {
            Some(Value::String(kind)) => kind.as_str(),
            Some(_) => {
                return Err(SignalingError::Protocol(
                    "field `id` must be a string".to_string(),
                ));
            }
            None => return Err(SignalingError::Protocol("missing field `id`".to_string())),
        };
        if !Self::KINDS.contains(&kind) {
            return Err(SignalingError::UnknownMessage(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| SignalingError::Protocol(e.to_string()))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Start { .. } => "start",
            ClientMessage::Stop => "stop",
            ClientMessage::OnIceCandidate { .. } => "onIceCandidate",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "id")]
pub enum ServerMessage {
    /// SDP answer for a successful start
    #[serde(rename = "startResponse", rename_all = "camelCase")]
    StartResponse { sdp_answer: String },

    /// Candidate discovered by the media server
    #[serde(rename = "iceCandidate")]
    IceCandidate { candidate: IceCandidate },

    /// Notification raised by the media filter, forwarded untouched
    #[serde(rename = "filterEvent")]
    FilterEvent { event: Value },

    /// Error response
    #[serde(rename = "error")]
    Error { message: String },
}

impl From<MediaEvent> for ServerMessage {
    fn from(event: MediaEvent) -> Self {
        match event {
            MediaEvent::CandidateFound(candidate) => ServerMessage::IceCandidate { candidate },
            MediaEvent::Filter(event) => ServerMessage::FilterEvent { event },
            MediaEvent::Error(message) => ServerMessage::Error { message },
        }
    }
}

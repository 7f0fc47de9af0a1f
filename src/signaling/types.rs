use std::fmt;

use rand::Rng;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tracing::debug;

use super::messages::ServerMessage;
use crate::media::MediaError;

/// Signaling errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("Invalid message: {0}")]
    Protocol(String),

    #[error("Invalid message id: {0}")]
    UnknownMessage(String),

    #[error("{0}")]
    Negotiation(#[from] MediaError),

    #[error("session already exists for connection {0}")]
    DuplicateSession(ConnectionId),

    #[error("session already started")]
    AlreadyStarted,

    #[error("session released")]
    SessionReleased,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

const CONNECTION_ID_LEN: usize = 21;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Connection ID: 21-byte fixed array ("conn_" + 16 hex)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    bytes: [u8; CONNECTION_ID_LEN],
    len: u8,
}

impl ConnectionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        bytes[..5].copy_from_slice(b"conn_");

        let value: u64 = rand::rng().random();
        for i in 0..16 {
            let nibble = ((value >> (60 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self {
            bytes,
            len: CONNECTION_ID_LEN as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        let src = s.as_bytes();
        let len = src.len().min(CONNECTION_ID_LEN);
        bytes[..len].copy_from_slice(&src[..len]);
        Self {
            bytes,
            len: len as u8,
        }
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

/// Sending half of a connection's outbound queue.
///
/// A single writer task drains the queue into the socket, so messages from
/// the dispatcher and the event relay never interleave on the wire.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbox {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn send(&self, message: &ServerMessage) -> Result<(), SignalingError> {
        let json = serde_json::to_string(message)?;
        self.tx
            .send(OutboundMessage::from(json))
            .map_err(|_| SignalingError::Transport("connection closed".to_string()))
    }

    /// Best-effort error reply
    pub fn send_error(&self, message: impl Into<String>) {
        let reply = ServerMessage::Error {
            message: message.into(),
        };
        if let Err(e) = self.send(&reply) {
            debug!("Dropping error reply: {}", e);
        }
    }
}

//! PubSub wire frames.
//!
//! Every frame is a JSON text message tagged by `type`. The shapes follow the
//! platform's published contract and must not be changed here.

use std::fmt;

use serde::{Deserialize, Serialize};
use tungstenite::protocol::Message as WsMessage;

use crate::utils::error::DecodeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Listen { nonce: String, data: ListenData },
    Unlisten { nonce: String, data: ListenData },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenData {
    pub topics: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    Response {
        #[serde(default)]
        nonce: Option<String>,
        #[serde(default)]
        error: String,
    },
    Message { data: MessageData },
    Pong,
    Reconnect,
}

/// Body of a `MESSAGE` frame. `message` is itself a JSON document, sent as a string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    pub topic: String,
    pub message: String,
}

/// Error codes carried by `RESPONSE` frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseError {
    BadAuth,
    BadTopic,
    BadMessage,
    Server,
    Other(String),
}

impl ResponseError {
    /// Maps the `error` field of a `RESPONSE`; an empty string means success.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "" => None,
            "ERR_BADAUTH" => Some(ResponseError::BadAuth),
            "ERR_BADTOPIC" => Some(ResponseError::BadTopic),
            "ERR_BADMESSAGE" => Some(ResponseError::BadMessage),
            "ERR_SERVER" => Some(ResponseError::Server),
            other => Some(ResponseError::Other(other.to_string())),
        }
    }

    /// Server-side and unknown errors may succeed elsewhere; the rest never will.
    pub fn is_transient(&self) -> bool {
        matches!(self, ResponseError::Server | ResponseError::Other(_))
    }
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseError::BadAuth => f.write_str("ERR_BADAUTH"),
            ResponseError::BadTopic => f.write_str("ERR_BADTOPIC"),
            ResponseError::BadMessage => f.write_str("ERR_BADMESSAGE"),
            ResponseError::Server => f.write_str("ERR_SERVER"),
            ResponseError::Other(code) => f.write_str(code),
        }
    }
}

pub fn new_nonce() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

impl ClientFrame {
    pub fn listen(nonce: String, topic_key: &str, auth_token: &str) -> Self {
        ClientFrame::Listen {
            nonce,
            data: ListenData {
                topics: vec![topic_key.to_string()],
                auth_token: Some(auth_token.to_string()),
            },
        }
    }

    pub fn unlisten(nonce: String, topic_key: &str) -> Self {
        ClientFrame::Unlisten {
            nonce,
            data: ListenData {
                topics: vec![topic_key.to_string()],
                auth_token: None,
            },
        }
    }

    pub fn to_ws(&self) -> WsMessage {
        // Serializing these plain structs cannot fail.
        let json = serde_json::to_string(self).unwrap_or_default();
        WsMessage::text(json)
    }
}

impl ServerFrame {
    pub fn parse(text: &str) -> Result<Self, DecodeError> {
        Ok(serde_json::from_str(text)?)
    }
}

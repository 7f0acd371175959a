//! Protocol message types

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors from encoding or decoding control messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Control-channel message, discriminated by the `type` field.
///
/// Text frames on the control socket carry exactly one of these; response
/// bodies travel in a separate binary frame (see [`ResponseFrames`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Client announces itself for a session after the socket opens
    Register {
        role: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Relay acknowledges a registration
    Registered {
        role: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    /// Relay-side failure, fatal before registration completes
    Error { error: String },
    /// Inbound HTTP request to forward to the local server
    Request {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        request: InboundRequest,
    },
    /// Response metadata; a binary frame with the body follows when
    /// `body_length > 0`
    Response {
        #[serde(rename = "requestId")]
        request_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
        response: ResponseMeta,
    },
    /// Any type this client does not know about (forward-compatible)
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Build the registration message for a session.
    pub fn register(session_id: &str) -> Self {
        ControlMessage::Register {
            role: crate::DEVELOPER_ROLE.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// The HTTP request description carried inside a `request` message.
///
/// Only `method` is guaranteed by the relay; everything else defaults so a
/// minimal `{"method":"GET"}` payload still parses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InboundRequest {
    #[serde(default)]
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Raw body value; non-string values are JSON-serialized before the
    /// local fetch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// Response metadata sent ahead of the binary body frame
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMeta {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(rename = "bodyLength")]
    pub body_length: usize,
}

/// A response ready for the wire: one JSON metadata frame, then one binary
/// frame when the body is non-empty.
///
/// Constructing through [`ResponseFrames::new`] is the only way to build
/// one, which keeps the declared `bodyLength` and the actual body frame in
/// agreement.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrames {
    pub metadata: String,
    pub body: Option<Bytes>,
}

impl ResponseFrames {
    pub fn new(
        request_id: &str,
        session_id: &str,
        status_code: u16,
        headers: HashMap<String, String>,
        body: Bytes,
    ) -> Result<Self, ProtocolError> {
        let metadata = ControlMessage::Response {
            request_id: request_id.to_string(),
            session_id: session_id.to_string(),
            response: ResponseMeta {
                status_code,
                headers,
                body_length: body.len(),
            },
        }
        .to_json()?;

        Ok(Self {
            metadata,
            body: if body.is_empty() { None } else { Some(body) },
        })
    }
}

//! Local request forwarding
//!
//! Translates one inbound tunneled request into a local HTTP call and the
//! local response into the outbound two-frame wire format. Failures never
//! escape: they become a 502 response pair so the relay always receives a
//! terminal answer for every request.

use crate::control::Outbound;
use bytes::Bytes;
use devlink_proto::{InboundRequest, ProtocolError, ResponseFrames};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Request headers never replayed against the local server. The HTTP client
/// sets these itself, and stale values break the forwarded request.
const STRIPPED_HEADERS: [&str; 4] = ["host", "connection", "content-length", "accept-encoding"];

/// Errors while forwarding one request to the local server
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("local request failed: {0}")]
    LocalRequest(#[from] reqwest::Error),

    #[error("invalid method '{0}'")]
    Method(String),

    #[error("unserializable request body: {0}")]
    Body(#[from] serde_json::Error),
}

/// What the local server answered, with the body fully buffered so the
/// metadata frame can declare an exact byte count.
#[derive(Debug)]
pub struct LocalResponse {
    pub status_code: u16,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
}

/// Forwards inbound tunneled requests to `http://localhost:{port}` and
/// queues the two-frame response on the control channel.
#[derive(Debug, Clone)]
pub struct RequestForwarder {
    http: reqwest::Client,
    target_port: u16,
}

impl RequestForwarder {
    pub fn new(target_port: u16) -> Self {
        Self {
            http: reqwest::Client::new(),
            target_port,
        }
    }

    /// Handle one `request` message end to end.
    pub(crate) async fn handle(
        &self,
        request_id: String,
        session_id: String,
        inbound: InboundRequest,
        outbound: mpsc::Sender<Outbound>,
    ) {
        let frames = match self.forward(&inbound).await {
            Ok(response) => {
                debug!(
                    "Forwarded request {}: {} ({} body bytes)",
                    request_id,
                    response.status_code,
                    response.body.len()
                );
                ResponseFrames::new(
                    &request_id,
                    &session_id,
                    response.status_code,
                    response.headers,
                    response.body,
                )
            }
            Err(e) => {
                warn!("Local forward failed for request {}: {}", request_id, e);
                self.bad_gateway(&request_id, &session_id, &e)
            }
        };

        match frames {
            Ok(frames) => {
                if outbound.send(Outbound::Response(frames)).await.is_err() {
                    // Socket already torn down; nothing meaningful to answer
                    warn!(
                        "Control channel closed, dropping response for request {}",
                        request_id
                    );
                }
            }
            Err(e) => warn!(
                "Failed to encode response frames for request {}: {}",
                request_id, e
            ),
        }
    }

    /// The fallible half: one local HTTP exchange with the body read as
    /// bytes (bodies may be images or other binary content).
    pub async fn forward(&self, inbound: &InboundRequest) -> Result<LocalResponse, ForwardError> {
        let path = inbound.path.as_deref().unwrap_or("/");
        let url = format!("http://localhost:{}{}", self.target_port, path);

        let method = reqwest::Method::from_bytes(inbound.method.as_bytes())
            .map_err(|_| ForwardError::Method(inbound.method.clone()))?;
        let has_body = method != reqwest::Method::GET && method != reqwest::Method::HEAD;

        let mut builder = self.http.request(method, &url);
        for (name, value) in &inbound.headers {
            if !is_stripped_header(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if has_body {
            if let Some(body) = &inbound.body {
                builder = builder.body(body_text(body)?);
            }
        }

        let response = builder.send().await?;

        let status_code = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
        let body = response.bytes().await?;

        Ok(LocalResponse {
            status_code,
            headers,
            body,
        })
    }

    /// Explicit 502 branch so the relay side always sees a terminal
    /// response pair, never a silent drop.
    fn bad_gateway(
        &self,
        request_id: &str,
        session_id: &str,
        error: &ForwardError,
    ) -> Result<ResponseFrames, ProtocolError> {
        let payload = serde_json::json!({
            "error": "Failed to forward request",
            "details": error.to_string(),
            "targetPort": self.target_port,
        });

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        ResponseFrames::new(
            request_id,
            session_id,
            502,
            headers,
            Bytes::from(payload.to_string()),
        )
    }
}

/// Body value as sent to the local server: strings verbatim, anything else
/// JSON-serialized.
fn body_text(body: &serde_json::Value) -> Result<String, ForwardError> {
    match body {
        serde_json::Value::String(s) => Ok(s.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

pub(crate) fn is_stripped_header(name: &str) -> bool {
    STRIPPED_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h))
}

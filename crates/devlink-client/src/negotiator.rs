//! Relay session negotiation
//!
//! One HTTP exchange turns a `(target port, relay)` pair into a
//! `(session id, public tunnel URL)` pair. Retrying is the caller's
//! business; there is none in the current design.

use crate::error::TunnelError;
use crate::relay::RelayTarget;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[derive(Debug, Serialize)]
struct CreateSessionBody {
    #[serde(rename = "targetPort")]
    target_port: u16,
    #[serde(rename = "enableP2P")]
    enable_p2p: bool,
}

#[derive(Debug, Deserialize)]
struct CreateSessionReply {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "tunnelUrl")]
    tunnel_url: String,
}

#[derive(Debug, Clone)]
pub struct SessionNegotiator {
    http: reqwest::Client,
}

impl SessionNegotiator {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// POST the create-session request and return `(session_id, tunnel_url)`
    /// verbatim from the relay's reply.
    pub async fn create_session(
        &self,
        relay: &RelayTarget,
        target_port: u16,
    ) -> Result<(String, String), TunnelError> {
        let url = relay.create_session_url();
        debug!("Negotiating tunnel session at {} for port {}", url, target_port);

        let response = self
            .http
            .post(&url)
            .json(&CreateSessionBody {
                target_port,
                enable_p2p: false,
            })
            .send()
            .await
            .map_err(|e| TunnelError::Transport(format!("create-session request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            // Non-2xx bodies are plain error text
            let body = response.text().await.unwrap_or_default();
            warn!("Relay refused to create session ({}): {}", status, body);
            return Err(TunnelError::SessionCreation(body));
        }

        let reply: CreateSessionReply = response
            .json()
            .await
            .map_err(|e| TunnelError::Transport(format!("invalid create-session reply: {}", e)))?;

        Ok((reply.session_id, reply.tunnel_url))
    }
}

impl Default for SessionNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

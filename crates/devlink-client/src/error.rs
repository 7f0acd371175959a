//! Client error types

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by tunnel creation and teardown
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Raised synchronously, without touching any existing session
    #[error("invalid target port {0} (expected 1-65535)")]
    InvalidPort(u16),

    #[error("invalid relay URL '{url}': {reason}")]
    InvalidRelayUrl { url: String, reason: String },

    /// Relay answered the create-session call with a non-2xx status; the
    /// message is the response body text
    #[error("session negotiation failed: {0}")]
    SessionCreation(String),

    #[error("no 'registered' acknowledgement within {0:?}")]
    HandshakeTimeout(Duration),

    /// Relay sent an `error` message before registration completed
    #[error("relay rejected registration: {0}")]
    HandshakeRejected(String),

    /// Socket-level or DNS/connect failure
    #[error("transport error: {0}")]
    Transport(String),

    /// `stop_tunnel` tore the session down while creation was in flight
    #[error("tunnel was stopped")]
    Stopped,
}

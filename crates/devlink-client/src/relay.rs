//! Relay addressing
//!
//! Turns a relay base URL into the two endpoints the client talks to: the
//! HTTP create-session endpoint and the WebSocket control endpoint.

use crate::error::TunnelError;
use devlink_proto::{CONTROL_SOCKET_PATH, CREATE_SESSION_PATH};
use url::Url;

/// Relay used when the caller does not specify one
pub const DEFAULT_RELAY_URL: &str = "https://relay.devlink.dev";

/// Hosted control endpoint used for relays that are not on loopback
pub const EXTERNAL_CONTROL_ENDPOINT: &str = "wss://relay.devlink.dev/ws";

/// A parsed relay base URL plus the locality decision derived from it.
///
/// Locality is a deployment-time policy, not a protocol difference: it only
/// selects the WebSocket endpoint (derived ws/wss for loopback relays, the
/// hosted endpoint otherwise). Message shapes are identical either way.
#[derive(Debug, Clone)]
pub struct RelayTarget {
    base: Url,
}

impl RelayTarget {
    pub fn parse(raw: &str) -> Result<Self, TunnelError> {
        let base = Url::parse(raw).map_err(|e| TunnelError::InvalidRelayUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;

        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TunnelError::InvalidRelayUrl {
                    url: raw.to_string(),
                    reason: format!("unsupported scheme '{}'", other),
                })
            }
        }
        if base.host_str().is_none() {
            return Err(TunnelError::InvalidRelayUrl {
                url: raw.to_string(),
                reason: "missing host".to_string(),
            });
        }

        Ok(Self { base })
    }

    /// Loopback addresses and `localhost` count as local.
    pub fn is_local(&self) -> bool {
        match self.base.host() {
            Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
            Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
            None => false,
        }
    }

    pub fn create_session_url(&self) -> String {
        format!("{}{}", self.base_trimmed(), CREATE_SESSION_PATH)
    }

    /// WebSocket endpoint for this relay: scheme-swapped `{base}/ws` when
    /// local, the hosted endpoint otherwise.
    pub fn control_url(&self) -> String {
        if self.is_local() {
            let scheme = if self.base.scheme() == "https" {
                "wss"
            } else {
                "ws"
            };
            let mut ws = self.base.clone();
            // http->ws and https->wss are both within the special-scheme
            // family, so this cannot fail
            let _ = ws.set_scheme(scheme);
            format!(
                "{}{}",
                ws.as_str().trim_end_matches('/'),
                CONTROL_SOCKET_PATH
            )
        } else {
            EXTERNAL_CONTROL_ENDPOINT.to_string()
        }
    }

    fn base_trimmed(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }
}

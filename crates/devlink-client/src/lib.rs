//! Developer tunnel client
//!
//! Exposes a local HTTP server through a relay: one HTTP exchange creates a
//! named session, a persistent WebSocket control channel registers it and
//! carries inbound requests, and responses stream back as a JSON metadata
//! frame followed by a binary body frame. Connection loss is handled with
//! capped exponential-backoff reconnection.
//!
//! # Quick Start
//!
//! ```ignore
//! use devlink_client::{TunnelManager, TunnelPhase};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = TunnelManager::new(Arc::new(|phase: TunnelPhase| {
//!         let badge = phase.indicator();
//!         println!("{} tunnel {}", badge.glyph, phase.as_str());
//!     }));
//!
//!     let session = manager.create_tunnel(3000, None).await?;
//!     println!("Public URL: {}", session.tunnel_url);
//!
//!     tokio::signal::ctrl_c().await?;
//!     manager.stop_tunnel();
//!     Ok(())
//! }
//! ```

mod control;
mod error;
mod forwarder;
mod manager;
mod negotiator;
mod reconnect;
mod relay;
mod session;

// Re-export public API
pub use error::TunnelError;
pub use forwarder::{ForwardError, LocalResponse, RequestForwarder};
pub use manager::{StatusCallback, TunnelManager};
pub use negotiator::SessionNegotiator;
pub use reconnect::{ReconnectPolicy, ReconnectSchedule};
pub use relay::{RelayTarget, DEFAULT_RELAY_URL, EXTERNAL_CONTROL_ENDPOINT};
pub use session::{Indicator, SessionStatus, TunnelPhase, TunnelSession};

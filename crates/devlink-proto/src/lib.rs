//! Control-channel protocol definitions
//!
//! This crate defines the JSON messages exchanged over the relay WebSocket
//! and the two-frame convention used to carry response bodies: a text frame
//! with JSON metadata, immediately followed by one binary frame holding
//! exactly the declared number of body bytes.

pub mod messages;

pub use messages::{
    ControlMessage, InboundRequest, ProtocolError, ResponseFrames, ResponseMeta,
};

/// Role announced during registration
pub const DEVELOPER_ROLE: &str = "developer";

/// Path on the relay that creates a new tunnel session
pub const CREATE_SESSION_PATH: &str = "/tunnel/create";

/// Path appended to a relay base URL to reach its WebSocket endpoint
pub const CONTROL_SOCKET_PATH: &str = "/ws";

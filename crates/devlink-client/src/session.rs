//! Session registry and status types

/// Lifecycle state of one tunnel session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Active,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Connecting => "connecting",
            SessionStatus::Active => "active",
            SessionStatus::Error => "error",
        }
    }
}

/// One logical tunnel instance.
///
/// `session_id` and `tunnel_url` stay empty until negotiation completes;
/// they are then populated together and only cleared by full teardown.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelSession {
    pub session_id: String,
    pub tunnel_url: String,
    pub target_port: u16,
    pub status: SessionStatus,
}

impl TunnelSession {
    /// Fresh session for a port, before negotiation fills in the identity.
    pub fn connecting(target_port: u16) -> Self {
        Self {
            session_id: String::new(),
            tunnel_url: String::new(),
            target_port,
            status: SessionStatus::Connecting,
        }
    }
}

/// Manager-level phase; `Inactive` means no session exists at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    Inactive,
    Connecting,
    Active,
    Error,
}

impl TunnelPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelPhase::Inactive => "inactive",
            TunnelPhase::Connecting => "connecting",
            TunnelPhase::Active => "active",
            TunnelPhase::Error => "error",
        }
    }

    /// Presentation hint for a status badge or terminal indicator
    pub fn indicator(&self) -> Indicator {
        match self {
            TunnelPhase::Inactive => Indicator {
                glyph: "○",
                color: "gray",
            },
            TunnelPhase::Connecting => Indicator {
                glyph: "◐",
                color: "yellow",
            },
            TunnelPhase::Active => Indicator {
                glyph: "●",
                color: "green",
            },
            TunnelPhase::Error => Indicator {
                glyph: "✕",
                color: "red",
            },
        }
    }
}

/// Glyph + color pair communicated through the status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Indicator {
    pub glyph: &'static str,
    pub color: &'static str,
}

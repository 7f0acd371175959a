//! Tunnel lifecycle manager
//!
//! Composes the negotiator, control channel, forwarder, and reconnect
//! policy into the three-operation host API (create / stop / status) and
//! drives the status-indicator callback.

use crate::control::{ChannelEvent, ControlChannel};
use crate::error::TunnelError;
use crate::forwarder::RequestForwarder;
use crate::negotiator::SessionNegotiator;
use crate::reconnect::{ReconnectPolicy, ReconnectSchedule};
use crate::relay::{RelayTarget, DEFAULT_RELAY_URL};
use crate::session::{SessionStatus, TunnelPhase, TunnelSession};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Host-provided status observer, fired after every phase transition
pub type StatusCallback = Arc<dyn Fn(TunnelPhase) + Send + Sync>;

struct ManagerState {
    session: Option<TunnelSession>,
    channel: Option<ControlChannel>,
    relay: Option<RelayTarget>,
    schedule: ReconnectSchedule,
    reconnect_timer: Option<AbortHandle>,
    /// Bumped on every create and stop; stale events and timers carry an
    /// older value and are ignored
    epoch: u64,
}

struct ManagerInner {
    state: Mutex<ManagerState>,
    status: StatusCallback,
    negotiator: SessionNegotiator,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

/// Orchestrates one tunnel session at a time.
///
/// Explicitly constructible - the host wires up exactly one instance and
/// owns its lifecycle; there is no process-wide singleton. Must be created
/// inside a Tokio runtime (it spawns its event loop).
pub struct TunnelManager {
    inner: Arc<ManagerInner>,
}

impl TunnelManager {
    pub fn new(status: StatusCallback) -> Self {
        Self::with_reconnect_policy(status, ReconnectPolicy::default())
    }

    /// Same as [`TunnelManager::new`] with a custom backoff schedule.
    pub fn with_reconnect_policy(status: StatusCallback, policy: ReconnectPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let inner = Arc::new(ManagerInner {
            state: Mutex::new(ManagerState {
                session: None,
                channel: None,
                relay: None,
                schedule: ReconnectSchedule::new(policy),
                reconnect_timer: None,
                epoch: 0,
            }),
            status,
            negotiator: SessionNegotiator::new(),
            events: events_tx,
        });

        tokio::spawn(event_loop(Arc::downgrade(&inner), events_rx));

        Self { inner }
    }

    /// Create a tunnel exposing `target_port`, tearing down any existing
    /// session first (stop-before-start). Resolves with the active session,
    /// or with the error that stopped creation - in which case the session
    /// object remains queryable with status `Error`.
    pub async fn create_tunnel(
        &self,
        target_port: u16,
        relay_url: Option<&str>,
    ) -> Result<TunnelSession, TunnelError> {
        // Both rejections happen before the idempotent stop so a bad call
        // cannot tear down a healthy session
        if target_port == 0 {
            return Err(TunnelError::InvalidPort(target_port));
        }
        let relay = RelayTarget::parse(relay_url.unwrap_or(DEFAULT_RELAY_URL))?;

        self.stop_tunnel();

        let epoch = {
            let mut state = self.inner.state.lock().unwrap();
            state.epoch += 1;
            state.relay = Some(relay.clone());
            state.schedule.reset();
            state.session = Some(TunnelSession::connecting(target_port));
            state.epoch
        };
        emit(&self.inner, TunnelPhase::Connecting);

        match establish(&self.inner, &relay, target_port, epoch).await {
            Ok(session) => {
                info!(
                    "Tunnel active: {} -> localhost:{}",
                    session.tunnel_url, session.target_port
                );
                emit(&self.inner, TunnelPhase::Active);
                Ok(session)
            }
            Err(TunnelError::Stopped) => Err(TunnelError::Stopped),
            Err(e) => {
                let ours = {
                    let mut state = self.inner.state.lock().unwrap();
                    if state.epoch == epoch {
                        if let Some(session) = state.session.as_mut() {
                            session.status = SessionStatus::Error;
                        }
                        true
                    } else {
                        false
                    }
                };
                if ours {
                    emit(&self.inner, TunnelPhase::Error);
                }
                Err(e)
            }
        }
    }

    /// Stop and discard the current session. Safe to call at any time, any
    /// number of times; never fails.
    pub fn stop_tunnel(&self) {
        let (channel, timer, had_session) = {
            let mut state = self.inner.state.lock().unwrap();
            state.epoch += 1;
            state.schedule.reset();
            state.relay = None;
            let had_session = state.session.take().is_some();
            (state.channel.take(), state.reconnect_timer.take(), had_session)
        };

        // Cancel the backoff timer before the socket so nothing can fire
        // against the torn-down session
        if let Some(timer) = timer {
            timer.abort();
        }
        if let Some(channel) = channel {
            channel.close();
        }
        if had_session {
            debug!("Tunnel stopped");
        }

        emit(&self.inner, TunnelPhase::Inactive);
    }

    /// Snapshot of the current session, if any. No side effects.
    pub fn current_tunnel(&self) -> Option<TunnelSession> {
        self.inner.state.lock().unwrap().session.clone()
    }
}

/// Negotiate, then register over the control channel. Checks the epoch at
/// every resumption so a concurrent stop wins the race.
async fn establish(
    inner: &Arc<ManagerInner>,
    relay: &RelayTarget,
    target_port: u16,
    epoch: u64,
) -> Result<TunnelSession, TunnelError> {
    let (session_id, tunnel_url) = inner.negotiator.create_session(relay, target_port).await?;

    {
        let mut state = inner.state.lock().unwrap();
        if state.epoch != epoch {
            return Err(TunnelError::Stopped);
        }
        // Identity lands as one unit, straight from the negotiation reply
        match state.session.as_mut() {
            Some(session) => {
                session.session_id = session_id.clone();
                session.tunnel_url = tunnel_url;
            }
            None => return Err(TunnelError::Stopped),
        }
    }

    let forwarder = RequestForwarder::new(target_port);
    let channel = ControlChannel::connect(
        &relay.control_url(),
        &session_id,
        forwarder,
        inner.events.clone(),
        epoch,
    )
    .await?;

    let mut state = inner.state.lock().unwrap();
    if state.epoch != epoch {
        drop(state);
        channel.close();
        return Err(TunnelError::Stopped);
    }
    let Some(session) = state.session.as_mut() else {
        drop(state);
        channel.close();
        return Err(TunnelError::Stopped);
    };
    session.status = SessionStatus::Active;
    let snapshot = session.clone();
    state.channel = Some(channel);
    state.schedule.reset();

    Ok(snapshot)
}

/// Consumes channel lifecycle events for as long as the manager lives
async fn event_loop(inner: Weak<ManagerInner>, mut events: mpsc::UnboundedReceiver<ChannelEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        match event {
            ChannelEvent::Closed { epoch } => on_unexpected_close(&inner, epoch),
        }
    }
}

fn on_unexpected_close(inner: &Arc<ManagerInner>, epoch: u64) {
    let phase = {
        let mut state = inner.state.lock().unwrap();
        if state.epoch != epoch {
            // A stop or a newer create already superseded this socket
            return;
        }
        {
            let Some(session) = state.session.as_ref() else {
                return;
            };
            // A Closed event only fires for sockets whose handshake
            // succeeded, so Connecting here means the promotion to Active
            // is still in flight on another task
            if session.status == SessionStatus::Error {
                return;
            }
            warn!(
                "Control channel for session {} lost unexpectedly",
                session.session_id
            );
        }
        state.channel = None;
        schedule_reconnect(inner, &mut state)
    };

    if let Some(phase) = phase {
        emit(inner, phase);
    }
}

/// Must run with the state lock held; returns a phase to emit after the
/// lock is released.
fn schedule_reconnect(inner: &Arc<ManagerInner>, state: &mut ManagerState) -> Option<TunnelPhase> {
    match state.schedule.next_delay() {
        None => {
            warn!("Reconnect attempts exhausted, giving up");
            if let Some(session) = state.session.as_mut() {
                session.status = SessionStatus::Error;
            }
            state.reconnect_timer = None;
            Some(TunnelPhase::Error)
        }
        Some(delay) => {
            info!(
                "Scheduling reconnect attempt {} in {:?}",
                state.schedule.attempt(),
                delay
            );
            let epoch = state.epoch;
            let weak = Arc::downgrade(inner);
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let Some(inner) = weak.upgrade() else { return };
                attempt_reconnect(inner, epoch).await;
            });
            state.reconnect_timer = Some(handle.abort_handle());
            None
        }
    }
}

async fn attempt_reconnect(inner: Arc<ManagerInner>, epoch: u64) {
    let (control_url, session_id, target_port, attempt) = {
        let state = inner.state.lock().unwrap();
        if state.epoch != epoch {
            return;
        }
        let Some(session) = state.session.as_ref() else {
            return;
        };
        let Some(relay) = state.relay.as_ref() else {
            return;
        };
        (
            relay.control_url(),
            session.session_id.clone(),
            session.target_port,
            state.schedule.attempt(),
        )
    };

    info!(
        "Reconnecting control channel for session {} (attempt {})",
        session_id, attempt
    );

    let forwarder = RequestForwarder::new(target_port);
    match ControlChannel::connect(
        &control_url,
        &session_id,
        forwarder,
        inner.events.clone(),
        epoch,
    )
    .await
    {
        Ok(channel) => {
            let mut state = inner.state.lock().unwrap();
            if state.epoch != epoch || state.session.is_none() {
                drop(state);
                channel.close();
                return;
            }
            state.channel = Some(channel);
            state.reconnect_timer = None;
            state.schedule.reset();
            info!("Control channel re-registered");
        }
        Err(e) => {
            warn!("Reconnect attempt {} failed: {}", attempt, e);
            let phase = {
                let mut state = inner.state.lock().unwrap();
                if state.epoch != epoch || state.session.is_none() {
                    return;
                }
                schedule_reconnect(&inner, &mut state)
            };
            if let Some(phase) = phase {
                emit(&inner, phase);
            }
        }
    }
}

/// Fire the status callback, isolated so a panicking host callback cannot
/// take the tunnel down.
fn emit(inner: &ManagerInner, phase: TunnelPhase) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        (inner.status)(phase);
    }));
    if result.is_err() {
        warn!("Status callback panicked for phase '{}'", phase.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording() -> (StatusCallback, Arc<Mutex<Vec<TunnelPhase>>>) {
        let seen: Arc<Mutex<Vec<TunnelPhase>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: StatusCallback = Arc::new(move |phase| {
            sink.lock().unwrap().push(phase);
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn test_invalid_port_rejected_without_state_change() {
        let (callback, seen) = recording();
        let manager = TunnelManager::new(callback);

        let result = manager.create_tunnel(0, None).await;
        assert!(matches!(result, Err(TunnelError::InvalidPort(0))));
        assert!(manager.current_tunnel().is_none());
        // No transition happened, so no callback fired
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_relay_url_rejected_before_teardown() {
        let (callback, seen) = recording();
        let manager = TunnelManager::new(callback);

        let result = manager.create_tunnel(3000, Some("ftp://nope")).await;
        assert!(matches!(result, Err(TunnelError::InvalidRelayUrl { .. })));
        assert!(manager.current_tunnel().is_none());
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (callback, seen) = recording();
        let manager = TunnelManager::new(callback);

        manager.stop_tunnel();
        manager.stop_tunnel();

        assert!(manager.current_tunnel().is_none());
        assert_eq!(
            *seen.lock().unwrap(),
            vec![TunnelPhase::Inactive, TunnelPhase::Inactive]
        );
    }

    #[tokio::test]
    async fn test_panicking_callback_is_contained() {
        let callback: StatusCallback = Arc::new(|_| panic!("host bug"));
        let manager = TunnelManager::new(callback);

        // Must not propagate the panic
        manager.stop_tunnel();
        assert!(manager.current_tunnel().is_none());
    }
}

//! Control channel: the persistent WebSocket to the relay
//!
//! Owns the socket for one connect generation: performs the registration
//! handshake, dispatches inbound `request` messages to the forwarder, and
//! carries outbound two-frame responses. Reconnection is the manager's job;
//! this module only reports an unexpected close.

use crate::error::TunnelError;
use crate::forwarder::RequestForwarder;
use devlink_proto::{ControlMessage, ResponseFrames, DEVELOPER_ROLE};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// No `registered` within this window fails the connect
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound queue entries. A response travels as one entry so the writer
/// never interleaves another response between a metadata frame and its
/// body frame.
#[derive(Debug)]
pub(crate) enum Outbound {
    Text(String),
    Response(ResponseFrames),
}

/// Lifecycle notification from a channel to its manager
#[derive(Debug)]
pub(crate) enum ChannelEvent {
    /// Socket closed or failed after the handshake had completed.
    /// `epoch` identifies the connect generation the socket belonged to.
    Closed { epoch: u64 },
}

/// One live control connection. Dropping the handle does not close the
/// socket; call [`ControlChannel::close`].
pub(crate) struct ControlChannel {
    outbound: mpsc::Sender<Outbound>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ControlChannel {
    /// Open the socket, send the single `register` message, and wait for
    /// the relay's acknowledgement.
    ///
    /// Resolves once `registered` with the developer role arrives; fails on
    /// a relay `error` message, a socket error, a close before
    /// registration, or [`HANDSHAKE_TIMEOUT`].
    pub(crate) async fn connect(
        control_url: &str,
        session_id: &str,
        forwarder: RequestForwarder,
        events: mpsc::UnboundedSender<ChannelEvent>,
        epoch: u64,
    ) -> Result<Self, TunnelError> {
        let connection_id = format!("ctl-{}", uuid::Uuid::new_v4());
        debug!(
            "[{}] Connecting control channel to {}",
            connection_id, control_url
        );

        let (ws, _) = connect_async(control_url)
            .await
            .map_err(|e| TunnelError::Transport(format!("WebSocket connect failed: {}", e)))?;
        let (sink, source) = ws.split();

        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(256);

        // The handshake wait is a single pending-completion slot, fulfilled
        // by exactly one reader arm.
        let (registered_tx, registered_rx) = oneshot::channel::<Result<(), TunnelError>>();

        // Exactly one register message, queued before anything else can be
        let register = ControlMessage::register(session_id)
            .to_json()
            .map_err(|e| TunnelError::Transport(format!("failed to encode register: {}", e)))?;
        outbound_tx
            .send(Outbound::Text(register))
            .await
            .map_err(|_| TunnelError::Transport("outbound queue closed".to_string()))?;

        let writer = tokio::spawn(Self::writer_task(sink, outbound_rx, connection_id.clone()));
        let reader = tokio::spawn(Self::reader_task(
            source,
            forwarder,
            outbound_tx.clone(),
            registered_tx,
            events,
            epoch,
            connection_id.clone(),
        ));

        let channel = Self {
            outbound: outbound_tx,
            reader,
            writer,
        };

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, registered_rx).await {
            Ok(Ok(Ok(()))) => {
                debug!("[{}] Control channel registered", connection_id);
                Ok(channel)
            }
            Ok(Ok(Err(e))) => {
                channel.close();
                Err(e)
            }
            Ok(Err(_)) => {
                channel.close();
                Err(TunnelError::Transport(
                    "connection closed during handshake".to_string(),
                ))
            }
            Err(_) => {
                channel.close();
                Err(TunnelError::HandshakeTimeout(HANDSHAKE_TIMEOUT))
            }
        }
    }

    /// Best-effort teardown: stop both tasks and let the socket drop.
    pub(crate) fn close(&self) {
        self.reader.abort();
        self.writer.abort();
    }

    /// Writer task - owns the sink half of the socket
    async fn writer_task(
        mut sink: SplitSink<WsStream, Message>,
        mut rx: mpsc::Receiver<Outbound>,
        connection_id: String,
    ) {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outbound::Text(text) => sink.send(Message::Text(text)).await,
                Outbound::Response(frames) => {
                    // Metadata first, then the body bytes, as two separate
                    // sends on the same socket
                    match sink.send(Message::Text(frames.metadata)).await {
                        Ok(()) => match frames.body {
                            Some(body) => sink.send(Message::Binary(body.to_vec())).await,
                            None => Ok(()),
                        },
                        Err(e) => Err(e),
                    }
                }
            };

            if let Err(e) = result {
                error!("[{}] WebSocket send error: {}", connection_id, e);
                break;
            }
        }

        debug!("[{}] Control channel writer ended", connection_id);
        let _ = sink.close().await;
    }

    /// Reader task - receives relay messages and dispatches by type
    async fn reader_task(
        mut source: SplitStream<WsStream>,
        forwarder: RequestForwarder,
        outbound: mpsc::Sender<Outbound>,
        registered_tx: oneshot::Sender<Result<(), TunnelError>>,
        events: mpsc::UnboundedSender<ChannelEvent>,
        epoch: u64,
        connection_id: String,
    ) {
        let mut pending = Some(registered_tx);
        let mut registered = false;

        while let Some(result) = source.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    Self::dispatch(
                        &text,
                        &forwarder,
                        &outbound,
                        &mut pending,
                        &mut registered,
                        &connection_id,
                    );
                }
                Ok(Message::Binary(_)) => {
                    trace!("[{}] Ignoring unexpected binary frame", connection_id);
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                    // Pong replies are handled by tungstenite itself
                    trace!("[{}] Keepalive frame", connection_id);
                }
                Ok(Message::Close(_)) => {
                    debug!("[{}] WebSocket close received", connection_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    if let Some(tx) = pending.take() {
                        let _ = tx.send(Err(TunnelError::Transport(format!(
                            "WebSocket error: {}",
                            e
                        ))));
                    } else {
                        error!("[{}] WebSocket read error: {}", connection_id, e);
                    }
                    break;
                }
            }
        }

        if let Some(tx) = pending.take() {
            // Closed before the relay ever acknowledged us; this surfaces
            // through the pending connect, not the reconnect path
            let _ = tx.send(Err(TunnelError::Transport(
                "connection closed before registration".to_string(),
            )));
        } else if registered {
            debug!("[{}] Control channel reader ended", connection_id);
            let _ = events.send(ChannelEvent::Closed { epoch });
        } else {
            // Handshake was rejected; the connect caller already has the
            // error and there is nothing to reconnect to
            debug!("[{}] Socket closed after rejected handshake", connection_id);
        }
    }

    fn dispatch(
        text: &str,
        forwarder: &RequestForwarder,
        outbound: &mpsc::Sender<Outbound>,
        pending: &mut Option<oneshot::Sender<Result<(), TunnelError>>>,
        registered: &mut bool,
        connection_id: &str,
    ) {
        let message = match ControlMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                // Malformed relay JSON is logged, never fatal
                warn!("[{}] Malformed control message: {}", connection_id, e);
                return;
            }
        };

        match message {
            ControlMessage::Registered { role, .. } => {
                if role != DEVELOPER_ROLE {
                    debug!(
                        "[{}] Ignoring 'registered' for role '{}'",
                        connection_id, role
                    );
                } else if let Some(tx) = pending.take() {
                    *registered = true;
                    let _ = tx.send(Ok(()));
                } else {
                    debug!("[{}] Duplicate 'registered' acknowledgement", connection_id);
                }
            }
            ControlMessage::Error { error } => match pending.take() {
                Some(tx) => {
                    let _ = tx.send(Err(TunnelError::HandshakeRejected(error)));
                }
                // After registration these are advisory only
                None => warn!("[{}] Relay reported error: {}", connection_id, error),
            },
            ControlMessage::Request {
                request_id,
                session_id,
                request,
            } => {
                trace!("[{}] Inbound request {}", connection_id, request_id);
                let forwarder = forwarder.clone();
                let outbound = outbound.clone();
                // Forwarding never blocks the read loop
                tokio::spawn(async move {
                    forwarder
                        .handle(request_id, session_id, request, outbound)
                        .await;
                });
            }
            ControlMessage::Register { .. } | ControlMessage::Response { .. } => {
                debug!(
                    "[{}] Ignoring client-direction message from relay",
                    connection_id
                );
            }
            ControlMessage::Unknown => {
                debug!("[{}] Ignoring unknown control message type", connection_id);
            }
        }
    }
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("outbound_closed", &self.outbound.is_closed())
            .finish()
    }
}

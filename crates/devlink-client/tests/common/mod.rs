//! Shared mock relay and local-server helpers for integration tests
#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use futures_util::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

use devlink_client::{StatusCallback, TunnelPhase};

/// Behavior of the mock `/tunnel/create` endpoint
#[derive(Clone)]
pub enum CreateBehavior {
    Ok {
        session_id: String,
        tunnel_url: String,
    },
    Fail {
        status: u16,
        body: String,
    },
}

pub fn create_ok(session_id: &str, tunnel_url: &str) -> CreateBehavior {
    CreateBehavior::Ok {
        session_id: session_id.to_string(),
        tunnel_url: tunnel_url.to_string(),
    }
}

/// Per-socket behavior; receives the upgraded socket and its 1-based
/// connection ordinal
pub type SocketHandler = Arc<dyn Fn(WebSocket, usize) -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Clone)]
struct RelayState {
    create: CreateBehavior,
    handler: SocketHandler,
    connections: Arc<AtomicUsize>,
}

pub struct MockRelay {
    pub addr: SocketAddr,
    connections: Arc<AtomicUsize>,
}

impl MockRelay {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Control sockets accepted so far
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// Start a mock relay with the given negotiation behavior and per-socket
/// script.
pub async fn spawn_relay(create: CreateBehavior, handler: SocketHandler) -> MockRelay {
    let connections = Arc::new(AtomicUsize::new(0));
    let state = RelayState {
        create,
        handler,
        connections: connections.clone(),
    };

    let app = Router::new()
        .route("/tunnel/create", post(create_session))
        .route("/ws", get(control_socket))
        .with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    println!("🛰️  Mock relay listening on {}", addr);
    MockRelay { addr, connections }
}

async fn create_session(State(state): State<RelayState>) -> impl IntoResponse {
    match state.create {
        CreateBehavior::Ok {
            session_id,
            tunnel_url,
        } => (
            StatusCode::OK,
            [("content-type", "application/json")],
            format!(
                r#"{{"sessionId":"{}","tunnelUrl":"{}"}}"#,
                session_id, tunnel_url
            ),
        ),
        CreateBehavior::Fail { status, body } => (
            StatusCode::from_u16(status).unwrap(),
            [("content-type", "text/plain")],
            body,
        ),
    }
}

async fn control_socket(
    State(state): State<RelayState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let ordinal = state.connections.fetch_add(1, Ordering::SeqCst) + 1;
    let handler = state.handler.clone();
    ws.on_upgrade(move |socket| handler(socket, ordinal))
}

/// Read the client's register frame and return it parsed
pub async fn expect_register(socket: &mut WebSocket) -> serde_json::Value {
    let msg = socket
        .recv()
        .await
        .expect("socket closed before register")
        .unwrap();
    let Message::Text(text) = msg else {
        panic!("expected text register frame");
    };

    let register: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(register["type"], "register");
    assert_eq!(register["role"], "developer");
    register
}

/// Read the register frame and acknowledge it; returns the session id
pub async fn acknowledge_register(socket: &mut WebSocket) -> String {
    let register = expect_register(socket).await;
    let session_id = register["sessionId"].as_str().unwrap().to_string();

    let ack = format!(
        r#"{{"type":"registered","role":"developer","sessionId":"{}"}}"#,
        session_id
    );
    socket.send(Message::Text(ack.into())).await.unwrap();

    session_id
}

/// Handler that registers every connection and holds the socket open
pub fn register_and_hold() -> SocketHandler {
    Arc::new(|mut socket, _ordinal| {
        Box::pin(async move {
            acknowledge_register(&mut socket).await;
            while socket.recv().await.is_some() {}
        })
    })
}

/// Spawn a local HTTP app on an OS-assigned port, returning the port
pub async fn spawn_local_app(app: Router) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    port
}

/// A port nothing listens on (bound once, then released)
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Status callback that records every phase transition
pub fn recording() -> (StatusCallback, Arc<Mutex<Vec<TunnelPhase>>>) {
    let seen: Arc<Mutex<Vec<TunnelPhase>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let callback: StatusCallback = Arc::new(move |phase| {
        sink.lock().unwrap().push(phase);
    });
    (callback, seen)
}

pub fn noop_callback() -> StatusCallback {
    Arc::new(|_| {})
}

/// Poll `cond` until it holds or `timeout` elapses
pub async fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

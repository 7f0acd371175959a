//! Reconnection integration tests, run with a compressed backoff schedule.

mod common;

use common::{
    acknowledge_register, create_ok, noop_callback, recording, spawn_relay, wait_until,
    SocketHandler,
};
use devlink_client::{ReconnectPolicy, SessionStatus, TunnelManager, TunnelPhase};
use std::sync::Arc;
use std::time::Duration;

fn fast_policy() -> ReconnectPolicy {
    ReconnectPolicy {
        initial_delay: Duration::from_millis(25),
        max_delay: Duration::from_millis(100),
        max_attempts: 5,
    }
}

#[tokio::test]
async fn test_reconnects_after_unexpected_close() {
    // First connection registers, then the relay drops it; later
    // connections register and stay up
    let handler: SocketHandler = Arc::new(|mut socket, ordinal| {
        Box::pin(async move {
            acknowledge_register(&mut socket).await;
            if ordinal == 1 {
                return;
            }
            while socket.recv().await.is_some() {}
        })
    });
    let relay = spawn_relay(create_ok("s1", "u1"), handler).await;
    let manager = TunnelManager::with_reconnect_policy(noop_callback(), fast_policy());

    let session = manager
        .create_tunnel(3000, Some(&relay.base_url()))
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Active);

    // The client must come back on its own after the drop
    assert!(
        wait_until(|| relay.connection_count() >= 2, Duration::from_secs(5)).await,
        "no reconnect attempt observed"
    );

    // Give the re-registration a moment to settle, then confirm the
    // session recovered and no further reconnects were scheduled
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(relay.connection_count(), 2);
    assert_eq!(
        manager.current_tunnel().unwrap().status,
        SessionStatus::Active
    );
    println!("✅ Reconnect-after-drop test passed");
}

#[tokio::test]
async fn test_reconnect_budget_exhaustion_marks_error() {
    // First connection registers then drops; every later connection hangs
    // up before acknowledging, so each reconnect attempt fails
    let handler: SocketHandler = Arc::new(|mut socket, ordinal| {
        Box::pin(async move {
            if ordinal == 1 {
                acknowledge_register(&mut socket).await;
            }
            // Drop the socket either way
        })
    });
    let relay = spawn_relay(create_ok("s1", "u1"), handler).await;
    let (callback, seen) = recording();
    let manager = TunnelManager::with_reconnect_policy(callback, fast_policy());

    let session = manager
        .create_tunnel(3000, Some(&relay.base_url()))
        .await
        .unwrap();
    assert_eq!(session.status, SessionStatus::Active);

    // All five attempts fail, after which the session is marked Error
    assert!(
        wait_until(
            || {
                manager
                    .current_tunnel()
                    .is_some_and(|s| s.status == SessionStatus::Error)
            },
            Duration::from_secs(10)
        )
        .await,
        "session never reached Error after reconnect exhaustion"
    );

    // Initial connection plus exactly max_attempts reconnects
    assert_eq!(relay.connection_count(), 6);

    // No sixth attempt gets scheduled afterwards
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(relay.connection_count(), 6);

    // The session object is retained in the Error state, not cleared
    let current = manager.current_tunnel().unwrap();
    assert_eq!(current.session_id, "s1");
    assert_eq!(current.status, SessionStatus::Error);

    assert_eq!(seen.lock().unwrap().last(), Some(&TunnelPhase::Error));
    println!("✅ Reconnect exhaustion test passed");
}

#[tokio::test]
async fn test_stop_cancels_pending_reconnect() {
    let handler: SocketHandler = Arc::new(|mut socket, ordinal| {
        Box::pin(async move {
            acknowledge_register(&mut socket).await;
            if ordinal == 1 {
                return;
            }
            while socket.recv().await.is_some() {}
        })
    });
    let relay = spawn_relay(create_ok("s1", "u1"), handler).await;

    // Long enough that the backoff timer is still pending when we stop
    let manager = TunnelManager::with_reconnect_policy(
        noop_callback(),
        ReconnectPolicy {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(500),
            max_attempts: 5,
        },
    );

    manager
        .create_tunnel(3000, Some(&relay.base_url()))
        .await
        .unwrap();

    // Let the unexpected close arrive and the backoff timer start
    tokio::time::sleep(Duration::from_millis(150)).await;
    manager.stop_tunnel();
    assert!(manager.current_tunnel().is_none());

    // A cancelled timer must never dial the relay again
    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(relay.connection_count(), 1);
    println!("✅ Reconnect cancellation test passed");
}

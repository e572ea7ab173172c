use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::advance;

use recipes_ws::testing::{MockConnection, MockServer, MockTransport};
use recipes_ws::{ConnectionState, WebSocketManager};

const URL: &str = "ws://backend.test/api/ws";

fn state_log(manager: &WebSocketManager) -> mpsc::UnboundedReceiver<ConnectionState> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_state(move |state| {
        let _ = tx.send(state);
    });
    rx
}

async fn expect_state(rx: &mut mpsc::UnboundedReceiver<ConnectionState>, want: ConnectionState) {
    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(state)) => assert_eq!(state, want, "unexpected state transition"),
        Ok(None) => panic!("state channel closed while waiting for {want:?}"),
        Err(_) => panic!("timed out waiting for {want:?}"),
    }
}

async fn next_conn(server: &mut MockServer) -> MockConnection {
    server
        .next_connect_timeout(Duration::from_secs(5))
        .await
        .expect("timed out waiting for a connection attempt")
}

#[tokio::test(start_paused = true)]
async fn failed_connect_retries_once_after_the_full_delay() {
    let (transport, mut server) = MockTransport::channel_pair();
    let manager = WebSocketManager::with_transport(transport);
    let mut states = state_log(&manager);

    manager.connect(URL);
    let mut conn = next_conn(&mut server).await;
    expect_state(&mut states, ConnectionState::Connecting).await;

    conn.fail("connection refused");
    expect_state(&mut states, ConnectionState::Waiting).await;

    // Just short of the retry delay: no new attempt yet.
    advance(Duration::from_millis(9_900)).await;
    assert!(
        server.try_next_connect().is_none(),
        "retried before the delay elapsed"
    );

    advance(Duration::from_millis(200)).await;
    let mut retry = next_conn(&mut server).await;
    expect_state(&mut states, ConnectionState::Connecting).await;

    // The timer is one-shot; only this attempt resolving can schedule more.
    advance(Duration::from_secs(60)).await;
    assert!(
        server.try_next_connect().is_none(),
        "extra attempt while the retry handshake was pending"
    );

    retry.complete();
    expect_state(&mut states, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn retry_delay_stays_fixed_across_failures() {
    let (transport, mut server) = MockTransport::channel_pair();
    let manager = WebSocketManager::with_transport(transport);
    let mut states = state_log(&manager);

    manager.connect(URL);
    let mut conn = next_conn(&mut server).await;
    expect_state(&mut states, ConnectionState::Connecting).await;

    for round in 0..3 {
        conn.fail("connection refused");
        expect_state(&mut states, ConnectionState::Waiting).await;

        advance(Duration::from_secs(9)).await;
        assert!(
            server.try_next_connect().is_none(),
            "round {round}: delay shrank below the configured value"
        );

        advance(Duration::from_millis(1_100)).await;
        conn = next_conn(&mut server).await;
        expect_state(&mut states, ConnectionState::Connecting).await;
    }

    conn.complete();
    expect_state(&mut states, ConnectionState::Connected).await;
}

#[tokio::test(start_paused = true)]
async fn dropped_connection_reconnects_immediately() {
    let (transport, mut server) = MockTransport::channel_pair();
    let manager = WebSocketManager::with_transport(transport);
    let mut states = state_log(&manager);

    manager.connect(URL);
    let mut conn = next_conn(&mut server).await;
    conn.complete();
    expect_state(&mut states, ConnectionState::Connecting).await;
    expect_state(&mut states, ConnectionState::Connected).await;

    // Abrupt drop: straight back to connecting. A detour through waiting
    // would fail the state assertion below.
    conn.drop_socket();
    expect_state(&mut states, ConnectionState::Connecting).await;
    let mut retry = next_conn(&mut server).await;
    retry.complete();
    expect_state(&mut states, ConnectionState::Connected).await;

    let stats = manager.stats().await;
    assert_eq!(stats.reconnects, 1);
}

#[tokio::test(start_paused = true)]
async fn server_close_frame_reconnects_immediately() {
    let (transport, mut server) = MockTransport::channel_pair();
    let manager = WebSocketManager::with_transport(transport);
    let mut states = state_log(&manager);

    manager.connect(URL);
    let mut conn = next_conn(&mut server).await;
    conn.complete();
    expect_state(&mut states, ConnectionState::Connecting).await;
    expect_state(&mut states, ConnectionState::Connected).await;

    conn.close_clean(1000).unwrap();
    assert!(
        conn.closed_by_manager(Duration::from_secs(1)).await,
        "manager did not answer the closing handshake"
    );
    expect_state(&mut states, ConnectionState::Connecting).await;

    let mut retry = next_conn(&mut server).await;
    retry.complete();
    expect_state(&mut states, ConnectionState::Connected).await;
}

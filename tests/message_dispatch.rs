use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use recipes_ws::core::WsFrame;
use recipes_ws::testing::{MockConnection, MockServer, MockTransport};
use recipes_ws::{ConnectionState, ServerMessage, WebSocketManager, WsEvent, WsEventKey};

const URL: &str = "ws://backend.test/api/ws";

/// Manager with a completed handshake, ready to receive frames.
async fn connected_manager() -> (WebSocketManager, MockServer, MockConnection) {
    let (transport, mut server) = MockTransport::channel_pair();
    let manager = WebSocketManager::with_transport(transport);

    let (tx, mut connected) = mpsc::unbounded_channel();
    let handle = manager.on_state_kind(ConnectionState::Connected, move || {
        let _ = tx.send(());
    });

    manager.connect(URL);
    let mut conn = server
        .next_connect_timeout(Duration::from_secs(1))
        .await
        .expect("timed out waiting for the connection attempt");
    conn.complete();
    tokio::time::timeout(Duration::from_secs(1), connected.recv())
        .await
        .expect("timed out waiting for the connection to open")
        .expect("state channel closed");
    manager.remove_event_listener(handle);

    (manager, server, conn)
}

async fn recv_one<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("notification channel closed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_frame_fans_out_to_generic_and_kind_listeners() {
    let (manager, _server, conn) = connected_manager().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let any_tx = tx.clone();
    manager.on_message(move |message| {
        let _ = any_tx.send(("any", message));
    });
    let recipes_tx = tx.clone();
    manager.on_message_kind(ServerMessage::RecipesChanged, move |message| {
        let _ = recipes_tx.send(("recipes", message));
    });
    manager.on_message_kind(ServerMessage::TagsChanged, move |message| {
        let _ = tx.send(("tags", message));
    });

    conn.send_text(r#""RecipesChanged""#).unwrap();

    let mut got = vec![recv_one(&mut rx).await, recv_one(&mut rx).await];
    got.sort_by_key(|(tag, _)| *tag);
    assert_eq!(
        got,
        vec![
            ("any", ServerMessage::RecipesChanged),
            ("recipes", ServerMessage::RecipesChanged),
        ]
    );
    assert!(
        rx.try_recv().is_err(),
        "listener for a different kind fired"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn malformed_payloads_are_dropped_without_events() {
    let (manager, _server, conn) = connected_manager().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.on_message(move |message| {
        let _ = tx.send(message);
    });

    for bad in [
        "not json",
        "{}",
        "42",
        r#"{"kind":"RecipesChanged"}"#,
        r#"["RecipesChanged"]"#,
        r#""RecipesDeleted""#,
        "",
    ] {
        conn.send_text(bad).unwrap();
    }
    // The sentinel proves every bad payload above was already processed and
    // produced nothing, and that decoding failures don't kill the session.
    conn.send_text(r#""IngredientsChanged""#).unwrap();

    assert_eq!(recv_one(&mut rx).await, ServerMessage::IngredientsChanged);
    assert!(rx.try_recv().is_err(), "a malformed payload emitted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_text_frames_are_dropped_without_events() {
    let (manager, _server, conn) = connected_manager().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.on_message(move |message| {
        let _ = tx.send(message);
    });

    // Even a decodable payload is rejected when it arrives as binary.
    conn.send_inbound(WsFrame::Binary(Bytes::from_static(b"\"RecipesChanged\"")))
        .unwrap();
    conn.send_inbound(WsFrame::Ping(Bytes::new())).unwrap();
    conn.send_inbound(WsFrame::Pong(Bytes::new())).unwrap();
    conn.send_text(r#""TagsChanged""#).unwrap();

    assert_eq!(recv_one(&mut rx).await, ServerMessage::TagsChanged);
    assert!(rx.try_recv().is_err(), "a non-text frame emitted");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removed_listener_stops_receiving_mid_stream() {
    let (manager, _server, conn) = connected_manager().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = manager.on_message(move |message| {
        let _ = tx.send(message);
    });

    conn.send_text(r#""RecipesChanged""#).unwrap();
    assert_eq!(recv_one(&mut rx).await, ServerMessage::RecipesChanged);

    manager.remove_event_listener(handle);
    conn.send_text(r#""RecipesChanged""#).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "removed listener kept receiving");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn raw_listener_api_delivers_typed_payloads() {
    let (manager, _server, conn) = connected_manager().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.add_event_listener(
        WsEventKey::MessageKind(ServerMessage::TagsChanged),
        move |event| {
            if let WsEvent::Message(message) = event {
                let _ = tx.send(*message);
            }
        },
    );

    conn.send_text(r#""TagsChanged""#).unwrap();
    assert_eq!(recv_one(&mut rx).await, ServerMessage::TagsChanged);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_listener_does_not_starve_the_others() {
    let (manager, _server, conn) = connected_manager().await;

    manager.on_message(|_| panic!("listener bug"));
    let (tx, mut rx) = mpsc::unbounded_channel();
    manager.on_message(move |message| {
        let _ = tx.send(message);
    });

    conn.send_text(r#""RecipesChanged""#).unwrap();
    assert_eq!(recv_one(&mut rx).await, ServerMessage::RecipesChanged);

    // The session survives the panic as well.
    conn.send_text(r#""TagsChanged""#).unwrap();
    assert_eq!(recv_one(&mut rx).await, ServerMessage::TagsChanged);
}

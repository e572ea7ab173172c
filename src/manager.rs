use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep, Instant, Sleep};
use tracing::{debug, error, info, warn};

use crate::core::{
    ConnectionState, ServerMessage, WebSocketError, WebSocketResult, WsConnectionStats, WsEvent,
    WsEventKey, WsFrame, WsManagerConfig,
};
use crate::emitter::{EventEmitter, ListenerHandle};
use crate::transport::{TungsteniteTransport, WsTransport};

/// Emitter specialization carrying the manager's event space.
pub type WsEventEmitter = EventEmitter<WsEventKey, WsEvent>;

/// Handle returned by the manager's listener registration methods.
pub type WsListenerHandle = ListenerHandle<WsEventKey>;

/// Decode one inbound text payload into a notification kind.
///
/// The payload must be a JSON string literal naming a [`ServerMessage`]
/// variant; anything else (invalid JSON, unknown kind) is a parse failure
/// that the caller drops and logs.
pub fn decode_server_message(payload: &[u8]) -> WebSocketResult<ServerMessage> {
    sonic_rs::from_slice(payload).map_err(|err| WebSocketError::ParseFailed(err.to_string()))
}

enum Command {
    Connect(String),
    Disconnect,
    GetStats(oneshot::Sender<WsConnectionStats>),
}

enum ConnEvent {
    Opened,
    Frame(WsFrame),
    Closed { clean: bool, detail: String },
}

/// Driver-side handle to one connection attempt. Dropping it (after flipping
/// the detach flag) guarantees the attempt can deliver nothing further.
struct Connection {
    events: mpsc::UnboundedReceiver<ConnEvent>,
    detach: watch::Sender<bool>,
}

#[derive(Default)]
struct StatsTracker {
    connected_at: Option<Instant>,
    last_message_at: Option<Instant>,
    messages: u64,
    connects: u64,
}

/// Reconnecting websocket client for the backend's notification feed.
///
/// The manager owns at most one transport connection at a time and drives the
/// `disconnected → connecting → connected → waiting` lifecycle: a failed
/// connection attempt retries on a fixed delay forever, a dropped established
/// connection reconnects immediately, and only an explicit [`disconnect`]
/// stays down. Every decoded notification and every state change is published
/// through the embedded event emitter; no public operation blocks, returns an
/// error, or panics.
///
/// The handle is cheap to clone and all clones drive the same connection.
/// Dropping the last handle stops the driver task and closes any live
/// connection.
///
/// [`disconnect`]: WebSocketManager::disconnect
#[derive(Clone)]
pub struct WebSocketManager {
    emitter: Arc<WsEventEmitter>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Default for WebSocketManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketManager {
    /// Manager over the production tungstenite transport with default
    /// settings. Must be called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_transport(TungsteniteTransport::default())
    }

    /// Manager over an arbitrary transport, primarily for tests.
    pub fn with_transport<T: WsTransport>(transport: T) -> Self {
        Self::with_config(transport, WsManagerConfig::default())
    }

    /// Spawns the driver task onto the current tokio runtime and returns the
    /// handle to it.
    pub fn with_config<T: WsTransport>(transport: T, config: WsManagerConfig) -> Self {
        let emitter = Arc::new(WsEventEmitter::new());
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            transport,
            emitter: Arc::clone(&emitter),
            config,
            commands: commands_rx,
            url: None,
            state: ConnectionState::Disconnected,
            conn: None,
            retry: None,
            attempt: 0,
            stats: StatsTracker::default(),
        };
        tokio::spawn(driver.run());

        Self {
            emitter,
            commands: commands_tx,
        }
    }

    /// Point the manager at `url`: any existing connection and pending retry
    /// are torn down unconditionally and a fresh transport is opened. Legal
    /// in every state, including while already connected or connecting.
    pub fn connect(&self, url: impl Into<String>) {
        let _ = self.commands.send(Command::Connect(url.into()));
    }

    /// Tear down any connection or pending retry and stay down until the
    /// next [`connect`]. Idempotent; disconnecting an already-disconnected
    /// manager changes nothing and publishes nothing.
    ///
    /// [`connect`]: WebSocketManager::connect
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }

    /// Register `callback` under `key`. The returned handle removes exactly
    /// this registration; the callback runs on the driver task, so it should
    /// hand significant work off rather than block.
    pub fn add_event_listener(
        &self,
        key: WsEventKey,
        callback: impl Fn(&WsEvent) + Send + Sync + 'static,
    ) -> WsListenerHandle {
        self.emitter.subscribe(key, callback)
    }

    /// Remove a previous registration. Unknown or already-removed handles
    /// are ignored.
    pub fn remove_event_listener(&self, handle: WsListenerHandle) {
        self.emitter.unsubscribe(handle);
    }

    /// Every decoded notification, regardless of kind.
    pub fn on_message(
        &self,
        callback: impl Fn(ServerMessage) + Send + Sync + 'static,
    ) -> WsListenerHandle {
        self.emitter.subscribe(WsEventKey::Message, move |event| {
            if let WsEvent::Message(message) = event {
                callback(*message);
            }
        })
    }

    /// Notifications of one specific kind.
    pub fn on_message_kind(
        &self,
        kind: ServerMessage,
        callback: impl Fn(ServerMessage) + Send + Sync + 'static,
    ) -> WsListenerHandle {
        self.emitter
            .subscribe(WsEventKey::MessageKind(kind), move |event| {
                if let WsEvent::Message(message) = event {
                    callback(*message);
                }
            })
    }

    /// Every state transition, with the state just entered.
    pub fn on_state(
        &self,
        callback: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> WsListenerHandle {
        self.emitter.subscribe(WsEventKey::State, move |event| {
            if let WsEvent::State(state) = event {
                callback(*state);
            }
        })
    }

    /// Transitions into one specific state.
    pub fn on_state_kind(
        &self,
        state: ConnectionState,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> WsListenerHandle {
        self.emitter
            .subscribe(WsEventKey::StateKind(state), move |_| callback())
    }

    /// Statistics snapshot answered by the driver.
    pub async fn stats(&self) -> WsConnectionStats {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self.commands.send(Command::GetStats(reply_tx));
        reply_rx
            .await
            .unwrap_or_else(|_| WsConnectionStats::disconnected())
    }
}

struct Driver<T: WsTransport> {
    transport: T,
    emitter: Arc<WsEventEmitter>,
    config: WsManagerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    url: Option<String>,
    state: ConnectionState,
    conn: Option<Connection>,
    retry: Option<Pin<Box<Sleep>>>,
    attempt: u64,
    stats: StatsTracker,
}

impl<T: WsTransport> Driver<T> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect(url)) => self.handle_connect(url),
                    Some(Command::Disconnect) => self.handle_disconnect(),
                    Some(Command::GetStats(reply)) => {
                        let _ = reply.send(self.stats_snapshot());
                    }
                    // All manager handles dropped.
                    None => break,
                },
                event = next_conn_event(&mut self.conn) => match event {
                    Some(event) => self.handle_conn_event(event),
                    None => self.handle_closed(false, "connection task ended".to_string()),
                },
                () = tick_retry(&mut self.retry) => self.handle_retry(),
            }
        }
        self.teardown();
        debug!("websocket manager stopped");
    }

    fn handle_connect(&mut self, url: String) {
        info!(url = %url, "websocket connect requested");
        self.url = Some(url.clone());
        self.teardown();
        self.start_attempt(url);
    }

    fn handle_disconnect(&mut self) {
        info!("websocket disconnect requested");
        self.teardown();
        self.set_state(ConnectionState::Disconnected);
    }

    fn handle_conn_event(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Opened => self.handle_opened(),
            ConnEvent::Frame(frame) => self.handle_frame(frame),
            ConnEvent::Closed { clean, detail } => self.handle_closed(clean, detail),
        }
    }

    fn handle_opened(&mut self) {
        if self.state != ConnectionState::Connecting {
            // Only the current connection can deliver events, so this means
            // the transport fired open twice.
            warn!(state = %self.state, "transport opened in unexpected state");
            return;
        }
        self.stats.connects += 1;
        self.stats.connected_at = Some(Instant::now());
        info!(attempt = self.attempt, "websocket connection established");
        self.set_state(ConnectionState::Connected);
    }

    fn handle_frame(&mut self, frame: WsFrame) {
        match frame {
            WsFrame::Text(payload) => match decode_server_message(&payload) {
                Ok(message) => {
                    self.stats.messages += 1;
                    self.stats.last_message_at = Some(Instant::now());
                    debug!(message = ?message, "notification received");
                    self.emitter
                        .emit(WsEventKey::Message, &WsEvent::Message(message));
                    self.emitter
                        .emit(WsEventKey::MessageKind(message), &WsEvent::Message(message));
                }
                Err(err) => {
                    error!(
                        error = %err,
                        payload = %String::from_utf8_lossy(&payload),
                        "received a non-json websocket message",
                    );
                }
            },
            WsFrame::Binary(payload) => {
                error!(len = payload.len(), "received non-text data from websocket");
            }
            // The connection task filters ping/pong and reports close as its
            // own event; anything else reaching here is a transport bug.
            other => {
                warn!(frame = ?other, "unexpected control frame from transport");
            }
        }
    }

    fn handle_closed(&mut self, clean: bool, detail: String) {
        self.conn = None;
        self.stats.connected_at = None;
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Waiting => {
                error!(
                    state = %self.state,
                    reason = %detail,
                    "there shouldn't be any open websocket to close",
                );
            }
            ConnectionState::Connecting => {
                info!(
                    reason = %detail,
                    retry_in_secs = self.config.retry_delay.as_secs(),
                    "failed to connect; retry scheduled",
                );
                self.retry = Some(Box::pin(sleep(self.config.retry_delay)));
                self.set_state(ConnectionState::Waiting);
            }
            ConnectionState::Connected => {
                if clean {
                    info!(reason = %detail, "websocket closed cleanly");
                } else {
                    info!(reason = %detail, "websocket lost connection");
                }
                self.reconnect_now();
            }
        }
    }

    fn handle_retry(&mut self) {
        self.retry = None;
        debug!("retry timer fired");
        match self.url.clone() {
            Some(url) => self.start_attempt(url),
            None => error!("retry timer fired with no target url"),
        }
    }

    fn reconnect_now(&mut self) {
        match self.url.clone() {
            Some(url) => {
                self.teardown();
                self.start_attempt(url);
            }
            None => error!("connection dropped with no target url"),
        }
    }

    fn start_attempt(&mut self, url: String) {
        self.attempt += 1;
        debug!(url = %url, attempt = self.attempt, "opening websocket transport");

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (detach_tx, detach_rx) = watch::channel(false);
        tokio::spawn(run_connection(
            self.transport.clone(),
            url,
            events_tx,
            detach_rx,
        ));

        // The connection reference is replaced before the state event fires.
        self.conn = Some(Connection {
            events: events_rx,
            detach: detach_tx,
        });
        self.set_state(ConnectionState::Connecting);
    }

    /// Discard the live connection and pending retry, timer first so a stale
    /// retry can never race the new cycle. Dropping the event receiver is
    /// what detaches a slow-closing old transport: even if it has not yet
    /// observed the detach flag, nothing it sends can be delivered.
    fn teardown(&mut self) {
        self.retry = None;
        self.stats.connected_at = None;
        if let Some(conn) = self.conn.take() {
            let _ = conn.detach.send(true);
        }
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        let prev = self.state;
        self.state = next;
        debug!(prev = %prev, next = %next, "connection state changed");
        self.emitter.emit(WsEventKey::State, &WsEvent::State(next));
        self.emitter
            .emit(WsEventKey::StateKind(next), &WsEvent::State(next));
    }

    fn stats_snapshot(&self) -> WsConnectionStats {
        let now = Instant::now();
        WsConnectionStats {
            state: self.state,
            uptime: self.stats.connected_at.map(|at| now.duration_since(at)),
            messages: self.stats.messages,
            reconnects: self.stats.connects.saturating_sub(1),
            last_message_age: self.stats.last_message_at.map(|at| now.duration_since(at)),
        }
    }
}

async fn next_conn_event(conn: &mut Option<Connection>) -> Option<ConnEvent> {
    match conn {
        Some(conn) => conn.events.recv().await,
        None => std::future::pending().await,
    }
}

async fn tick_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}

/// One connection attempt: resolve the handshake, report `Opened`, pump
/// frames, report `Closed` exactly once unless detached first.
///
/// Detach semantics mirror the teardown rule: detached mid-handshake, the
/// task never aborts the handshake but arms it to self-close on completion;
/// detached while open, it runs the clean close handshake. A detached task
/// reports nothing.
async fn run_connection<T: WsTransport>(
    transport: T,
    url: String,
    events: mpsc::UnboundedSender<ConnEvent>,
    mut detach: watch::Receiver<bool>,
) {
    let mut connect_fut = transport.connect(url);

    let connected = tokio::select! {
        result = &mut connect_fut => result,
        () = detached(&mut detach) => {
            if let Ok((_reader, mut writer)) = connect_fut.await {
                close_quietly(&mut writer).await;
            }
            return;
        }
    };

    let (mut reader, mut writer) = match connected {
        Ok(pair) => pair,
        Err(err) => {
            let _ = events.send(ConnEvent::Closed {
                clean: false,
                detail: err.to_string(),
            });
            return;
        }
    };

    if events.send(ConnEvent::Opened).is_err() {
        // Detached between handshake completion and delivery.
        close_quietly(&mut writer).await;
        return;
    }

    loop {
        tokio::select! {
            () = detached(&mut detach) => {
                close_quietly(&mut writer).await;
                return;
            }
            frame = reader.next() => match frame {
                Some(Ok(WsFrame::Close(frame))) => {
                    let detail = frame.map_or_else(
                        || "close frame".to_string(),
                        |frame| format!("close frame code={}", frame.code),
                    );
                    // Complete the closing handshake before reporting.
                    close_quietly(&mut writer).await;
                    let _ = events.send(ConnEvent::Closed { clean: true, detail });
                    return;
                }
                Some(Ok(WsFrame::Ping(_) | WsFrame::Pong(_))) => {
                    // Keep-alive; the transport answers pings on its own.
                }
                Some(Ok(frame)) => {
                    if events.send(ConnEvent::Frame(frame)).is_err() {
                        close_quietly(&mut writer).await;
                        return;
                    }
                }
                Some(Err(err)) => {
                    let _ = events.send(ConnEvent::Closed {
                        clean: false,
                        detail: err.to_string(),
                    });
                    return;
                }
                None => {
                    let _ = events.send(ConnEvent::Closed {
                        clean: false,
                        detail: "stream ended without close frame".to_string(),
                    });
                    return;
                }
            }
        }
    }
}

/// Resolves once the driver flips the detach flag or drops its half.
async fn detached(detach: &mut watch::Receiver<bool>) {
    let _ = detach.wait_for(|flag| *flag).await;
}

async fn close_quietly<W>(writer: &mut W)
where
    W: Sink<WsFrame, Error = WebSocketError> + Unpin,
{
    let _ = writer.send(WsFrame::Close(None)).await;
    let _ = writer.close().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_known_kind() {
        assert_eq!(
            decode_server_message(br#""RecipesChanged""#).ok(),
            Some(ServerMessage::RecipesChanged)
        );
        assert_eq!(
            decode_server_message(br#""TagsChanged""#).ok(),
            Some(ServerMessage::TagsChanged)
        );
        assert_eq!(
            decode_server_message(br#""IngredientsChanged""#).ok(),
            Some(ServerMessage::IngredientsChanged)
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(decode_server_message(br#""RecipesDeleted""#).is_err());
    }

    #[test]
    fn rejects_invalid_json() {
        assert!(decode_server_message(b"not json").is_err());
        assert!(decode_server_message(b"").is_err());
        assert!(decode_server_message(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn rejects_non_string_json() {
        assert!(decode_server_message(b"42").is_err());
        assert!(decode_server_message(br#"{"kind":"RecipesChanged"}"#).is_err());
    }
}

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result alias for websocket operations.
pub type WebSocketResult<T> = Result<T, WebSocketError>;

/// Canonical websocket error surface shared across the crate.
///
/// None of these escape the manager's public operations; they travel between
/// the transport layer and the connection driver, which absorbs them into
/// state transitions and log lines.
#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),
}

/// Server-to-client notification kinds, mirroring the backend's `WsServerMsg`.
///
/// The wire encoding is the serde unit-variant form: each frame carries a
/// JSON string literal such as `"RecipesChanged"`. The set is closed; an
/// unknown kind on the wire is a decode failure, not a new variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerMessage {
    RecipesChanged,
    TagsChanged,
    IngredientsChanged,
}

/// Connection lifecycle states driven by the manager.
///
/// `Waiting` means a connection attempt failed and the retry timer is armed;
/// `Disconnected` is only ever entered by an explicit `disconnect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Waiting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Waiting => "waiting",
        })
    }
}

/// Fixed key space for manager events.
///
/// `Message` and `State` are the generic keys; the parameterized variants
/// narrow a subscription to one notification kind or one lifecycle state.
/// Every decoded frame is published under `Message` and under its
/// `MessageKind`; every state change is published under `State` and under
/// its `StateKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WsEventKey {
    Message,
    MessageKind(ServerMessage),
    State,
    StateKind(ConnectionState),
}

/// Payload delivered to manager event listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WsEvent {
    Message(ServerMessage),
    State(ConnectionState),
}

/// Tunable manager behavior.
#[derive(Clone, Copy, Debug)]
pub struct WsManagerConfig {
    /// Delay between a connection attempt failing and the next retry.
    /// Drops of an established connection reconnect immediately regardless.
    pub retry_delay: Duration,
}

impl Default for WsManagerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(10),
        }
    }
}

/// Transport-independent buffer sizing parameters used for websocket
/// configuration.
///
/// Notification frames are tiny (a bare JSON string literal), so the
/// defaults are far below what a data-plane socket would want. The write
/// side only ever carries close frames.
#[derive(Clone, Copy, Debug)]
pub struct WebSocketBufferConfig {
    pub write_buffer_bytes: usize,
    pub max_write_buffer_bytes: usize,
    pub max_message_bytes: usize,
    pub max_frame_bytes: usize,
}

impl Default for WebSocketBufferConfig {
    fn default() -> Self {
        Self {
            write_buffer_bytes: 4 << 10,
            max_write_buffer_bytes: 64 << 10,
            max_message_bytes: 1 << 20,
            max_frame_bytes: 1 << 20,
        }
    }
}

/// Basic connection statistics snapshot, answered by the driver on request.
#[derive(Clone, Debug)]
pub struct WsConnectionStats {
    pub state: ConnectionState,
    /// Time since the current connection opened; `None` unless connected.
    pub uptime: Option<Duration>,
    /// Decoded notifications over the manager's lifetime.
    pub messages: u64,
    /// Connections established after the first one.
    pub reconnects: u64,
    /// Age of the most recently decoded notification.
    pub last_message_age: Option<Duration>,
}

impl WsConnectionStats {
    /// Snapshot for a manager whose driver has already stopped.
    pub fn disconnected() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            uptime: None,
            messages: 0,
            reconnects: 0,
            last_message_age: None,
        }
    }
}

//! Self-healing websocket client for the recipe backend's notification feed.
//!
//! [`WebSocketManager`] keeps a single connection to the server's websocket
//! endpoint alive, reconnecting forever on a fixed delay, and fans decoded
//! change notifications and connection state transitions out to registered
//! listeners through a typed [`EventEmitter`].

pub mod client;
pub mod core;
pub mod emitter;
pub mod manager;
pub mod testing;
pub mod transport;

pub use crate::core::{
    ConnectionState, ServerMessage, WebSocketError, WebSocketResult, WsConnectionStats, WsEvent,
    WsEventKey, WsManagerConfig,
};
pub use emitter::{EventEmitter, ListenerHandle};
pub use manager::{WebSocketManager, WsEventEmitter, WsListenerHandle};

use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{WebSocketError, WebSocketResult, WsFrame};

pub mod tungstenite;

pub use tungstenite::TungsteniteTransport;

/// Boxed handshake future produced by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = WebSocketResult<(R, W)>> + Send>>;

/// Transport boundary for websocket IO.
///
/// The manager is written entirely against this trait so the production
/// tokio-tungstenite transport and the in-memory mock used by tests can be
/// swapped without touching the state machine. A transport is a connection
/// factory: every `connect` call produces one fresh reader/writer pair, and
/// the handshake is not considered complete until the returned future
/// resolves.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = WebSocketResult<WsFrame>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = WebSocketError> + Send + Unpin + 'static;

    fn connect(&self, url: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}

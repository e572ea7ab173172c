//! Plain websocket peer used by tests to stand in for the backend.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, accept_async as tungstenite_accept};

use crate::core::{WebSocketError, WsFrame};
use crate::transport::tungstenite::{frame_to_msg, map_ws_error, msg_to_frame};

/// Thin wrapper around a websocket stream that hides tungstenite types.
pub struct WsClient {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Send one frame.
    pub async fn send(&mut self, frame: WsFrame) -> Result<(), WebSocketError> {
        self.inner
            .send(frame_to_msg(frame))
            .await
            .map_err(|err| map_ws_error("write", err))
    }

    /// Next inbound frame; `None` once the peer is gone.
    pub async fn next(&mut self) -> Option<Result<WsFrame, WebSocketError>> {
        self.inner
            .next()
            .await
            .map(|res| res.map(msg_to_frame).map_err(|err| map_ws_error("read", err)))
    }

    /// Run the closing handshake from this side.
    pub async fn close(&mut self) -> Result<(), WebSocketError> {
        self.inner
            .close(None)
            .await
            .map_err(|err| map_ws_error("close", err))
    }
}

/// Accept an incoming websocket connection.
pub async fn accept_async(stream: TcpStream) -> Result<WsClient, WebSocketError> {
    let ws = tungstenite_accept(MaybeTlsStream::Plain(stream))
        .await
        .map_err(|err| WebSocketError::ConnectionFailed(err.to_string()))?;
    Ok(WsClient { inner: ws })
}

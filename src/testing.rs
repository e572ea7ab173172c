//! In-memory transport for exercising the manager without a real socket.
//!
//! [`MockTransport::channel_pair`] returns the transport plus a [`MockServer`]
//! handle. Every connection attempt the manager makes surfaces on the server
//! handle as a [`MockConnection`] whose handshake stays pending until the test
//! resolves it; the test then plays the server side frame by frame, including
//! refusing the handshake or dropping the socket mid-session.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::Sink;
use tokio::sync::{mpsc, oneshot};

use crate::core::{WebSocketError, WsFrame};
use crate::transport::{WsTransport, WsTransportConnectFuture};

/// A transport that uses in-memory channels so tests can emulate server
/// behavior, one [`MockConnection`] per connection attempt.
#[derive(Clone)]
pub struct MockTransport {
    connects_tx: mpsc::UnboundedSender<MockConnection>,
}

impl MockTransport {
    /// Build a transport + server control pair.
    pub fn channel_pair() -> (Self, MockServer) {
        let (connects_tx, connects_rx) = mpsc::unbounded_channel();
        (Self { connects_tx }, MockServer { connects_rx })
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(&self, url: String) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let connects_tx = self.connects_tx.clone();
        Box::pin(async move {
            let (accept_tx, accept_rx) = oneshot::channel();
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
            let conn = MockConnection {
                url,
                accept: Some(accept_tx),
                inbound_tx: Some(inbound_tx),
                outbound_rx,
            };
            if connects_tx.send(conn).is_err() {
                return Err(WebSocketError::ConnectionFailed(
                    "mock server dropped".to_string(),
                ));
            }
            match accept_rx.await {
                Ok(Ok(())) => Ok((
                    MockReader { rx: inbound_rx },
                    MockWriter { tx: outbound_tx },
                )),
                Ok(Err(err)) => Err(err),
                // Connection handle dropped without a verdict.
                Err(_) => Err(WebSocketError::ConnectionFailed(
                    "mock connection refused".to_string(),
                )),
            }
        })
    }
}

/// Error surface for operations on [`MockConnection`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    /// The inbound socket side was intentionally dropped.
    SocketDropped,
    /// The manager side is no longer receiving inbound frames.
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock manager channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    connects_rx: mpsc::UnboundedReceiver<MockConnection>,
}

impl MockServer {
    /// Wait for the manager's next connection attempt.
    pub async fn next_connect(&mut self) -> Option<MockConnection> {
        self.connects_rx.recv().await
    }

    /// Wait for the next connection attempt with a timeout.
    pub async fn next_connect_timeout(&mut self, timeout: Duration) -> Option<MockConnection> {
        tokio::time::timeout(timeout, self.connects_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Connection attempt that has already arrived, if any. Used to assert
    /// that no attempt happened.
    pub fn try_next_connect(&mut self) -> Option<MockConnection> {
        self.connects_rx.try_recv().ok()
    }
}

/// One connection attempt under test control.
///
/// The handshake resolves only when the test calls [`complete`] or [`fail`];
/// until then the manager sits in its connecting state.
///
/// [`complete`]: MockConnection::complete
/// [`fail`]: MockConnection::fail
pub struct MockConnection {
    url: String,
    accept: Option<oneshot::Sender<Result<(), WebSocketError>>>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl MockConnection {
    /// Url the manager dialed for this attempt.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve the handshake successfully.
    pub fn complete(&mut self) {
        if let Some(accept) = self.accept.take() {
            let _ = accept.send(Ok(()));
        }
    }

    /// Resolve the handshake with a connection error.
    pub fn fail(&mut self, reason: &str) {
        if let Some(accept) = self.accept.take() {
            let _ = accept.send(Err(WebSocketError::ConnectionFailed(reason.to_string())));
        }
    }

    /// Push an inbound frame to the manager.
    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    /// Push a UTF-8 payload as websocket text.
    pub fn send_text(&self, text: impl AsRef<str>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::Text(Bytes::copy_from_slice(
            text.as_ref().as_bytes(),
        )))
    }

    /// Send a server-initiated close frame, leaving the socket open for the
    /// manager's side of the closing handshake.
    pub fn close_clean(&self, code: u16) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::close(code, Bytes::new()))
    }

    /// Simulate an abrupt server-side socket drop by closing the inbound
    /// channel without a close frame.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }

    /// Receive a frame written by the manager.
    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    /// Receive a frame with a timeout.
    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Wait until the manager writes a close frame to this connection,
    /// skipping any other outbound frames. Returns false on timeout or if
    /// the writer is dropped without one.
    pub async fn closed_by_manager(&mut self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.recv_outbound_timeout(remaining).await {
                Some(WsFrame::Close(_)) => return true,
                Some(_) => {}
                None => return false,
            }
        }
    }
}

/// Reader side for [`MockTransport`].
pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, WebSocketError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.rx).poll_recv(cx) {
            Poll::Ready(Some(frame)) => Poll::Ready(Some(Ok(frame))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Writer side for [`MockTransport`].
pub struct MockWriter {
    tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WebSocketError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .tx
            .send(item)
            .map_err(|_| WebSocketError::TransportError {
                context: "mock_transport_write",
                error: "mock outbound channel closed".to_string(),
            })
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

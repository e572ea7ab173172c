use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native frame representation into `WsFrame` before
/// handing it to the connection driver. The manager itself only ever sends
/// close frames; everything else is inbound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WsFrame {
    Text(Bytes),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<WsCloseFrame>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsCloseFrame {
    pub code: u16,
    pub reason: Bytes,
}

impl WsFrame {
    #[inline]
    pub fn text_static(s: &'static str) -> Self {
        // &'static str is valid UTF-8 by construction.
        Self::Text(Bytes::from_static(s.as_bytes()))
    }

    #[inline]
    pub fn binary_static(b: &'static [u8]) -> Self {
        Self::Binary(Bytes::from_static(b))
    }

    #[inline]
    pub fn close(code: u16, reason: Bytes) -> Self {
        Self::Close(Some(WsCloseFrame { code, reason }))
    }
}

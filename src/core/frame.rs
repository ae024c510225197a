use bytes::Bytes;

/// Transport-neutral websocket frame.
///
/// Transports convert their native message representation into/from `WsFrame`, so the pubsub
/// layer never sees tungstenite types.
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
    /// Text frame from an owned string; UTF-8 by construction.
    #[inline]
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(Bytes::from(s.into()))
    }

    #[inline]
    pub fn close(code: u16, reason: impl Into<Bytes>) -> Self {
        Self::Close(Some(WsCloseFrame {
            code,
            reason: reason.into(),
        }))
    }

    /// Payload of a data frame (text or binary); control frames return `None`.
    #[inline]
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            WsFrame::Text(bytes) | WsFrame::Binary(bytes) => Some(bytes.as_ref()),
            WsFrame::Ping(_) | WsFrame::Pong(_) | WsFrame::Close(_) => None,
        }
    }
}

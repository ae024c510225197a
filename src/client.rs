//! Standalone websocket endpoint wrapper that keeps tungstenite types out of callers' hands.
//!
//! The pubsub client goes through [`crate::transport::WsTransport`]; this wrapper is for the other
//! side of the socket (local RPC stand-ins in tests, tooling).

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, accept_async as tungstenite_accept,
    connect_async_tls_with_config as tungstenite_connect_tls, tungstenite::protocol::WebSocketConfig,
};

use crate::core::{WatchError, WsFrame};
use crate::tls::install_rustls_crypto_provider;
use crate::transport::WsConnectConfig;
use crate::transport::tungstenite::{TungsteniteStream, frame_to_msg, map_ws_error, msg_to_frame};

pub struct WsClient {
    inner: TungsteniteStream,
}

impl WsClient {
    pub async fn send(&mut self, frame: WsFrame) -> Result<(), WatchError> {
        self.inner
            .send(frame_to_msg(frame))
            .await
            .map_err(|e| map_ws_error("write", e))
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), WatchError> {
        self.send(WsFrame::text(text)).await
    }

    /// Next data frame payload as UTF-8 text, skipping control frames. `None` on close or EOF.
    pub async fn next_text(&mut self) -> Option<Result<String, WatchError>> {
        loop {
            match self.next().await? {
                Ok(WsFrame::Close(_)) => return None,
                Ok(frame) => {
                    if let Some(data) = frame.data() {
                        return Some(
                            String::from_utf8(data.to_vec())
                                .map_err(|e| WatchError::ParseFailed(e.to_string())),
                        );
                    }
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }

    pub async fn close(&mut self) -> Result<(), WatchError> {
        self.inner
            .close(None)
            .await
            .map_err(|e| map_ws_error("close", e))
    }
}

impl Stream for WsClient {
    type Item = Result<WsFrame, WatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx).map(|next| {
            next.map(|res| res.map(msg_to_frame).map_err(|e| map_ws_error("read", e)))
        })
    }
}

impl Sink<WsFrame> for WsClient {
    type Error = WatchError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready_unpin(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.inner
            .start_send_unpin(frame_to_msg(item))
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_flush_unpin(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_close_unpin(cx)
            .map_err(|e| map_ws_error("close", e))
    }
}

/// Connect to a websocket URL.
pub async fn connect_async(
    url: impl AsRef<str>,
    config: WsConnectConfig,
) -> Result<WsClient, WatchError> {
    install_rustls_crypto_provider();
    let (stream, _) = tungstenite_connect_tls(
        url.as_ref(),
        Some(WebSocketConfig::from(config)),
        config.disable_nagle,
        None,
    )
    .await
    .map_err(|err| WatchError::ConnectionFailed(err.to_string()))?;
    Ok(WsClient { inner: stream })
}

/// Accept an incoming websocket connection.
pub async fn accept_async(stream: TcpStream) -> Result<WsClient, WatchError> {
    let ws = tungstenite_accept(MaybeTlsStream::Plain(stream))
        .await
        .map_err(|err| WatchError::ConnectionFailed(err.to_string()))?;
    Ok(WsClient { inner: ws })
}

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{Sink, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream,
    connect_async_tls_with_config as tungstenite_connect_tls,
    tungstenite::{
        Message as TungsteniteMessage, Utf8Bytes,
        protocol::{CloseFrame as TungCloseFrame, WebSocketConfig},
    },
};
use tracing::debug;

use super::{WsConnectConfig, WsTransport, WsTransportConnectFuture};
use crate::core::{WatchError, WsCloseFrame, WsFrame};
use crate::tls::install_rustls_crypto_provider;

pub(crate) type TungsteniteStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) fn map_ws_error(context: &'static str, err: impl ToString) -> WatchError {
    WatchError::TransportError {
        context,
        error: err.to_string(),
    }
}

fn close_to_core(frame: Option<TungCloseFrame>) -> Option<WsCloseFrame> {
    frame.map(|f| WsCloseFrame {
        code: u16::from(f.code),
        reason: AsRef::<Bytes>::as_ref(&f.reason).clone(),
    })
}

fn core_to_close(frame: WsCloseFrame) -> TungCloseFrame {
    TungCloseFrame {
        code: frame.code.into(),
        reason: Utf8Bytes::try_from(frame.reason).unwrap_or_else(|_| Utf8Bytes::from_static("")),
    }
}

pub(crate) fn msg_to_frame(msg: TungsteniteMessage) -> WsFrame {
    match msg {
        TungsteniteMessage::Text(text) => WsFrame::Text(AsRef::<Bytes>::as_ref(&text).clone()),
        TungsteniteMessage::Binary(bytes) => WsFrame::Binary(bytes),
        TungsteniteMessage::Ping(bytes) => WsFrame::Ping(bytes),
        TungsteniteMessage::Pong(bytes) => WsFrame::Pong(bytes),
        TungsteniteMessage::Close(frame) => WsFrame::Close(close_to_core(frame)),
        TungsteniteMessage::Frame(_) => WsFrame::Binary(Bytes::new()),
    }
}

pub(crate) fn frame_to_msg(frame: WsFrame) -> TungsteniteMessage {
    match frame {
        // Invalid UTF-8 in a text frame goes out as binary rather than being rejected.
        WsFrame::Text(bytes) => match Utf8Bytes::try_from(bytes.clone()) {
            Ok(text) => TungsteniteMessage::Text(text),
            Err(_) => TungsteniteMessage::Binary(bytes),
        },
        WsFrame::Binary(bytes) => TungsteniteMessage::Binary(bytes),
        WsFrame::Ping(bytes) => TungsteniteMessage::Ping(bytes),
        WsFrame::Pong(bytes) => TungsteniteMessage::Pong(bytes),
        WsFrame::Close(frame) => TungsteniteMessage::Close(frame.map(core_to_close)),
    }
}

impl From<WsConnectConfig> for WebSocketConfig {
    fn from(cfg: WsConnectConfig) -> Self {
        WebSocketConfig::default()
            .max_message_size(cfg.max_message_size)
            .max_frame_size(cfg.max_frame_size)
            .write_buffer_size(cfg.write_buffer_size)
            .max_write_buffer_size(cfg.max_write_buffer_size)
    }
}

/// tokio-tungstenite transport; `wss://` urls use rustls with webpki roots unless a connector is
/// supplied.
#[derive(Clone, Default)]
pub struct TungsteniteTransport {
    connector: Option<Connector>,
}

impl TungsteniteTransport {
    pub fn with_connector(connector: Connector) -> Self {
        Self {
            connector: Some(connector),
        }
    }

    pub fn rustls(config: Arc<rustls::ClientConfig>) -> Self {
        Self::with_connector(Connector::Rustls(config))
    }
}

pub struct TungsteniteReader {
    inner: futures_util::stream::SplitStream<TungsteniteStream>,
}

impl Stream for TungsteniteReader {
    type Item = Result<WsFrame, WatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx).map(|next| {
            next.map(|res| res.map(msg_to_frame).map_err(|e| map_ws_error("read", e)))
        })
    }
}

pub struct TungsteniteWriter {
    inner: futures_util::stream::SplitSink<TungsteniteStream, TungsteniteMessage>,
}

impl Sink<WsFrame> for TungsteniteWriter {
    type Error = WatchError;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_ready(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn start_send(mut self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        Pin::new(&mut self.inner)
            .start_send(frame_to_msg(item))
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_flush(cx)
            .map_err(|e| map_ws_error("write", e))
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Pin::new(&mut self.inner)
            .poll_close(cx)
            .map_err(|e| map_ws_error("close", e))
    }
}

impl WsTransport for TungsteniteTransport {
    type Reader = TungsteniteReader;
    type Writer = TungsteniteWriter;

    fn connect(
        &self,
        url: String,
        config: WsConnectConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let connector = self.connector.clone();
        Box::pin(async move {
            install_rustls_crypto_provider();
            debug!(%url, "opening websocket");

            let (stream, _) = tungstenite_connect_tls(
                url.as_str(),
                Some(WebSocketConfig::from(config)),
                config.disable_nagle,
                connector,
            )
            .await
            .map_err(|e| WatchError::ConnectionFailed(e.to_string()))?;

            let (write, read) = stream.split();
            Ok((
                TungsteniteReader { inner: read },
                TungsteniteWriter { inner: write },
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frames_round_trip_through_tungstenite_messages() {
        let msg = frame_to_msg(WsFrame::text("{\"jsonrpc\":\"2.0\"}"));
        assert!(matches!(msg, TungsteniteMessage::Text(_)));
        assert_eq!(msg_to_frame(msg), WsFrame::text("{\"jsonrpc\":\"2.0\"}"));
    }

    #[test]
    fn invalid_utf8_text_is_sent_as_binary() {
        let msg = frame_to_msg(WsFrame::Text(Bytes::from_static(&[0xff, 0xfe])));
        assert!(matches!(msg, TungsteniteMessage::Binary(_)));
    }

    #[test]
    fn close_frames_keep_code_and_reason() {
        let msg = frame_to_msg(WsFrame::close(1001, "going away"));
        assert_eq!(msg_to_frame(msg), WsFrame::close(1001, "going away"));
    }
}

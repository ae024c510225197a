use std::future::Future;
use std::pin::Pin;

use futures_util::{Sink, Stream};

use crate::core::{WatchError, WsFrame};

pub mod tungstenite;

pub use tungstenite::TungsteniteTransport;

/// Future returned by [`WsTransport::connect`].
pub type WsTransportConnectFuture<R, W> =
    Pin<Box<dyn Future<Output = Result<(R, W), WatchError>> + Send>>;

/// Websocket limits and TLS knobs applied when a pubsub connection is opened.
#[derive(Clone, Copy, Debug)]
pub struct WsConnectConfig {
    pub max_message_size: Option<usize>,
    pub max_frame_size: Option<usize>,
    pub write_buffer_size: usize,
    pub max_write_buffer_size: usize,
    pub disable_nagle: bool,
}

impl Default for WsConnectConfig {
    fn default() -> Self {
        Self {
            max_message_size: Some(16 * 1024 * 1024),
            max_frame_size: Some(16 * 1024 * 1024),
            write_buffer_size: 128 << 10,
            max_write_buffer_size: 256 << 10,
            disable_nagle: true,
        }
    }
}

/// Transport boundary for websocket IO.
///
/// A pubsub connection only needs a frame reader and a frame writer, so tests can swap in an
/// in-memory pair (see `testing::MockTransport`) without touching protocol code.
pub trait WsTransport: Clone + Send + Sync + 'static {
    type Reader: Stream<Item = Result<WsFrame, WatchError>> + Send + Unpin + 'static;
    type Writer: Sink<WsFrame, Error = WatchError> + Send + Unpin + 'static;

    fn connect(
        &self,
        url: String,
        config: WsConnectConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer>;
}

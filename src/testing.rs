//! Reusable test utilities for driving watchers deterministically.
//!
//! - [`MockTransport`]/[`MockServer`]: in-memory websocket pair for exercising [`crate::pubsub`]
//!   without a socket, including server-side drops.
//! - [`ScriptedStrategy`]: resource strategy whose polls and subscription are scripted by the test.
//! - [`Recorder`]: collects delivered updates and errors with (tokio) timestamps.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::Sink;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{Version, VersionedItem, WatchError, WatchResult, WsFrame};
use crate::transport::{WsConnectConfig, WsTransport, WsTransportConnectFuture};
use crate::watch::{
    Emitter, ErrorCallback, ItemStream, PollFuture, ResourceStrategy, SubscribeFuture,
    WatcherOptions,
};

/// A transport that uses in-memory channels so tests can emulate a pubsub server.
///
/// Create it with [`MockTransport::channel_pair`] to obtain the transport and the [`MockServer`]
/// handle used to read outbound requests, push inbound frames or drop the socket.
#[derive(Clone)]
pub struct MockTransport {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
    inbound_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<WsFrame>>>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn channel_pair() -> (Self, MockServer) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel::<WsFrame>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<WsFrame>();
        let urls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                sent_tx,
                inbound_rx: Arc::new(Mutex::new(Some(inbound_rx))),
                urls: urls.clone(),
            },
            MockServer {
                outbound_rx: sent_rx,
                inbound_tx: Some(inbound_tx),
                urls,
            },
        )
    }
}

impl WsTransport for MockTransport {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn connect(
        &self,
        url: String,
        _config: WsConnectConfig,
    ) -> WsTransportConnectFuture<Self::Reader, Self::Writer> {
        let sent_tx = self.sent_tx.clone();
        let inbound_rx = self.inbound_rx.lock().take();
        self.urls.lock().push(url);
        Box::pin(async move {
            let rx = inbound_rx.ok_or_else(|| {
                WatchError::ConnectionFailed(
                    "mock transport only supports a single connection".to_string(),
                )
            })?;
            Ok((MockReader { rx }, MockWriter { sent_tx }))
        })
    }
}

/// Error surface for operations on [`MockServer`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MockServerError {
    SocketDropped,
    ChannelClosed,
}

impl std::fmt::Display for MockServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MockServerError::SocketDropped => f.write_str("mock socket already dropped"),
            MockServerError::ChannelClosed => f.write_str("mock client channel is closed"),
        }
    }
}

impl std::error::Error for MockServerError {}

/// Server-side test handle paired with [`MockTransport`].
pub struct MockServer {
    outbound_rx: mpsc::UnboundedReceiver<WsFrame>,
    inbound_tx: Option<mpsc::UnboundedSender<WsFrame>>,
    urls: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    /// Urls the client connected to, in order.
    pub fn connected_urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }

    pub async fn recv_outbound(&mut self) -> Option<WsFrame> {
        self.outbound_rx.recv().await
    }

    pub async fn recv_outbound_timeout(&mut self, timeout: Duration) -> Option<WsFrame> {
        tokio::time::timeout(timeout, self.outbound_rx.recv())
            .await
            .unwrap_or_default()
    }

    /// Next outbound data frame decoded as a JSON-RPC request.
    pub async fn recv_request(&mut self) -> Option<RecordedRequest> {
        loop {
            let frame = self.outbound_rx.recv().await?;
            if let Some(request) = RecordedRequest::from_frame(&frame) {
                return Some(request);
            }
        }
    }

    pub fn send_inbound(&self, frame: WsFrame) -> Result<(), MockServerError> {
        let Some(tx) = self.inbound_tx.as_ref() else {
            return Err(MockServerError::SocketDropped);
        };
        tx.send(frame).map_err(|_| MockServerError::ChannelClosed)
    }

    pub fn send_text(&self, text: impl Into<String>) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::text(text))
    }

    /// Confirm subscription request `id` with subscription number `subscription`.
    pub fn confirm(&self, id: u64, subscription: u64) -> Result<(), MockServerError> {
        self.send_text(format!(
            r#"{{"jsonrpc":"2.0","result":{subscription},"id":{id}}}"#
        ))
    }

    pub fn reject(&self, id: u64, code: i64, message: &str) -> Result<(), MockServerError> {
        self.send_text(format!(
            r#"{{"jsonrpc":"2.0","error":{{"code":{code},"message":"{message}"}},"id":{id}}}"#
        ))
    }

    /// Send a websocket close frame.
    pub fn close(&self) -> Result<(), MockServerError> {
        self.send_inbound(WsFrame::close(1000, "bye"))
    }

    /// Simulate a server-side socket drop by closing the inbound channel.
    pub fn drop_socket(&mut self) {
        self.inbound_tx = None;
    }
}

/// JSON-RPC request observed on the mock socket.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedRequest {
    pub id: u64,
    pub method: String,
    pub params: sonic_rs::Value,
}

impl RecordedRequest {
    pub fn from_frame(frame: &WsFrame) -> Option<Self> {
        sonic_rs::from_slice(frame.data()?).ok()
    }
}

pub struct MockReader {
    rx: mpsc::UnboundedReceiver<WsFrame>,
}

impl futures_util::Stream for MockReader {
    type Item = Result<WsFrame, WatchError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

pub struct MockWriter {
    sent_tx: mpsc::UnboundedSender<WsFrame>,
}

impl Sink<WsFrame> for MockWriter {
    type Error = WatchError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: WsFrame) -> Result<(), Self::Error> {
        self.get_mut()
            .sent_tx
            .send(item)
            .map_err(|_| WatchError::TransportError {
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

/// Outcome of one scripted poll.
#[derive(Debug, Clone)]
pub enum PollStep<T> {
    Emit(VersionedItem<T>),
    Fail(String),
    /// Succeed without emitting.
    Skip,
    /// Emit after `delay`, unless cancelled first.
    Delayed(Duration, VersionedItem<T>),
    /// Block until cancelled.
    Hang,
}

/// How the scripted subscription behaves.
pub enum SubscribeStep<T> {
    /// Never resolves (until cancelled).
    Hang,
    Fail(WatchError),
    /// Resolves after `delay` with a stream fed by the paired [`PushController`].
    Stream {
        delay: Duration,
        rx: mpsc::UnboundedReceiver<WatchResult<VersionedItem<T>>>,
    },
}

/// Test-side handle feeding the scripted push stream.
#[derive(Clone)]
pub struct PushController<T> {
    tx: Arc<Mutex<Option<mpsc::UnboundedSender<WatchResult<VersionedItem<T>>>>>>,
}

impl<T> PushController<T> {
    pub fn push(&self, version: Version, value: Option<T>) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(Ok(VersionedItem { version, value }));
        }
    }

    /// Fail the stream; nothing can be pushed afterwards.
    pub fn fail(&self, error: WatchError) {
        if let Some(tx) = self.tx.lock().take() {
            let _ = tx.send(Err(error));
        }
    }

    /// End the stream gracefully.
    pub fn end(&self) {
        self.tx.lock().take();
    }
}

/// Poll activity observed by a [`ScriptedStrategy`], shared with the test.
#[derive(Clone, Default)]
pub struct PollProbe {
    count: Arc<AtomicUsize>,
    started: Arc<Mutex<Vec<Instant>>>,
}

impl PollProbe {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn started_at(&self) -> Vec<Instant> {
        self.started.lock().clone()
    }
}

type PollScript<T> = Box<dyn Fn(usize) -> PollStep<T> + Send + Sync>;

/// Strategy whose behavior is fully scripted; `Raw` and `Value` are the same type.
pub struct ScriptedStrategy<T> {
    poll_script: PollScript<T>,
    subscribe: Mutex<Option<SubscribeStep<T>>>,
    probe: PollProbe,
    label: String,
}

impl<T: Send + 'static> ScriptedStrategy<T> {
    pub fn new(subscribe: SubscribeStep<T>) -> Self {
        Self {
            poll_script: Box::new(|_| PollStep::Skip),
            subscribe: Mutex::new(Some(subscribe)),
            probe: PollProbe::default(),
            label: "scripted".to_string(),
        }
    }

    /// Strategy plus a controller for its push stream, delivered `delay` after subscribing.
    pub fn streaming(delay: Duration) -> (Self, PushController<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::new(SubscribeStep::Stream { delay, rx }),
            PushController {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
        )
    }

    /// `script(n)` decides the outcome of the n-th poll (0-based, seed included).
    pub fn with_polls(
        mut self,
        script: impl Fn(usize) -> PollStep<T> + Send + Sync + 'static,
    ) -> Self {
        self.poll_script = Box::new(script);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn probe(&self) -> PollProbe {
        self.probe.clone()
    }
}

impl<T: Send + 'static> ResourceStrategy for ScriptedStrategy<T> {
    type Raw = T;
    type Value = T;

    fn label(&self) -> String {
        self.label.clone()
    }

    fn normalize(&self, raw: Option<T>) -> Option<T> {
        raw
    }

    fn poll(&self, emit: Emitter<T>, cancel: CancellationToken) -> PollFuture<'_> {
        let n = self.probe.count.fetch_add(1, Ordering::SeqCst);
        self.probe.started.lock().push(Instant::now());
        let step = (self.poll_script)(n);
        Box::pin(async move {
            match step {
                PollStep::Emit(item) => {
                    emit.emit(item.version, item.value);
                    Ok(())
                }
                PollStep::Fail(message) => Err(WatchError::PollFailed(message)),
                PollStep::Skip => Ok(()),
                PollStep::Delayed(delay, item) => {
                    tokio::select! {
                        _ = cancel.cancelled() => Err(WatchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {
                            emit.emit(item.version, item.value);
                            Ok(())
                        }
                    }
                }
                PollStep::Hang => {
                    cancel.cancelled().await;
                    Err(WatchError::Cancelled)
                }
            }
        })
    }

    fn subscribe(&self, cancel: CancellationToken) -> SubscribeFuture<'_, T> {
        let step = self.subscribe.lock().take();
        Box::pin(async move {
            match step {
                Some(SubscribeStep::Stream { delay, rx }) => {
                    tokio::time::sleep(delay).await;
                    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
                        rx.recv().await.map(|item| (item, rx))
                    });
                    Ok(Box::pin(stream) as ItemStream<T>)
                }
                Some(SubscribeStep::Fail(err)) => Err(err),
                Some(SubscribeStep::Hang) | None => {
                    cancel.cancelled().await;
                    Err(WatchError::Cancelled)
                }
            }
        })
    }
}

/// What a [`Recorder`] saw, in delivery order.
#[derive(Debug, Clone)]
pub enum Recorded<T> {
    Update(VersionedItem<T>),
    Error(WatchError),
}

/// Collects callback invocations for assertions.
pub struct Recorder<T> {
    events: Arc<Mutex<Vec<(Instant, Recorded<T>)>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            events: self.events.clone(),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_update(&self) -> impl FnMut(VersionedItem<T>) + Send + 'static {
        let events = self.events.clone();
        move |item: VersionedItem<T>| events.lock().push((Instant::now(), Recorded::Update(item)))
    }

    pub fn on_error(&self) -> ErrorCallback {
        let events = self.events.clone();
        Box::new(move |err: WatchError| events.lock().push((Instant::now(), Recorded::Error(err))))
    }

    /// Options wired to this recorder, with default timings.
    pub fn options(&self) -> WatcherOptions<T> {
        let mut options = WatcherOptions::new(self.on_update());
        options.on_error = Some(self.on_error());
        options
    }

    pub fn events(&self) -> Vec<Recorded<T>> {
        self.events.lock().iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn updates(&self) -> Vec<VersionedItem<T>> {
        self.timed_updates().into_iter().map(|(_, u)| u).collect()
    }

    pub fn timed_updates(&self) -> Vec<(Instant, VersionedItem<T>)> {
        self.events
            .lock()
            .iter()
            .filter_map(|(at, e)| match e {
                Recorded::Update(item) => Some((*at, item.clone())),
                Recorded::Error(_) => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<WatchError> {
        self.timed_errors().into_iter().map(|(_, e)| e).collect()
    }

    pub fn timed_errors(&self) -> Vec<(Instant, WatchError)> {
        self.events
            .lock()
            .iter()
            .filter_map(|(at, e)| match e {
                Recorded::Error(err) => Some((*at, err.clone())),
                Recorded::Update(_) => None,
            })
            .collect()
    }

    /// Wait until `pred` holds over the recorded events, or `timeout` elapses.
    pub async fn wait_until(
        &self,
        timeout: Duration,
        pred: impl Fn(&[Recorded<T>]) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&self.events()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    pub async fn wait_for_updates(&self, n: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |events| {
            events
                .iter()
                .filter(|e| matches!(e, Recorded::Update(_)))
                .count()
                >= n
        })
        .await
    }
}

//! Ledger pubsub client: one websocket connection per subscription.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::{Commitment, VersionedItem, WatchError, WatchResult, WsFrame};
use crate::resources::{AccountPubsub, LogPubsub, RawAccount, RawLogNotification};
use crate::transport::{TungsteniteTransport, WsConnectConfig, WsTransport};
use crate::watch::{ItemStream, SubscribeFuture};

pub mod wire;

use wire::{Inbound, WireNotification};

/// JSON-RPC pubsub client over a [`WsTransport`].
#[derive(Clone)]
pub struct PubsubClient<T: WsTransport = TungsteniteTransport> {
    url: String,
    transport: T,
    config: WsConnectConfig,
    next_id: Arc<AtomicU64>,
}

impl PubsubClient<TungsteniteTransport> {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_transport(url, TungsteniteTransport::default())
    }
}

impl<T: WsTransport> PubsubClient<T> {
    pub fn with_transport(url: impl Into<String>, transport: T) -> Self {
        Self {
            url: url.into(),
            transport,
            config: WsConnectConfig::default(),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_config(mut self, config: WsConnectConfig) -> Self {
        self.config = config;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Connect, send `request` and wait for its confirmation; the returned stream yields the
    /// notifications of the confirmed subscription.
    async fn open<N: WireNotification>(
        &self,
        method: &'static str,
        request: String,
        request_id: u64,
        cancel: CancellationToken,
    ) -> WatchResult<ItemStream<N::Raw>> {
        let (mut reader, mut writer) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(WatchError::Cancelled),
            res = self.transport.connect(self.url.clone(), self.config) => res?,
        };
        debug!(url = %self.url, method, request_id, "pubsub connected");

        writer
            .send(WsFrame::text(request))
            .await
            .map_err(|e| WatchError::SubscribeFailed(e.to_string()))?;

        let subscription = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(WatchError::Cancelled),
                next = reader.next() => next,
            };
            let frame = match next {
                None | Some(Ok(WsFrame::Close(_))) => {
                    return Err(WatchError::SubscribeFailed(format!(
                        "{method}: connection closed before confirmation"
                    )));
                }
                Some(Err(err)) => return Err(WatchError::SubscribeFailed(err.to_string())),
                Some(Ok(frame)) => frame,
            };
            let Some(data) = frame.data() else {
                continue;
            };
            match wire::parse_inbound::<N>(data)? {
                Inbound::Subscribed { id, subscription } if id == request_id => break subscription,
                Inbound::Rejected { id, code, message } if id.map_or(true, |id| id == request_id) => {
                    warn!(url = %self.url, method, ?code, %message, "subscription rejected");
                    return Err(WatchError::Rpc { code, message });
                }
                _ => continue,
            }
        };
        info!(url = %self.url, method, subscription, "subscription confirmed");

        let session = Session {
            reader,
            writer,
            subscription,
            cancel,
        };
        let stream = futures_util::stream::unfold(Some(session), |session| async move {
            let mut session = session?;
            loop {
                let next = tokio::select! {
                    biased;
                    _ = session.cancel.cancelled() => return None,
                    next = session.reader.next() => next,
                };
                let frame = match next {
                    None | Some(Ok(WsFrame::Close(_))) => {
                        debug!(subscription = session.subscription, "pubsub connection closed");
                        let _ = session.writer.close().await;
                        return None;
                    }
                    Some(Err(err)) => {
                        return Some((Err(WatchError::StreamFailed(err.to_string())), None));
                    }
                    Some(Ok(frame)) => frame,
                };
                let Some(data) = frame.data() else {
                    continue;
                };
                match wire::parse_inbound::<N>(data) {
                    Ok(Inbound::Notification {
                        subscription,
                        slot,
                        value,
                    }) if subscription == session.subscription => {
                        return Some((Ok(VersionedItem::new(slot, value)), Some(session)));
                    }
                    Ok(_) => continue,
                    Err(err) => {
                        return Some((Err(WatchError::StreamFailed(err.to_string())), None));
                    }
                }
            }
        });
        Ok(Box::pin(stream))
    }
}

/// Live subscription; owns the writer so the connection stays open while the stream is polled.
struct Session<R, W> {
    reader: R,
    writer: W,
    subscription: u64,
    cancel: CancellationToken,
}

impl<T: WsTransport> AccountPubsub for PubsubClient<T> {
    fn account_notifications(
        &self,
        address: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> SubscribeFuture<'_, RawAccount> {
        Box::pin(async move {
            let id = self.next_request_id();
            let request = wire::account_subscribe_request(id, &address, commitment)?;
            self.open::<wire::UiAccount>("accountSubscribe", request, id, cancel)
                .await
        })
    }
}

impl<T: WsTransport> LogPubsub for PubsubClient<T> {
    fn logs_notifications(
        &self,
        mentions: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> SubscribeFuture<'_, RawLogNotification> {
        Box::pin(async move {
            let id = self.next_request_id();
            let request = wire::logs_subscribe_request(id, &mentions, commitment)?;
            self.open::<wire::UiLogs>("logsSubscribe", request, id, cancel)
                .await
        })
    }
}

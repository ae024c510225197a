//! Program-log watcher over a `logsSubscribe` "mentions program" subscription.
//!
//! Logs have no snapshot query, so polling never emits; once the push stream ends the watcher
//! stays in polling mode without producing updates.

use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::{
    CircularBuffer, Commitment, Version, VersionedItem, WatchError, WatchResult, WatchTimings,
    WatcherState, WatcherStats,
};
use crate::watch::{
    Emitter, ErrorCallback, PollFuture, ResourceStrategy, SubscribeFuture, WatcherHandle,
    WatcherOptions, create_watcher,
};

/// Which transactions' logs are delivered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFilter {
    #[default]
    All,
    Success,
    Error,
}

impl LogFilter {
    pub fn matches(self, err: Option<&str>) -> bool {
        match self {
            LogFilter::All => true,
            LogFilter::Success => err.is_none(),
            LogFilter::Error => err.is_some(),
        }
    }
}

/// Log notification as carried by the push transport. `err` is the transaction error rendered as
/// JSON text, `None` for successful transactions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawLogNotification {
    pub slot: Version,
    pub signature: String,
    pub err: Option<String>,
    pub logs: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramLog {
    pub signature: String,
    pub err: Option<String>,
    pub logs: Vec<String>,
    pub slot: Version,
}

impl ProgramLog {
    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}

impl From<RawLogNotification> for ProgramLog {
    fn from(raw: RawLogNotification) -> Self {
        Self {
            signature: raw.signature,
            err: raw.err,
            logs: raw.logs,
            slot: raw.slot,
        }
    }
}

/// Push subscription collaborator for logs mentioning `mentions`.
pub trait LogPubsub: Send + Sync + 'static {
    fn logs_notifications(
        &self,
        mentions: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> SubscribeFuture<'_, RawLogNotification>;
}

impl<T: LogPubsub> LogPubsub for Arc<T> {
    fn logs_notifications(
        &self,
        mentions: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> SubscribeFuture<'_, RawLogNotification> {
        (**self).logs_notifications(mentions, commitment, cancel)
    }
}

pub struct ProgramLogStrategy<P> {
    pubsub: P,
    program: String,
    commitment: Commitment,
    filter: LogFilter,
}

impl<P: LogPubsub> ProgramLogStrategy<P> {
    pub fn new(
        pubsub: P,
        program: impl Into<String>,
        commitment: Commitment,
        filter: LogFilter,
    ) -> Self {
        Self {
            pubsub,
            program: program.into(),
            commitment,
            filter,
        }
    }
}

impl<P: LogPubsub> ResourceStrategy for ProgramLogStrategy<P> {
    type Raw = RawLogNotification;
    type Value = ProgramLog;

    fn label(&self) -> String {
        format!("logs:{}", self.program)
    }

    fn normalize(&self, raw: Option<RawLogNotification>) -> Option<ProgramLog> {
        raw.map(ProgramLog::from)
    }

    fn poll(&self, _emit: Emitter<ProgramLog>, _cancel: CancellationToken) -> PollFuture<'_> {
        Box::pin(async { Ok(()) })
    }

    /// Filters client-side and re-versions the matching notifications with a receipt sequence
    /// starting at 1, since one slot carries many transactions.
    fn subscribe(&self, cancel: CancellationToken) -> SubscribeFuture<'_, RawLogNotification> {
        let filter = self.filter;
        let label = self.label();
        Box::pin(async move {
            let stream = self
                .pubsub
                .logs_notifications(self.program.clone(), self.commitment, cancel)
                .await?;

            let mut receipt: Version = 0;
            let filtered = stream.filter_map(move |item| {
                let out = match item {
                    Ok(VersionedItem {
                        value: Some(raw), ..
                    }) => {
                        if filter.matches(raw.err.as_deref()) {
                            receipt += 1;
                            Some(Ok(VersionedItem::present(receipt, raw)))
                        } else {
                            debug!(resource = %label, signature = %raw.signature, "log filtered out");
                            None
                        }
                    }
                    Ok(VersionedItem { value: None, .. }) => None,
                    Err(err) => Some(Err(err)),
                };
                futures_util::future::ready(out)
            });
            Ok(Box::pin(filtered) as crate::watch::ItemStream<RawLogNotification>)
        })
    }
}

/// Bounded retention of the most recent logs with live fan-out to in-process subscribers.
#[derive(Clone)]
pub struct LogBuffer {
    ring: Arc<Mutex<CircularBuffer<ProgramLog>>>,
    tx: broadcast::Sender<ProgramLog>,
}

impl LogBuffer {
    pub const DEFAULT_MAX_ITEMS: usize = 1000;
    /// Upper bound accepted by [`watch_program_logs`].
    pub const MAX_ITEMS_LIMIT: usize = 1 << 20;
    /// Live fan-out lag bound; independent of the retention bound.
    pub const BROADCAST_CAPACITY: usize = 1024;

    pub fn new(max_items: usize) -> Self {
        let (tx, _) = broadcast::channel(Self::BROADCAST_CAPACITY);
        Self {
            ring: Arc::new(Mutex::new(CircularBuffer::new(max_items))),
            tx,
        }
    }

    pub fn push(&self, log: ProgramLog) {
        let mut ring = self.ring.lock();
        ring.push(log.clone());
        // No receivers is fine.
        let _ = self.tx.send(log);
    }

    /// Retained logs, oldest first.
    pub fn recent(&self) -> Vec<ProgramLog> {
        self.ring.lock().to_vec()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().capacity()
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }

    /// Backlog plus a live receiver, taken atomically: every log is in exactly one of the two.
    pub fn subscribe(&self) -> (Vec<ProgramLog>, broadcast::Receiver<ProgramLog>) {
        let ring = self.ring.lock();
        (ring.to_vec(), self.tx.subscribe())
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ITEMS)
    }
}

impl std::fmt::Debug for LogBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.ring.lock();
        f.debug_struct("LogBuffer")
            .field("len", &ring.len())
            .field("capacity", &ring.capacity())
            .finish()
    }
}

/// Arguments for [`watch_program_logs`].
#[derive(Clone, Debug)]
pub struct ProgramLogWatchArgs {
    pub program: String,
    pub commitment: Commitment,
    pub filter: LogFilter,
    pub max_items: usize,
    pub timings: WatchTimings,
    pub cancellation: Option<CancellationToken>,
}

impl ProgramLogWatchArgs {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            commitment: Commitment::default(),
            filter: LogFilter::default(),
            max_items: LogBuffer::DEFAULT_MAX_ITEMS,
            timings: WatchTimings::default(),
            cancellation: None,
        }
    }

    pub fn with_filter(mut self, filter: LogFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn with_timings(mut self, timings: WatchTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

pub struct ProgramLogWatcher<P: LogPubsub> {
    handle: WatcherHandle<ProgramLogStrategy<P>>,
    buffer: LogBuffer,
}

impl<P: LogPubsub> ProgramLogWatcher<P> {
    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_stopped()
    }

    pub fn buffer(&self) -> &LogBuffer {
        &self.buffer
    }

    pub async fn state(&self) -> WatcherState {
        self.handle.state().await
    }

    pub fn stats(&self) -> WatcherStats {
        self.handle.stats()
    }
}

/// Watch logs of transactions mentioning `args.program`.
pub fn watch_program_logs<P: LogPubsub>(
    pubsub: P,
    args: ProgramLogWatchArgs,
    mut on_log: impl FnMut(ProgramLog) + Send + 'static,
    on_error: Option<ErrorCallback>,
) -> WatchResult<ProgramLogWatcher<P>> {
    if args.program.trim().is_empty() {
        return Err(WatchError::InvalidConfig(
            "program address must not be empty".to_string(),
        ));
    }
    if args.max_items > LogBuffer::MAX_ITEMS_LIMIT {
        return Err(WatchError::InvalidConfig(format!(
            "max_items must be at most {}, got {}",
            LogBuffer::MAX_ITEMS_LIMIT,
            args.max_items
        )));
    }

    let buffer = LogBuffer::new(args.max_items);
    let strategy = ProgramLogStrategy::new(pubsub, args.program, args.commitment, args.filter);
    let mut options = WatcherOptions::new({
        let buffer = buffer.clone();
        move |item: VersionedItem<ProgramLog>| {
            if let Some(log) = item.value {
                buffer.push(log.clone());
                on_log(log);
            }
        }
    })
    .with_timings(args.timings);
    options.on_error = on_error;
    options.cancellation = args.cancellation;

    let handle = create_watcher(strategy, options)?;
    Ok(ProgramLogWatcher { handle, buffer })
}

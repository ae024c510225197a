//! Resource strategy contract.
//!
//! A strategy adapts the orchestrator to one concrete resource kind. It holds no orchestration
//! logic: it knows how to take one snapshot, how to open one push subscription, and how to map the
//! push wire shape into the domain shape.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::core::{Version, VersionedItem, WatchResult};

/// Future returned by [`ResourceStrategy::poll`].
pub type PollFuture<'a> = Pin<Box<dyn Future<Output = WatchResult<()>> + Send + 'a>>;

/// Push sequence produced by an established subscription.
pub type ItemStream<R> = Pin<Box<dyn Stream<Item = WatchResult<VersionedItem<R>>> + Send>>;

/// Future returned by [`ResourceStrategy::subscribe`].
pub type SubscribeFuture<'a, R> =
    Pin<Box<dyn Future<Output = WatchResult<ItemStream<R>>> + Send + 'a>>;

/// One-shot emission slot handed to [`ResourceStrategy::poll`].
///
/// `emit` consumes the emitter, so a poll can report at most one snapshot.
pub struct Emitter<T> {
    sink: Arc<dyn Fn(VersionedItem<T>) -> bool + Send + Sync>,
}

impl<T> Emitter<T> {
    pub fn new(sink: impl Fn(VersionedItem<T>) -> bool + Send + Sync + 'static) -> Self {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Report the snapshot. Returns whether the version gate admitted it.
    pub fn emit(self, version: Version, value: Option<T>) -> bool {
        (self.sink)(VersionedItem { version, value })
    }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Emitter")
    }
}

/// Snapshot/subscribe/normalize triple for one resource.
pub trait ResourceStrategy: Send + Sync + 'static {
    /// Push wire shape.
    type Raw: Send + 'static;
    /// Domain shape delivered to callers.
    type Value: Send + 'static;

    /// Short identifier used in log fields.
    fn label(&self) -> String {
        "resource".to_string()
    }

    /// Pure mapping from the wire shape to the domain shape.
    fn normalize(&self, raw: Option<Self::Raw>) -> Option<Self::Value>;

    /// Take exactly one snapshot and report it through `emit` on success.
    ///
    /// Implementations must abort in-flight work when `cancel` fires.
    fn poll(&self, emit: Emitter<Self::Value>, cancel: CancellationToken) -> PollFuture<'_>;

    /// Establish a push subscription.
    ///
    /// Establishment failures must be returned as `Err` rather than as a stream that fails later.
    fn subscribe(&self, cancel: CancellationToken) -> SubscribeFuture<'_, Self::Raw>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn emitter_forwards_once_and_reports_admission() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let emitter = Emitter::new({
            let seen = seen.clone();
            move |item: VersionedItem<u8>| {
                seen.lock().unwrap().push(item);
                false
            }
        });

        assert!(!emitter.emit(3, Some(1)));
        assert_eq!(seen.lock().unwrap().as_slice(), &[VersionedItem::present(3, 1)]);
    }
}

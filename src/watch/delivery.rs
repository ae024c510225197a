//! Single funnel through which every callback of one watcher handle is invoked.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::debug;

use crate::core::{Version, VersionGate, VersionedItem, WatchError, WatcherHealth, WatcherStats};

/// Caller-supplied update callback.
pub type UpdateCallback<T> = Box<dyn FnMut(VersionedItem<T>) + Send>;
/// Caller-supplied error side channel.
pub type ErrorCallback = Box<dyn FnMut(WatchError) + Send>;

/// Where an offered update came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Seed,
    Push,
    Poll,
}

struct Callbacks<T> {
    gate: VersionGate<UpdateCallback<T>>,
    on_error: Option<ErrorCallback>,
}

/// Gate, callbacks and closed flag shared by the push loop, the poll loop and the handle.
///
/// Every callback runs while holding `callbacks`; `close` takes the same lock before flipping the
/// flag, so once `close` returns no callback is running or will run. The lock is reentrant so a
/// callback may stop its own watcher.
pub struct Delivery<T> {
    closed: AtomicBool,
    callbacks: ReentrantMutex<RefCell<Callbacks<T>>>,
    health: Mutex<WatcherHealth>,
    label: String,
}

impl<T> Delivery<T> {
    pub fn new(label: String, on_update: UpdateCallback<T>, on_error: Option<ErrorCallback>) -> Self {
        Self {
            closed: AtomicBool::new(false),
            callbacks: ReentrantMutex::new(RefCell::new(Callbacks {
                gate: VersionGate::new(on_update),
                on_error,
            })),
            health: Mutex::new(WatcherHealth::new()),
            label,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the delivery closed. Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let _guard = self.callbacks.lock();
        !self.closed.swap(true, Ordering::AcqRel)
    }

    /// Offer an update to the version gate; forwards to `on_update` when admitted.
    pub fn admit(&self, version: Version, value: Option<T>, source: UpdateSource) -> bool {
        let guard = self.callbacks.lock();
        if self.is_closed() {
            return false;
        }
        if source == UpdateSource::Push {
            self.health.lock().record_pushed();
        }

        // A callback that re-enters this delivery (e.g. via `stats`) never touches the RefCell,
        // but a nested `admit` from inside `on_update` would; treat that as a dropped update.
        let Ok(mut callbacks) = guard.try_borrow_mut() else {
            debug!(resource = %self.label, version, "re-entrant update dropped");
            return false;
        };
        let admitted = callbacks.gate.admit(version, value);
        drop(callbacks);

        let mut health = self.health.lock();
        if admitted {
            health.record_admitted(version);
        } else {
            health.record_stale();
            debug!(
                resource = %self.label,
                version,
                ?source,
                "stale update dropped by version gate"
            );
        }
        admitted
    }

    /// Report a recoverable failure through `on_error`.
    pub fn report_error(&self, error: WatchError) {
        let guard = self.callbacks.lock();
        if self.is_closed() {
            return;
        }
        self.health.lock().record_error(&error.to_string());

        let Ok(mut callbacks) = guard.try_borrow_mut() else {
            return;
        };
        if let Some(on_error) = callbacks.on_error.as_mut() {
            on_error(error);
        }
    }

    pub fn last_delivered(&self) -> Option<Version> {
        self.health.lock().last_delivered()
    }

    pub fn record_poll(&self, latency: Duration, ok: bool) {
        let mut health = self.health.lock();
        health.record_poll(latency);
        if !ok {
            health.record_poll_failure();
        }
    }

    pub fn record_demotion(&self) {
        self.health.lock().record_demotion();
    }

    pub fn stats(&self) -> WatcherStats {
        self.health.lock().get_stats()
    }
}

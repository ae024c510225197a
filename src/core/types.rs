use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Ordering key for every observed update (a ledger slot for snapshot-able resources).
pub type Version = u64;

/// Convenience result alias for watcher operations.
pub type WatchResult<T> = Result<T, WatchError>;

/// The unit exchanged between transports and the version gate.
///
/// `value` is `None` when the resource is absent at `version` (e.g. the account does not exist).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedItem<T> {
    pub version: Version,
    pub value: Option<T>,
}

impl<T> VersionedItem<T> {
    pub fn new(version: Version, value: Option<T>) -> Self {
        Self { version, value }
    }

    pub fn present(version: Version, value: T) -> Self {
        Self {
            version,
            value: Some(value),
        }
    }

    pub fn absent(version: Version) -> Self {
        Self {
            version,
            value: None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VersionedItem<U> {
        VersionedItem {
            version: self.version,
            value: self.value.map(f),
        }
    }
}

/// Orchestrator state machine surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Connecting,
    Streaming,
    Polling,
    Stopped,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WatcherState::Connecting => "connecting",
            WatcherState::Streaming => "streaming",
            WatcherState::Polling => "polling",
            WatcherState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Ledger commitment level requested from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical error surface shared by the orchestrator, strategies and transports.
///
/// Everything except `InvalidConfig` is recoverable and only ever reaches callers through the
/// watcher's `on_error` side channel.
#[derive(Debug, Clone, Error)]
pub enum WatchError {
    #[error("ws connect timeout after {}ms", timeout.as_millis())]
    ConnectTimeout { timeout: Duration },

    #[error("Subscription failed: {0}")]
    SubscribeFailed(String),

    #[error("Subscription stream failed: {0}")]
    StreamFailed(String),

    #[error("Poll failed: {0}")]
    PollFailed(String),

    #[error("Invalid watcher configuration: {0}")]
    InvalidConfig(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Transport error ({context}): {error}")]
    TransportError {
        context: &'static str,
        error: String,
    },

    #[error("Parse failed: {0}")]
    ParseFailed(String),

    #[error("RPC error: code={code:?}, message={message}")]
    Rpc { code: Option<i64>, message: String },

    #[error("Operation cancelled")]
    Cancelled,
}

/// Snapshot of per-handle delivery counters.
#[derive(Debug, Clone)]
pub struct WatcherStats {
    pub uptime: Duration,
    pub polls: u64,
    pub poll_failures: u64,
    pub pushed: u64,
    pub admitted: u64,
    pub stale_dropped: u64,
    pub errors: u64,
    pub demotions: u64,
    pub last_delivered: Option<Version>,
    pub p50_poll_latency_us: u64,
    pub p99_poll_latency_us: u64,
    pub recent_errors: Vec<String>,
}

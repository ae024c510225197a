//! Push-first ledger state watchers with ordered fallback to interval polling.
//!
//! A watcher races a websocket subscription against a connect timeout, seeds state with a
//! snapshot poll, streams push updates while the subscription lives and demotes to interval
//! polling when it fails. Every delivery passes a monotonic version gate, so callers see one
//! strictly increasing stream regardless of transport.

pub mod client;
pub mod core;
pub mod pubsub;
pub mod resources;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tls;
pub mod transport;
pub mod watch;

pub use crate::core::{
    Commitment, Version, VersionedItem, WatchError, WatchResult, WatchTimings, WatcherState,
    WatcherStats,
};
pub use pubsub::PubsubClient;
pub use resources::{
    AccountUpdate, AccountWatchArgs, AccountWatcher, LogFilter, ProgramLog, ProgramLogWatchArgs,
    ProgramLogWatcher, watch_account, watch_program_logs,
};
pub use watch::{ResourceStrategy, WatcherHandle, WatcherOptions, create_watcher};

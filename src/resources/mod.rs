//! Concrete resource watchers built on [`crate::watch::create_watcher`].

use std::future::Future;
use std::pin::Pin;

use crate::core::WatchResult;

pub mod account;
pub mod logs;

pub use account::*;
pub use logs::*;

/// Future returned by snapshot RPC collaborators.
pub type RpcFuture<'a, T> = Pin<Box<dyn Future<Output = WatchResult<T>> + Send + 'a>>;

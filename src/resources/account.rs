//! Account watcher: `getAccountInfo` snapshots plus `accountSubscribe` push updates.

use std::sync::Arc;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use super::RpcFuture;
use crate::core::{
    Commitment, Version, VersionedItem, WatchError, WatchResult, WatchTimings, WatcherState,
    WatcherStats,
};
use crate::watch::{
    Emitter, ErrorCallback, PollFuture, ResourceStrategy, SubscribeFuture, WatcherHandle,
    WatcherOptions, create_watcher,
};

/// Account as carried by a push notification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawAccount {
    pub lamports: u64,
    pub owner: String,
    pub data: Bytes,
    pub executable: bool,
    pub rent_epoch: u64,
}

/// Account as delivered to callers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountInfo {
    pub lamports: u64,
    pub owner: String,
    pub data: Bytes,
    pub executable: bool,
    pub rent_epoch: u64,
}

impl From<RawAccount> for AccountInfo {
    fn from(raw: RawAccount) -> Self {
        Self {
            lamports: raw.lamports,
            owner: raw.owner,
            data: raw.data,
            executable: raw.executable,
            rent_epoch: raw.rent_epoch,
        }
    }
}

/// Snapshot query collaborator. The version of the returned item is the context slot.
pub trait AccountRpc: Send + Sync + 'static {
    fn get_account_info(
        &self,
        address: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> RpcFuture<'_, VersionedItem<RawAccount>>;
}

/// Push subscription collaborator.
pub trait AccountPubsub: Send + Sync + 'static {
    fn account_notifications(
        &self,
        address: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> SubscribeFuture<'_, RawAccount>;
}

impl<T: AccountRpc> AccountRpc for Arc<T> {
    fn get_account_info(
        &self,
        address: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> RpcFuture<'_, VersionedItem<RawAccount>> {
        (**self).get_account_info(address, commitment, cancel)
    }
}

impl<T: AccountPubsub> AccountPubsub for Arc<T> {
    fn account_notifications(
        &self,
        address: String,
        commitment: Commitment,
        cancel: CancellationToken,
    ) -> SubscribeFuture<'_, RawAccount> {
        (**self).account_notifications(address, commitment, cancel)
    }
}

/// Binds an RPC and a pubsub collaborator to one account address.
pub struct AccountStrategy<R, P> {
    rpc: R,
    pubsub: P,
    address: String,
    commitment: Commitment,
}

impl<R: AccountRpc, P: AccountPubsub> AccountStrategy<R, P> {
    pub fn new(rpc: R, pubsub: P, address: impl Into<String>, commitment: Commitment) -> Self {
        Self {
            rpc,
            pubsub,
            address: address.into(),
            commitment,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl<R: AccountRpc, P: AccountPubsub> ResourceStrategy for AccountStrategy<R, P> {
    type Raw = RawAccount;
    type Value = AccountInfo;

    fn label(&self) -> String {
        format!("account:{}", self.address)
    }

    /// A zero-lamport account does not exist on chain.
    fn normalize(&self, raw: Option<RawAccount>) -> Option<AccountInfo> {
        raw.filter(|account| account.lamports > 0)
            .map(AccountInfo::from)
    }

    fn poll(&self, emit: Emitter<AccountInfo>, cancel: CancellationToken) -> PollFuture<'_> {
        Box::pin(async move {
            let snapshot = self
                .rpc
                .get_account_info(self.address.clone(), self.commitment, cancel)
                .await?;
            emit.emit(snapshot.version, self.normalize(snapshot.value));
            Ok(())
        })
    }

    fn subscribe(&self, cancel: CancellationToken) -> SubscribeFuture<'_, RawAccount> {
        self.pubsub
            .account_notifications(self.address.clone(), self.commitment, cancel)
    }
}

/// Arguments for [`watch_account`].
#[derive(Clone, Debug)]
pub struct AccountWatchArgs {
    pub address: String,
    pub commitment: Commitment,
    pub timings: WatchTimings,
    pub cancellation: Option<CancellationToken>,
}

impl AccountWatchArgs {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            commitment: Commitment::default(),
            timings: WatchTimings::default(),
            cancellation: None,
        }
    }

    pub fn with_commitment(mut self, commitment: Commitment) -> Self {
        self.commitment = commitment;
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

/// Update delivered by an [`AccountWatcher`]. `account` is `None` when the account does not exist
/// at `slot`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountUpdate {
    pub slot: Version,
    pub account: Option<AccountInfo>,
}

pub struct AccountWatcher<R: AccountRpc, P: AccountPubsub> {
    handle: WatcherHandle<AccountStrategy<R, P>>,
    address: String,
}

impl<R: AccountRpc, P: AccountPubsub> AccountWatcher<R, P> {
    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stop(&self) {
        self.handle.stop();
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_stopped()
    }

    pub async fn state(&self) -> WatcherState {
        self.handle.state().await
    }

    pub fn stats(&self) -> WatcherStats {
        self.handle.stats()
    }
}

/// Watch one account, preferring push notifications and falling back to snapshot polling.
pub fn watch_account<R: AccountRpc, P: AccountPubsub>(
    rpc: R,
    pubsub: P,
    args: AccountWatchArgs,
    mut on_update: impl FnMut(AccountUpdate) + Send + 'static,
    on_error: Option<ErrorCallback>,
) -> WatchResult<AccountWatcher<R, P>> {
    if args.address.trim().is_empty() {
        return Err(WatchError::InvalidConfig(
            "account address must not be empty".to_string(),
        ));
    }

    let address = args.address.clone();
    let strategy = AccountStrategy::new(rpc, pubsub, args.address, args.commitment);
    let mut options = WatcherOptions::new(move |item: VersionedItem<AccountInfo>| {
        on_update(AccountUpdate {
            slot: item.version,
            account: item.value,
        })
    })
    .with_timings(args.timings);
    options.on_error = on_error;
    options.cancellation = args.cancellation;

    let handle = create_watcher(strategy, options)?;
    Ok(AccountWatcher { handle, address })
}

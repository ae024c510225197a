//! Transport-fallback orchestrator.
//!
//! The actor owns the watcher state machine. The IO loops (subscribe race, push loop, poll loop)
//! run outside kameo as spawned tasks and report lifecycle events back with `tell`; every value
//! they observe goes through the shared [`Delivery`] funnel, never through the mailbox.
//!
//! ```text
//! Connecting --subscribe ok--> Streaming --end/error--> Polling
//!     |                                                    ^
//!     +--------------timeout / subscribe error-------------+
//! any state --stop()/token cancelled--> Stopped
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use kameo::prelude::{Actor, ActorRef, Context, Message as KameoMessage, WeakActorRef};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::delivery::{Delivery, ErrorCallback, UpdateCallback, UpdateSource};
use super::strategy::{Emitter, ItemStream, ResourceStrategy};
use crate::core::{
    VersionedItem, WatchError, WatchResult, WatchTimings, WatcherState, WatcherStats,
};

/// Construction options for [`create_watcher`].
pub struct WatcherOptions<T> {
    pub timings: WatchTimings,
    pub on_update: UpdateCallback<T>,
    pub on_error: Option<ErrorCallback>,
    /// Externally owned token; cancelling it stops the watcher. Created when absent.
    pub cancellation: Option<CancellationToken>,
}

impl<T: Send + 'static> WatcherOptions<T> {
    pub fn new(on_update: impl FnMut(VersionedItem<T>) + Send + 'static) -> Self {
        Self {
            timings: WatchTimings::default(),
            on_update: Box::new(on_update),
            on_error: None,
            cancellation: None,
        }
    }

    pub fn with_timings(mut self, timings: WatchTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.timings.poll_interval = poll_interval;
        self
    }

    pub fn with_ws_connect_timeout(mut self, ws_connect_timeout: Duration) -> Self {
        self.timings.ws_connect_timeout = ws_connect_timeout;
        self
    }

    pub fn on_error(mut self, on_error: impl FnMut(WatchError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Arguments passed when spawning a [`WatcherActor`].
pub struct WatcherActorArgs<S: ResourceStrategy> {
    pub strategy: Arc<S>,
    pub timings: WatchTimings,
    pub delivery: Arc<Delivery<S::Value>>,
    pub cancel: CancellationToken,
}

/// Actor owning one watcher's state machine and IO tasks.
pub struct WatcherActor<S: ResourceStrategy> {
    strategy: Arc<S>,
    timings: WatchTimings,
    delivery: Arc<Delivery<S::Value>>,
    cancel: CancellationToken,
    state: WatcherState,
    actor_ref: ActorRef<Self>,
    seed_task: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
    stream_task: Option<JoinHandle<()>>,
    poll_task: Option<JoinHandle<()>>,
    cancel_task: Option<JoinHandle<()>>,
}

pub(crate) enum ConnectOutcome<R> {
    Established(ItemStream<R>),
    Failed(WatchError),
    TimedOut(Duration),
}

/// Subscribe race result, sent as soon as the race settles.
pub(crate) struct ConnectSettled<R>(ConnectOutcome<R>);

/// Push sequence finished; `error` is `None` on a graceful close.
pub(crate) struct StreamClosed {
    error: Option<WatchError>,
}

/// Query the current [`WatcherState`].
pub struct GetWatcherState;

impl<S: ResourceStrategy> Actor for WatcherActor<S> {
    type Args = WatcherActorArgs<S>;
    type Error = WatchError;

    fn name() -> &'static str {
        "WatcherActor"
    }

    async fn on_start(args: Self::Args, actor_ref: ActorRef<Self>) -> WatchResult<Self> {
        let WatcherActorArgs {
            strategy,
            timings,
            delivery,
            cancel,
        } = args;

        // Seed runs on its own; a slow snapshot never holds up the race.
        let seed_task = tokio::spawn(poll_once(
            strategy.clone(),
            delivery.clone(),
            cancel.clone(),
            UpdateSource::Seed,
        ));
        let connect_task = tokio::spawn(connect_race(
            strategy.clone(),
            cancel.clone(),
            timings.ws_connect_timeout,
            actor_ref.clone(),
        ));

        // External cancellation is equivalent to `stop()`.
        let cancel_task = tokio::spawn({
            let cancel = cancel.clone();
            let delivery = delivery.clone();
            let actor_ref = actor_ref.clone();
            async move {
                cancel.cancelled().await;
                delivery.close();
                actor_ref.kill();
            }
        });

        Ok(Self {
            strategy,
            timings,
            delivery,
            cancel,
            state: WatcherState::Connecting,
            actor_ref,
            seed_task: Some(seed_task),
            connect_task: Some(connect_task),
            stream_task: None,
            poll_task: None,
            cancel_task: Some(cancel_task),
        })
    }

    async fn on_stop(
        &mut self,
        _ctx: WeakActorRef<Self>,
        _reason: kameo::error::ActorStopReason,
    ) -> WatchResult<()> {
        self.state = WatcherState::Stopped;
        self.delivery.close();
        self.cancel.cancel();
        for task in [
            self.seed_task.take(),
            self.connect_task.take(),
            self.stream_task.take(),
            self.poll_task.take(),
            self.cancel_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
        Ok(())
    }

    fn on_panic(
        &mut self,
        _actor_ref: WeakActorRef<Self>,
        err: kameo::prelude::PanicError,
    ) -> impl std::future::Future<
        Output = Result<std::ops::ControlFlow<kameo::prelude::ActorStopReason>, Self::Error>,
    > + Send {
        async move {
            tracing::error!(error = ?err, "WatcherActor panicked");
            Ok(std::ops::ControlFlow::Break(
                kameo::prelude::ActorStopReason::Panicked(err),
            ))
        }
    }
}

impl<S: ResourceStrategy> KameoMessage<ConnectSettled<S::Raw>> for WatcherActor<S> {
    type Reply = WatchResult<()>;

    async fn handle(
        &mut self,
        msg: ConnectSettled<S::Raw>,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.connect_task = None;
        if self.is_stopping() {
            self.state = WatcherState::Stopped;
            return Ok(());
        }

        match msg.0 {
            ConnectOutcome::Established(stream) => {
                self.state = WatcherState::Streaming;
                info!(resource = %self.delivery.label(), "push subscription established");
                self.stream_task = Some(tokio::spawn(push_loop(
                    self.strategy.clone(),
                    stream,
                    self.delivery.clone(),
                    self.cancel.clone(),
                    self.actor_ref.clone(),
                )));
            }
            ConnectOutcome::Failed(err) => {
                warn!(
                    resource = %self.delivery.label(),
                    error = %err,
                    "push subscription failed"
                );
                self.delivery.report_error(err);
                self.enter_polling("subscribe_failed");
            }
            ConnectOutcome::TimedOut(timeout) => {
                warn!(
                    resource = %self.delivery.label(),
                    timeout_ms = timeout.as_millis() as u64,
                    "push subscription did not establish in time"
                );
                self.delivery
                    .report_error(WatchError::ConnectTimeout { timeout });
                self.enter_polling("connect_timeout");
            }
        }
        Ok(())
    }
}

impl<S: ResourceStrategy> KameoMessage<StreamClosed> for WatcherActor<S> {
    type Reply = WatchResult<()>;

    async fn handle(
        &mut self,
        msg: StreamClosed,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.state != WatcherState::Streaming {
            return Ok(());
        }
        self.stream_task = None;
        if self.is_stopping() {
            self.state = WatcherState::Stopped;
            return Ok(());
        }

        match msg.error {
            Some(err) => {
                warn!(
                    resource = %self.delivery.label(),
                    error = %err,
                    "push stream failed"
                );
                self.delivery.report_error(err);
                self.enter_polling("stream_failed");
            }
            None => {
                info!(resource = %self.delivery.label(), "push stream closed by remote");
                self.enter_polling("stream_closed");
            }
        }
        Ok(())
    }
}

impl<S: ResourceStrategy> KameoMessage<GetWatcherState> for WatcherActor<S> {
    type Reply = WatchResult<WatcherState>;

    async fn handle(
        &mut self,
        _msg: GetWatcherState,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        if self.is_stopping() {
            return Ok(WatcherState::Stopped);
        }
        Ok(self.state)
    }
}

impl<S: ResourceStrategy> WatcherActor<S> {
    fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled() || self.delivery.is_closed()
    }

    /// One-way demotion; the push subscription is never re-attempted for this handle.
    fn enter_polling(&mut self, reason: &'static str) {
        if self.state == WatcherState::Polling {
            return;
        }
        self.state = WatcherState::Polling;
        self.delivery.record_demotion();
        info!(
            resource = %self.delivery.label(),
            reason,
            poll_interval_ms = self.timings.poll_interval.as_millis() as u64,
            last_version = ?self.delivery.last_delivered(),
            "falling back to interval polling"
        );
        self.poll_task = Some(tokio::spawn(poll_loop(
            self.strategy.clone(),
            self.delivery.clone(),
            self.cancel.clone(),
            self.timings.poll_interval,
        )));
    }
}

/// Subscribe-vs-timeout race. Runs concurrently with the seed poll; overlap between a late seed
/// and the next state's deliveries is resolved by the version gate.
async fn connect_race<S: ResourceStrategy>(
    strategy: Arc<S>,
    cancel: CancellationToken,
    timeout: Duration,
    actor_ref: ActorRef<WatcherActor<S>>,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        res = strategy.subscribe(cancel.clone()) => match res {
            Ok(stream) => ConnectOutcome::Established(stream),
            Err(err) => ConnectOutcome::Failed(err),
        },
        _ = tokio::time::sleep(timeout) => ConnectOutcome::TimedOut(timeout),
    };

    let _ = actor_ref.tell(ConnectSettled(outcome)).send().await;
}

async fn push_loop<S: ResourceStrategy>(
    strategy: Arc<S>,
    mut stream: ItemStream<S::Raw>,
    delivery: Arc<Delivery<S::Value>>,
    cancel: CancellationToken,
    actor_ref: ActorRef<WatcherActor<S>>,
) {
    let error = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            next = stream.next() => match next {
                Some(Ok(item)) => {
                    let value = strategy.normalize(item.value);
                    delivery.admit(item.version, value, UpdateSource::Push);
                }
                Some(Err(err)) => break Some(err),
                None => break None,
            },
        }
    };

    let _ = actor_ref.tell(StreamClosed { error }).send().await;
}

/// One immediate poll, then one poll per `interval` until cancelled. Failures never stop the loop.
async fn poll_loop<S: ResourceStrategy>(
    strategy: Arc<S>,
    delivery: Arc<Delivery<S::Value>>,
    cancel: CancellationToken,
    interval: Duration,
) {
    poll_once(
        strategy.clone(),
        delivery.clone(),
        cancel.clone(),
        UpdateSource::Poll,
    )
    .await;

    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                poll_once(
                    strategy.clone(),
                    delivery.clone(),
                    cancel.clone(),
                    UpdateSource::Poll,
                )
                .await;
            }
        }
    }
}

async fn poll_once<S: ResourceStrategy>(
    strategy: Arc<S>,
    delivery: Arc<Delivery<S::Value>>,
    cancel: CancellationToken,
    source: UpdateSource,
) {
    if cancel.is_cancelled() || delivery.is_closed() {
        return;
    }

    let emitter = Emitter::new({
        let delivery = delivery.clone();
        move |item: VersionedItem<S::Value>| delivery.admit(item.version, item.value, source)
    });

    let started = Instant::now();
    let result = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        res = strategy.poll(emitter, cancel.clone()) => res,
    };
    delivery.record_poll(started.elapsed(), result.is_ok());

    if let Err(err) = result {
        warn!(
            resource = %delivery.label(),
            ?source,
            error = %err,
            "poll failed"
        );
        delivery.report_error(err);
    }
}

/// Externally visible watcher handle.
///
/// Dropping the handle stops the watcher.
pub struct WatcherHandle<S: ResourceStrategy> {
    actor_ref: ActorRef<WatcherActor<S>>,
    delivery: Arc<Delivery<S::Value>>,
    cancel: CancellationToken,
}

impl<S: ResourceStrategy> WatcherHandle<S> {
    /// Stop the watcher. Idempotent.
    ///
    /// Once this returns no `on_update`/`on_error` invocation is running or will run.
    pub fn stop(&self) {
        let first = self.delivery.close();
        self.cancel.cancel();
        self.actor_ref.kill();
        if first {
            info!(resource = %self.delivery.label(), "watcher stopped");
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.delivery.is_closed()
    }

    pub async fn state(&self) -> WatcherState {
        if self.is_stopped() {
            return WatcherState::Stopped;
        }
        match self.actor_ref.ask(GetWatcherState).await {
            Ok(state) => state,
            Err(_) => WatcherState::Stopped,
        }
    }

    pub fn stats(&self) -> WatcherStats {
        self.delivery.stats()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl<S: ResourceStrategy> Drop for WatcherHandle<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Start watching the resource described by `strategy`.
///
/// Fails fast on invalid timings. Must be called from within a tokio runtime.
pub fn create_watcher<S: ResourceStrategy>(
    strategy: S,
    options: WatcherOptions<S::Value>,
) -> WatchResult<WatcherHandle<S>> {
    let WatcherOptions {
        timings,
        on_update,
        on_error,
        cancellation,
    } = options;
    timings.validate()?;
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(WatchError::InvalidConfig(
            "create_watcher must be called from within a tokio runtime".to_string(),
        ));
    }

    let strategy = Arc::new(strategy);
    let label = strategy.label();
    let cancel = cancellation.unwrap_or_else(CancellationToken::new);
    let delivery = Arc::new(Delivery::new(label.clone(), on_update, on_error));

    info!(
        resource = %label,
        poll_interval_ms = timings.poll_interval.as_millis() as u64,
        ws_connect_timeout_ms = timings.ws_connect_timeout.as_millis() as u64,
        "starting watcher"
    );

    let actor_ref = WatcherActor::spawn(WatcherActorArgs {
        strategy,
        timings,
        delivery: delivery.clone(),
        cancel: cancel.clone(),
    });

    Ok(WatcherHandle {
        actor_ref,
        delivery,
        cancel,
    })
}

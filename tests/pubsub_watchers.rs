use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use shared_watch::resources::{
    AccountRpc, AccountWatchArgs, LogFilter, ProgramLog, ProgramLogWatchArgs, RawAccount,
    RpcFuture, watch_account, watch_program_logs,
};
use shared_watch::testing::{MockServer, MockTransport};
use shared_watch::{
    AccountUpdate, Commitment, PubsubClient, VersionedItem, WatchError, WatchTimings,
    WatcherState,
};
use sonic_rs::JsonValueTrait;
use tokio_util::sync::CancellationToken;

const ADDRESS: &str = "Vote111111111111111111111111111111111111111";
const PROGRAM: &str = "Memo1UhkJRfHyvLMcVucJwxXeuD728EqVDDwQDxFMNo";

/// Snapshot RPC returning `lamports = 1000 + slot` at slots 10, 20, 30, ...
#[derive(Clone, Default)]
struct SteppingRpc {
    calls: Arc<AtomicUsize>,
}

impl AccountRpc for SteppingRpc {
    fn get_account_info(
        &self,
        address: String,
        _commitment: Commitment,
        _cancel: CancellationToken,
    ) -> RpcFuture<'_, VersionedItem<RawAccount>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) as u64;
        Box::pin(async move {
            assert_eq!(address, ADDRESS);
            let slot = (n + 1) * 10;
            Ok(VersionedItem::present(
                slot,
                RawAccount {
                    lamports: 1_000 + slot,
                    owner: "11111111111111111111111111111111".to_string(),
                    data: Bytes::new(),
                    executable: false,
                    rent_epoch: 0,
                },
            ))
        })
    }
}

fn account_notification(subscription: u64, slot: u64, lamports: u64) -> String {
    format!(
        r#"{{"jsonrpc":"2.0","method":"accountNotification","params":{{"result":{{"context":{{"slot":{slot}}},"value":{{"data":["AQID","base64"],"executable":false,"lamports":{lamports},"owner":"11111111111111111111111111111111","rentEpoch":18446744073709551615,"space":3}}}},"subscription":{subscription}}}}}"#
    )
}

fn logs_notification(subscription: u64, slot: u64, signature: &str, failed: bool) -> String {
    let err = if failed {
        r#"{"InstructionError":[0,{"Custom":1}]}"#
    } else {
        "null"
    };
    format!(
        r#"{{"jsonrpc":"2.0","method":"logsNotification","params":{{"result":{{"context":{{"slot":{slot}}},"value":{{"signature":"{signature}","err":{err},"logs":["Program {PROGRAM} invoke [1]"]}}}},"subscription":{subscription}}}}}"#
    )
}

async fn wait_for<F: Fn() -> bool>(pred: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !pred() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn wait_for_state<F, Fut>(state: F, want: WatcherState)
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = WatcherState>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let got = state().await;
        if got == want {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "still {got} while waiting for {want}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn slow_polling() -> WatchTimings {
    WatchTimings::new(Duration::from_secs(60), Duration::from_secs(5))
}

type Updates = Arc<Mutex<Vec<AccountUpdate>>>;
type Errors = Arc<Mutex<Vec<WatchError>>>;

fn start_account_watcher(
    rpc: SteppingRpc,
) -> (
    MockServer,
    shared_watch::AccountWatcher<SteppingRpc, PubsubClient<MockTransport>>,
    Updates,
    Errors,
) {
    let (transport, server) = MockTransport::channel_pair();
    let pubsub = PubsubClient::with_transport("ws://mock.invalid", transport);
    let updates: Updates = Arc::new(Mutex::new(Vec::new()));
    let errors: Errors = Arc::new(Mutex::new(Vec::new()));

    let watcher = watch_account(
        rpc,
        pubsub,
        AccountWatchArgs::new(ADDRESS).with_timings(slow_polling()),
        {
            let updates = updates.clone();
            move |update| updates.lock().push(update)
        },
        Some(Box::new({
            let errors = errors.clone();
            move |err: WatchError| errors.lock().push(err)
        })),
    )
    .expect("watch_account");
    (server, watcher, updates, errors)
}

#[tokio::test]
async fn account_watcher_streams_notifications_and_falls_back_on_close() {
    let rpc = SteppingRpc::default();
    let (mut server, watcher, updates, errors) = start_account_watcher(rpc.clone());

    let request = server.recv_request().await.expect("subscribe request");
    assert_eq!(request.method, "accountSubscribe");
    assert_eq!(request.params[0].as_str(), Some(ADDRESS));
    assert_eq!(request.params[1]["encoding"].as_str(), Some("base64"));
    assert_eq!(request.params[1]["commitment"].as_str(), Some("confirmed"));
    assert_eq!(server.connected_urls(), vec!["ws://mock.invalid".to_string()]);

    server.confirm(request.id, 4242).unwrap();
    wait_for_state(|| watcher.state(), WatcherState::Streaming).await;
    wait_for(|| updates.lock().len() == 1).await;

    // Seed (slot 10) is in; an older push is dropped, a zero-lamport push means "closed".
    server.send_text(account_notification(4242, 9, 1)).unwrap();
    server.send_text(account_notification(9999, 14, 1)).unwrap();
    server.send_text(account_notification(4242, 15, 77)).unwrap();
    server.send_text(account_notification(4242, 16, 0)).unwrap();
    wait_for(|| updates.lock().len() >= 3).await;

    server.close().unwrap();
    wait_for(|| updates.lock().len() >= 4).await;

    let updates = updates.lock().clone();
    assert_eq!(
        updates.iter().map(|u| u.slot).collect::<Vec<_>>(),
        vec![10, 15, 16, 20]
    );
    assert_eq!(updates[0].account.as_ref().map(|a| a.lamports), Some(1_010));
    let pushed = updates[1].account.as_ref().expect("pushed account");
    assert_eq!(pushed.lamports, 77);
    assert_eq!(pushed.data.as_ref(), &[1u8, 2, 3]);
    assert_eq!(pushed.rent_epoch, u64::MAX);
    assert_eq!(updates[2].account, None);
    assert_eq!(updates[3].account.as_ref().map(|a| a.lamports), Some(1_020));

    assert!(errors.lock().is_empty());
    assert_eq!(watcher.state().await, WatcherState::Polling);
    assert_eq!(rpc.calls.load(Ordering::SeqCst), 2);

    watcher.stop();
    assert!(!watcher.is_active());
}

#[tokio::test]
async fn rejected_subscription_reports_rpc_error_and_polls() {
    let (mut server, watcher, updates, errors) = start_account_watcher(SteppingRpc::default());

    let request = server.recv_request().await.expect("subscribe request");
    server
        .reject(request.id, -32602, "Invalid param: WrongSize")
        .unwrap();

    wait_for(|| updates.lock().len() >= 2).await;
    let errors = errors.lock().clone();
    assert_eq!(errors.len(), 1);
    match &errors[0] {
        WatchError::Rpc { code, message } => {
            assert_eq!(*code, Some(-32602));
            assert_eq!(message, "Invalid param: WrongSize");
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(watcher.state().await, WatcherState::Polling);
    assert_eq!(watcher.stats().demotions, 1);
}

#[tokio::test]
async fn malformed_notification_fails_the_stream_once() {
    let (mut server, watcher, updates, errors) = start_account_watcher(SteppingRpc::default());

    let request = server.recv_request().await.expect("subscribe request");
    server.confirm(request.id, 1).unwrap();
    wait_for_state(|| watcher.state(), WatcherState::Streaming).await;

    server.send_text("{\"jsonrpc\":\"2.0\",\"method\":").unwrap();
    wait_for(|| updates.lock().len() >= 2).await;

    let errors = errors.lock().clone();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], WatchError::StreamFailed(_)));
    assert_eq!(watcher.state().await, WatcherState::Polling);
}

#[tokio::test]
async fn program_logs_are_filtered_buffered_and_fanned_out() {
    let (transport, mut server) = MockTransport::channel_pair();
    let pubsub = PubsubClient::with_transport("ws://mock.invalid", transport);
    let seen: Arc<Mutex<Vec<ProgramLog>>> = Arc::new(Mutex::new(Vec::new()));

    let watcher = watch_program_logs(
        pubsub,
        ProgramLogWatchArgs::new(PROGRAM)
            .with_filter(LogFilter::Error)
            .with_max_items(2)
            .with_commitment(Commitment::Processed),
        {
            let seen = seen.clone();
            move |log| seen.lock().push(log)
        },
        None,
    )
    .expect("watch_program_logs");

    let request = server.recv_request().await.expect("subscribe request");
    assert_eq!(request.method, "logsSubscribe");
    assert_eq!(request.params[0]["mentions"][0].as_str(), Some(PROGRAM));
    assert_eq!(request.params[1]["commitment"].as_str(), Some("processed"));
    server.confirm(request.id, 7).unwrap();
    wait_for_state(|| watcher.state(), WatcherState::Streaming).await;

    server.send_text(logs_notification(7, 100, "ok-1", false)).unwrap();
    server.send_text(logs_notification(7, 100, "bad-1", true)).unwrap();
    server.send_text(logs_notification(7, 100, "bad-2", true)).unwrap();
    wait_for(|| seen.lock().len() >= 2).await;

    let (backlog, mut live) = watcher.buffer().subscribe();
    server.send_text(logs_notification(7, 101, "bad-3", true)).unwrap();
    let next = tokio::time::timeout(Duration::from_secs(5), live.recv())
        .await
        .expect("live log in time")
        .expect("live log");
    wait_for(|| seen.lock().len() >= 3).await;

    let signatures: Vec<_> = seen.lock().iter().map(|l| l.signature.clone()).collect();
    assert_eq!(signatures, vec!["bad-1", "bad-2", "bad-3"]);
    assert!(seen.lock().iter().all(|l| !l.is_success() && l.slot >= 100));
    assert_eq!(
        backlog.iter().map(|l| l.signature.as_str()).collect::<Vec<_>>(),
        vec!["bad-1", "bad-2"]
    );
    assert_eq!(next.signature, "bad-3");
    assert_eq!(
        watcher
            .buffer()
            .recent()
            .iter()
            .map(|l| l.signature.as_str())
            .collect::<Vec<_>>(),
        vec!["bad-2", "bad-3"]
    );

    watcher.stop();
    assert!(!watcher.is_active());
    assert_eq!(watcher.state().await, WatcherState::Stopped);
}

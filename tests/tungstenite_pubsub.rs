use std::time::Duration;

use futures_util::StreamExt;
use shared_watch::client::accept_async;
use shared_watch::resources::{AccountPubsub, LogPubsub};
use shared_watch::testing::RecordedRequest;
use shared_watch::{Commitment, PubsubClient, WatchError};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accept one websocket, answer its subscribe request with `reply(id)`, then send `after` frames
/// and close.
async fn serve_once(
    reply: impl Fn(u64) -> String + Send + 'static,
    after: Vec<String>,
) -> (String, tokio::task::JoinHandle<Option<RecordedRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.ok()?;
        let mut ws = accept_async(stream).await.ok()?;
        let frame = ws.next().await?.ok()?;
        let request = RecordedRequest::from_frame(&frame)?;
        ws.send_text(reply(request.id)).await.ok()?;
        for text in after {
            ws.send_text(text).await.ok()?;
        }
        let _ = ws.close().await;
        Some(request)
    });
    (format!("ws://{addr}"), server)
}

#[tokio::test]
async fn account_subscription_over_a_real_socket() {
    let notification = r#"{"jsonrpc":"2.0","method":"accountNotification","params":{"result":{"context":{"slot":77},"value":{"data":["aGk=","base64"],"executable":true,"lamports":5,"owner":"BPFLoaderUpgradeab1e11111111111111111111111","rentEpoch":2,"space":2}},"subscription":31}}"#;
    let (url, server) = serve_once(
        |id| format!(r#"{{"jsonrpc":"2.0","result":31,"id":{id}}}"#),
        vec![notification.to_string()],
    )
    .await;

    let client = PubsubClient::new(url);
    let stream = tokio::time::timeout(
        Duration::from_secs(5),
        client.account_notifications(
            "Addr1111111111111111111111111111111111111111".to_string(),
            Commitment::Finalized,
            CancellationToken::new(),
        ),
    )
    .await
    .expect("subscribe in time")
    .expect("subscribe");

    let items: Vec<_> = tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .expect("stream ends after close");
    assert_eq!(items.len(), 1);
    let item = items.into_iter().next().unwrap().expect("notification");
    assert_eq!(item.version, 77);
    let account = item.value.expect("account");
    assert_eq!(account.data.as_ref(), b"hi");
    assert!(account.executable);

    let request = server.await.expect("server task").expect("request");
    assert_eq!(request.method, "accountSubscribe");
}

#[tokio::test]
async fn logs_subscription_rejected_by_server() {
    let (url, server) = serve_once(
        |id| {
            format!(
                r#"{{"jsonrpc":"2.0","error":{{"code":-32602,"message":"Invalid Request: Only 1 address supported"}},"id":{id}}}"#
            )
        },
        Vec::new(),
    )
    .await;

    let client = PubsubClient::new(url);
    let result = client
        .logs_notifications(
            "Prog111111111111111111111111111111111111111".to_string(),
            Commitment::Confirmed,
            CancellationToken::new(),
        )
        .await;
    match result {
        Err(WatchError::Rpc { code, message }) => {
            assert_eq!(code, Some(-32602));
            assert!(message.contains("Only 1 address"));
        }
        Err(other) => panic!("unexpected error {other:?}"),
        Ok(_) => panic!("subscription should be rejected"),
    }

    let request = server.await.expect("server task").expect("request");
    assert_eq!(request.method, "logsSubscribe");
}

#[tokio::test]
async fn unreachable_endpoint_fails_to_subscribe() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let client = PubsubClient::new(format!("ws://{addr}"));
    let result = client
        .account_notifications(
            "Addr".to_string(),
            Commitment::Confirmed,
            CancellationToken::new(),
        )
        .await;
    assert!(matches!(result, Err(WatchError::ConnectionFailed(_))));
}

#[tokio::test]
async fn cancelled_subscribe_returns_cancelled() {
    // Accepts TCP but never completes the websocket handshake.
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let _hold = tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.ok()?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        Some(())
    });

    let cancel = CancellationToken::new();
    let client = PubsubClient::new(format!("ws://{addr}"));
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        })
    };
    let result = client
        .account_notifications("Addr".to_string(), Commitment::Confirmed, cancel)
        .await;
    assert!(matches!(result, Err(WatchError::Cancelled)));
    canceller.await.expect("canceller");
}

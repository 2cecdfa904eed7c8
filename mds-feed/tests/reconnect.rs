//! Socket-level adapter behavior against an in-process mock venue: after a
//! dropped connection the adapter reconnects with backoff and resends the
//! original subscribe frame verbatim before data flows again.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mds_core::{DataKind, MarketData};
use mds_feed::{BinanceAdapter, ExchangeAdapter, FeedError};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

const TICK: &str = r#"{"e":"24hrTicker","s":"BTCUSDT","c":"45000.0","b":"44999.0","a":"45001.0","h":"46000.0","l":"44000.0","v":"10.0"}"#;

#[tokio::test]
async fn resubscribes_verbatim_after_connection_loss() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        // First session: capture the subscribe frame, then drop the socket.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = frame_tx.send(text);
        }
        drop(ws);

        // Second session: capture the resubscribe frame, then serve a tick.
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            let _ = frame_tx.send(text);
        }
        ws.send(Message::Text(TICK.to_string())).await.unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
    });

    let adapter = BinanceAdapter::new(&format!("ws://{addr}"));
    let (record_tx, mut record_rx) = mpsc::unbounded_channel::<MarketData>();
    adapter.on_message(Arc::new(move |record| {
        let _ = record_tx.send(record);
    }));

    adapter.connect().await.unwrap();
    adapter
        .subscribe(
            &["BTCUSDT".to_string(), "ETHUSDT".to_string()],
            &[DataKind::Ticker, DataKind::Depth],
        )
        .await
        .unwrap();

    let original = timeout(Duration::from_secs(2), frame_rx.recv())
        .await
        .expect("no subscribe frame")
        .unwrap();
    // Reconnect kicks in after the first 1 s backoff.
    let resent = timeout(Duration::from_secs(10), frame_rx.recv())
        .await
        .expect("no resubscribe frame")
        .unwrap();
    assert_eq!(original, resent);

    let record = timeout(Duration::from_secs(5), record_rx.recv())
        .await
        .expect("no data after reconnect")
        .unwrap();
    assert_eq!(record.symbol, "BTCUSDT");
    assert_eq!(record.kind(), DataKind::Ticker);
    assert!(adapter.is_connected());

    adapter.close().await;
    assert!(!adapter.is_connected());
    // Idempotent close.
    adapter.close().await;
}

#[tokio::test]
async fn subscribe_before_connect_is_rejected() {
    let adapter = BinanceAdapter::new("ws://127.0.0.1:1");
    let err = adapter
        .subscribe(&["BTCUSDT".to_string()], &[DataKind::Ticker])
        .await
        .unwrap_err();
    assert!(matches!(err, FeedError::NotConnected));
}

#[tokio::test]
async fn connect_to_dead_endpoint_fails_fast() {
    // Port 1 is essentially never listening.
    let adapter = BinanceAdapter::new("ws://127.0.0.1:1");
    let err = adapter.connect().await.unwrap_err();
    assert!(matches!(err, FeedError::Connect(_)));
    assert!(!adapter.is_connected());
}

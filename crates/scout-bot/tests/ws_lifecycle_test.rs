//! Discovery stream lifecycle integration tests.
//!
//! Runs the discovery service against a local mock trades stream:
//! - Subscription per instrument and participant registration
//! - Reconnect after the server drops the socket
//! - Retry counter reset by successful connects
//! - Malformed frames skipped on a live subscription
//! - Fatal failure once retries are exhausted
//! - Scheduled restarts by the supervisor

mod integration;
use integration::common::mock_ws::{trade, MockBehavior, MockWsServer};

use scout_bot::supervise_discovery;
use scout_core::TraderId;
use scout_store::{MemoryStore, TraderStore};
use scout_tracker::{DiscoveryConfig, DiscoveryService, SystemClock, TrackerError};
use scout_ws::{BackoffPolicy, ConnectionConfig, WsError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

fn discovery_config(url: String, instruments: &[&str], backoff: BackoffPolicy) -> DiscoveryConfig {
    DiscoveryConfig {
        connection: ConnectionConfig {
            url,
            instruments: instruments.iter().map(|s| s.to_string()).collect(),
            backoff,
            ..ConnectionConfig::default()
        },
        ..DiscoveryConfig::default()
    }
}

fn fast_backoff(max_retries: u32) -> BackoffPolicy {
    BackoffPolicy {
        base_delay_ms: 20,
        max_delay_ms: 50,
        jitter_max_ms: 0,
        max_retries,
    }
}

async fn wait_for<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let reached = timeout(Duration::from_secs(5), async {
        loop {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(reached.is_ok(), "timed out waiting for {what}");
}

#[tokio::test]
async fn test_discovery_registers_participants() {
    let server = MockWsServer::start(MockBehavior {
        trades: vec![trade("BTC", "0xAAA", "0xBBB")],
        drop_after_push: false,
        ..MockBehavior::default()
    })
    .await;

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(DiscoveryService::new(
        discovery_config(server.url(), &["BTC"], fast_backoff(3)),
        store.clone(),
        Arc::new(SystemClock),
    ));
    let cancel = CancellationToken::new();

    let handle = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    wait_for("traders to register", || {
        let store = store.clone();
        async move { store.len() == 2 }
    })
    .await;

    let buyer = store.trader(&TraderId::parse("0xaaa").unwrap()).unwrap();
    assert!(buyer.active);
    assert!(buyer.last_refreshed_at.is_none());

    cancel.cancel();
    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(result.is_ok(), "cancelled run should end cleanly: {result:?}");

    server.shutdown().await;
}

#[tokio::test]
async fn test_subscribes_to_every_instrument() {
    let server = MockWsServer::start(MockBehavior::default()).await;

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(DiscoveryService::new(
        discovery_config(server.url(), &["BTC", "ETH"], fast_backoff(3)),
        store,
        Arc::new(SystemClock),
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    let srv = &server;
    wait_for("both subscriptions", move || async move {
        srv.received_messages().await.len() >= 2
    })
    .await;

    let messages = server.received_messages().await;
    for coin in ["BTC", "ETH"] {
        assert!(
            messages.iter().any(|m| {
                let v: serde_json::Value = serde_json::from_str(m).unwrap();
                v["method"] == "subscribe"
                    && v["subscription"]["type"] == "trades"
                    && v["subscription"]["coin"] == coin
            }),
            "missing trades subscription for {coin}"
        );
    }

    cancel.cancel();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let server = MockWsServer::start(MockBehavior {
        trades: vec![trade("SOL", "0x1", "0x2")],
        drop_after_push: true,
        ..MockBehavior::default()
    })
    .await;

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(DiscoveryService::new(
        // Unbounded retries.
        discovery_config(server.url(), &["SOL"], fast_backoff(0)),
        store.clone(),
        Arc::new(SystemClock),
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    let srv = &server;
    wait_for("three connections", move || async move {
        srv.connection_count().await >= 3
    })
    .await;

    // Same participants on every connection: registered once.
    assert_eq!(store.len(), 2);

    cancel.cancel();
    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(result.is_ok());
    server.shutdown().await;
}

#[tokio::test]
async fn test_successful_connects_reset_retry_count() {
    let server = MockWsServer::start(MockBehavior {
        trades: vec![trade("SOL", "0x1", "0x2")],
        drop_after_push: true,
        ..MockBehavior::default()
    })
    .await;

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(DiscoveryService::new(
        // A single failure is tolerated; every drop follows a good handshake.
        discovery_config(server.url(), &["SOL"], fast_backoff(1)),
        store.clone(),
        Arc::new(SystemClock),
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    let srv = &server;
    wait_for("four connections", move || async move {
        srv.connection_count().await >= 4
    })
    .await;
    assert!(!handle.is_finished(), "run gave up despite successful connects");

    cancel.cancel();
    let result = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    assert!(result.is_ok(), "cancelled run should end cleanly: {result:?}");
    server.shutdown().await;
}

#[tokio::test]
async fn test_malformed_frame_keeps_subscription() {
    let server = MockWsServer::start(MockBehavior {
        raw_frames: vec![
            "not json at all".to_string(),
            r#"{"channel": "trades", "data": 42}"#.to_string(),
        ],
        trades: vec![trade("BTC", "0xc1", "0xc2")],
        drop_after_push: false,
    })
    .await;

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(DiscoveryService::new(
        discovery_config(server.url(), &["BTC"], fast_backoff(3)),
        store.clone(),
        Arc::new(SystemClock),
    ));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let service = service.clone();
        let cancel = cancel.clone();
        async move { service.run(cancel).await }
    });

    wait_for("the trade after the bad frames", || {
        let store = store.clone();
        async move { store.len() == 2 }
    })
    .await;
    assert!(store.trader(&TraderId::parse("0xc1").unwrap()).is_some());
    // Same connection, same single subscribe.
    assert_eq!(server.connection_count().await, 1);
    let subscribes = server
        .received_messages()
        .await
        .iter()
        .filter(|m| m.contains("\"subscribe\""))
        .count();
    assert_eq!(subscribes, 1);

    cancel.cancel();
    let _ = timeout(Duration::from_secs(2), handle).await;
    server.shutdown().await;
}

#[tokio::test]
async fn test_exhausted_retries_are_fatal() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let service = DiscoveryService::new(
        discovery_config(format!("ws://127.0.0.1:{port}"), &["BTC"], fast_backoff(2)),
        Arc::new(MemoryStore::new()),
        Arc::new(SystemClock),
    );

    let result = timeout(Duration::from_secs(5), service.run(CancellationToken::new()))
        .await
        .expect("run should give up instead of hanging");

    assert!(matches!(
        result,
        Err(TrackerError::Ws(WsError::RetriesExhausted { attempts: 3 }))
    ));
}

#[tokio::test]
async fn test_supervisor_restarts_on_cadence() {
    let server = MockWsServer::start(MockBehavior {
        trades: vec![trade("ETH", "0xa1", "0xb2")],
        drop_after_push: false,
        ..MockBehavior::default()
    })
    .await;

    let store = Arc::new(MemoryStore::new());
    let service = Arc::new(DiscoveryService::new(
        discovery_config(server.url(), &["ETH"], fast_backoff(3)),
        store.clone(),
        Arc::new(SystemClock),
    ));
    let cancel = CancellationToken::new();
    let supervisor = tokio::spawn(supervise_discovery(
        service,
        Duration::from_millis(300),
        cancel.clone(),
    ));

    let srv = &server;
    wait_for("a scheduled restart", move || async move {
        srv.connection_count().await >= 2
    })
    .await;
    assert_eq!(store.active_count(), 2);

    cancel.cancel();
    timeout(Duration::from_secs(2), supervisor)
        .await
        .expect("supervisor should stop on cancel")
        .unwrap();
    server.shutdown().await;
}

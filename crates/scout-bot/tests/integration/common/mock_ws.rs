//! Mock trades stream for integration tests.
//!
//! Accepts WebSocket connections, acknowledges every subscribe request and
//! answers each one with the configured raw frames and trades payloads. Optionally drops
//! the connection after the first subscribe to exercise reconnects.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    /// Text frames pushed verbatim after each subscribe ack, before the trades.
    pub raw_frames: Vec<String>,
    /// `data` arrays pushed on the trades channel after each subscribe ack.
    pub trades: Vec<Value>,
    /// Close the socket right after the first push.
    pub drop_after_push: bool,
}

#[derive(Default)]
struct Shared {
    received: Vec<String>,
    connections: u32,
}

/// A mock WebSocket server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    shared: Arc<Mutex<Shared>>,
}

impl MockWsServer {
    pub async fn start(behavior: MockBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Mutex::new(Shared::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let shared_clone = shared.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(
                            stream,
                            shared_clone.clone(),
                            behavior.clone(),
                        ));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            shared,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        self.shared.lock().await.connections
    }

    pub async fn received_messages(&self) -> Vec<String> {
        self.shared.lock().await.received.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// A trades `data` array with one trade between `buyer` and `seller`.
pub fn trade(coin: &str, buyer: &str, seller: &str) -> Value {
    json!([{
        "coin": coin,
        "side": "B",
        "px": "60000.0",
        "sz": "0.01",
        "time": 1_700_000_000_000u64,
        "hash": "0x00",
        "tid": 1,
        "users": [buyer, seller]
    }])
}

async fn handle_connection(stream: TcpStream, shared: Arc<Mutex<Shared>>, behavior: MockBehavior) {
    shared.lock().await.connections += 1;

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {e}");
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                shared.lock().await.received.push(text.clone());

                let Ok(parsed) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                match parsed.get("method").and_then(Value::as_str) {
                    Some("ping") => {
                        let pong = json!({"channel": "pong"});
                        let _ = write.send(Message::Text(pong.to_string())).await;
                    }
                    Some("subscribe") => {
                        let Some(subscription) = parsed.get("subscription") else {
                            continue;
                        };
                        let ack = json!({
                            "channel": "subscriptionResponse",
                            "data": {"method": "subscribe", "subscription": subscription}
                        });
                        let _ = write.send(Message::Text(ack.to_string())).await;

                        for raw in &behavior.raw_frames {
                            let _ = write.send(Message::Text(raw.clone())).await;
                        }
                        for data in &behavior.trades {
                            let push = json!({"channel": "trades", "data": data});
                            let _ = write.send(Message::Text(push.to_string())).await;
                        }
                        if behavior.drop_after_push {
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    _ => {}
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }
}

//! Trader discovery from the public trades stream.
//!
//! The connection manager owns the socket and its reconnect loop; this
//! service consumes the forwarded messages, extracts participant addresses
//! and registers the ones the store has not seen yet.

use crate::clock::Clock;
use crate::error::{TrackerError, TrackerResult};
use scout_core::TraderId;
use scout_store::TraderStore;
use scout_telemetry::Metrics;
use scout_ws::{ConnectionConfig, ConnectionManager, WsMessage};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Discovery configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub connection: ConnectionConfig,
    /// Buffer between the socket task and the consumer.
    pub channel_capacity: usize,
    /// Planned restart cadence, applied by the supervisor.
    pub restart_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            channel_capacity: 1024,
            restart_interval: Duration::from_secs(3600),
        }
    }
}

/// Registers traders seen on the trades stream.
pub struct DiscoveryService {
    config: DiscoveryConfig,
    store: Arc<dyn TraderStore>,
    clock: Arc<dyn Clock>,
}

impl DiscoveryService {
    pub fn new(config: DiscoveryConfig, store: Arc<dyn TraderStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Stream and register until `cancel` fires or reconnects are exhausted.
    ///
    /// Returns `Ok(())` on cancellation and an error when the stream gave up.
    pub async fn run(&self, cancel: CancellationToken) -> TrackerResult<()> {
        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let manager = ConnectionManager::new(self.config.connection.clone(), tx, cancel);

        info!(
            url = %self.config.connection.url,
            instruments = self.config.connection.instruments.len(),
            "Discovery started"
        );

        let stream = manager.run();
        tokio::pin!(stream);

        let result = loop {
            tokio::select! {
                res = &mut stream => break res,
                Some(msg) = rx.recv() => self.consume(&msg),
            }
        };

        // Messages forwarded before the stream ended are still registered.
        while let Ok(msg) = rx.try_recv() {
            self.consume(&msg);
        }

        match result {
            Ok(()) => {
                info!("Discovery stopped");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Discovery stream failed");
                Err(TrackerError::Ws(e))
            }
        }
    }

    fn consume(&self, msg: &WsMessage) {
        if let Err(e) = self.handle_message(msg) {
            warn!(error = %e, "Failed to register discovered traders");
        }
    }

    /// Register the participants of one message. Returns how many were new.
    ///
    /// Identifiers are de-duplicated within the message before the store is
    /// touched. Malformed trades and addresses are counted and skipped.
    pub fn handle_message(&self, msg: &WsMessage) -> TrackerResult<usize> {
        if !msg.is_trades() {
            if msg.channel() == Some("error") {
                warn!(?msg, "Error notice on trades stream");
            } else {
                debug!(channel = ?msg.channel(), "Ignoring non-trades message");
            }
            return Ok(0);
        }

        let parsed = msg.as_trades();
        if parsed.failed_count > 0 {
            Metrics::malformed_n("trade", parsed.failed_count as u64);
            warn!(skipped = parsed.failed_count, "Skipped malformed trade entries");
        }

        let mut ids = BTreeSet::new();
        for trade in &parsed.trades {
            for user in &trade.users {
                match TraderId::parse(user) {
                    Ok(id) => {
                        ids.insert(id);
                    }
                    Err(e) => {
                        Metrics::malformed("trade_participant");
                        debug!(coin = %trade.coin, error = %e, "Skipping invalid participant");
                    }
                }
            }
        }
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<TraderId> = ids.into_iter().collect();
        let created = self.store.register_new(&ids, self.clock.now())?;
        if created > 0 {
            Metrics::traders_discovered(created as u64);
            info!(created, seen = ids.len(), "Discovered new traders");
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use chrono::{TimeZone, Utc};
    use scout_store::MemoryStore;
    use serde_json::json;

    fn service(store: Arc<MemoryStore>) -> DiscoveryService {
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .return_const(Utc.timestamp_opt(1_700_000_000, 0).unwrap());
        DiscoveryService::new(DiscoveryConfig::default(), store, Arc::new(clock))
    }

    fn trades(data: serde_json::Value) -> WsMessage {
        serde_json::from_value(json!({ "channel": "trades", "data": data })).unwrap()
    }

    #[test]
    fn test_registers_unique_participants() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());

        let msg = trades(json!([
            {"coin": "BTC", "side": "B", "px": "60000", "sz": "0.1", "time": 1, "hash": "0x0", "tid": 1,
             "users": ["0xAAA", "0xbbb"]},
            {"coin": "BTC", "side": "A", "px": "60001", "sz": "0.2", "time": 2, "hash": "0x1", "tid": 2,
             "users": ["0xaaa", "0xccc"]},
        ]));

        assert_eq!(svc.handle_message(&msg).unwrap(), 3);
        assert_eq!(store.len(), 3);

        let t = store.trader(&TraderId::parse("0xaaa").unwrap()).unwrap();
        assert!(t.active);
        assert!(t.last_refreshed_at.is_none());
        assert_eq!(t.first_seen_at, Utc.timestamp_opt(1_700_000_000, 0).unwrap());
    }

    #[test]
    fn test_known_traders_not_recreated() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let msg = trades(json!([{"coin": "ETH", "users": ["0x1", "0x2"]}]));

        assert_eq!(svc.handle_message(&msg).unwrap(), 2);
        assert_eq!(svc.handle_message(&msg).unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let msg = trades(json!([
            {"coin": "SOL"},
            {"coin": "SOL", "users": ["", "0x3"]},
            42,
        ]));

        assert_eq!(svc.handle_message(&msg).unwrap(), 1);
        assert!(store.trader(&TraderId::parse("0x3").unwrap()).is_some());
    }

    #[test]
    fn test_participants_alias() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let msg = trades(json!({"coin": "ARB", "participants": ["0x9", "0x8"]}));

        assert_eq!(svc.handle_message(&msg).unwrap(), 2);
    }

    #[test]
    fn test_non_trade_channels_ignored() {
        let store = Arc::new(MemoryStore::new());
        let svc = service(store.clone());
        let msg: WsMessage = serde_json::from_value(json!({
            "channel": "error",
            "data": "Invalid subscription"
        }))
        .unwrap();

        assert_eq!(svc.handle_message(&msg).unwrap(), 0);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_reports_exhausted_retries() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut config = DiscoveryConfig::default();
        config.connection.url = format!("ws://127.0.0.1:{port}");
        config.connection.instruments = vec!["BTC".to_string()];
        config.connection.backoff.max_retries = 2;

        let store = Arc::new(MemoryStore::new());
        let svc = DiscoveryService::new(config, store, Arc::new(crate::clock::SystemClock));

        let err = svc.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            err,
            TrackerError::Ws(scout_ws::WsError::RetriesExhausted { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_run_returns_ok_when_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let svc = service(Arc::new(MemoryStore::new()));
        assert!(svc.run(cancel).await.is_ok());
    }
}

//! Downstream delivery of change events.
//!
//! Publishing happens after the refresh is committed, so a failed publish
//! never loses an event from the store.

use crate::error::{TrackerError, TrackerResult};
use parking_lot::Mutex;
use scout_core::ChangeEvent;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// Sink for committed change events.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: &ChangeEvent) -> TrackerResult<()>;
}

/// Fan-out of JSON-encoded events over a broadcast channel.
///
/// Having no subscribers is normal and not an error.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    tx: broadcast::Sender<String>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: &ChangeEvent) -> TrackerResult<()> {
        let json = serde_json::to_string(event)
            .map_err(|e| TrackerError::Publish(format!("encode event {}: {e}", event.id)))?;

        match self.tx.send(json) {
            Ok(n) => trace!(receivers = n, event_id = %event.id, "Change event broadcast"),
            Err(_) => trace!(event_id = %event.id, "No event subscribers"),
        }
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: &ChangeEvent) -> TrackerResult<()> {
        Ok(())
    }
}

/// Records published events in memory. Used by tests.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    events: Mutex<Vec<ChangeEvent>>,
    fail: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventPublisher for MemoryPublisher {
    fn publish(&self, event: &ChangeEvent) -> TrackerResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrackerError::Publish("publisher unavailable".to_string()));
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

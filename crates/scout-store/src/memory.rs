//! In-memory [`TraderStore`] with an optional on-disk journal.

use crate::error::{StoreError, StoreResult};
use crate::journal::{Journal, JournalRecord};
use crate::store::TraderStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use scout_core::{ChangeEvent, PositionSnapshot, RankingMetric, Trader, TraderId};
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use tracing::{debug, info};

/// Store configuration.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// Journal directory. `None` keeps everything in memory only.
    pub data_dir: Option<PathBuf>,
    /// Snapshots kept per trader (at least the latest is always kept).
    /// `None` keeps the full history.
    pub snapshot_retention: Option<usize>,
}

/// Rotation key: never-refreshed first, then oldest refresh, then refresh
/// order, then id.
type QueueKey = (Option<DateTime<Utc>>, u64, TraderId);

struct TraderEntry {
    trader: Trader,
    /// Position in the refresh order; 0 until first refresh.
    refresh_seq: u64,
    snapshots: VecDeque<PositionSnapshot>,
    events: Vec<ChangeEvent>,
}

impl TraderEntry {
    fn queue_key(&self) -> QueueKey {
        (
            self.trader.last_refreshed_at,
            self.refresh_seq,
            self.trader.id.clone(),
        )
    }
}

#[derive(Default)]
struct Inner {
    traders: HashMap<TraderId, TraderEntry>,
    /// Active traders only.
    queue: BTreeSet<QueueKey>,
    next_seq: u64,
}

/// In-memory store.
///
/// Queue and history live behind one `RwLock` so that a refresh commit is a
/// single critical section. Metrics live in a `DashMap`.
pub struct MemoryStore {
    inner: RwLock<Inner>,
    metrics: DashMap<TraderId, RankingMetric>,
    journal: Option<Mutex<Journal>>,
    snapshot_retention: Option<usize>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Volatile store without a journal.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            metrics: DashMap::new(),
            journal: None,
            snapshot_retention: None,
        }
    }

    /// Open a store, replaying the journal when `data_dir` is set.
    ///
    /// The replayed journal is compacted right away, so it holds one line per
    /// trader and per metric plus whatever is appended afterwards.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let mut store = Self::new();
        store.snapshot_retention = config.snapshot_retention.map(|n| n.max(1));

        if let Some(dir) = config.data_dir {
            let (journal, replayed) = Journal::open(&dir, |record| store.apply(record))?;
            store.journal = Some(Mutex::new(journal));
            info!(
                dir = %dir.display(),
                replayed,
                traders = store.len(),
                "Store restored from journal"
            );
            store.compact()?;
        }

        Ok(store)
    }

    /// Rewrite the journal as a checkpoint of the current state.
    ///
    /// Superseded refreshes, activity flips and metric upserts are dropped,
    /// and only retained snapshots are kept. Returns the lines written; 0
    /// without a journal.
    pub fn compact(&self) -> StoreResult<usize> {
        let Some(journal) = &self.journal else {
            return Ok(0);
        };
        // Exclusive: no commit or metric upsert can interleave.
        let inner = self.inner.write();
        let mut journal = journal.lock();

        let mut ids: Vec<&TraderId> = inner.traders.keys().collect();
        ids.sort();
        let traders = ids.into_iter().filter_map(|id| inner.traders.get(id)).map(|entry| {
            JournalRecord::TraderRestored {
                trader: entry.trader.clone(),
                refresh_seq: entry.refresh_seq,
                snapshots: entry.snapshots.iter().cloned().collect(),
                events: entry.events.clone(),
            }
        });
        let metrics: Vec<JournalRecord> = self
            .metrics
            .iter()
            .map(|m| JournalRecord::MetricUpserted {
                metric: m.value().clone(),
            })
            .collect();

        journal.checkpoint(traders.chain(metrics))
    }

    /// Total traders, active or not.
    pub fn len(&self) -> usize {
        self.inner.read().traders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot history of a trader, oldest first.
    pub fn snapshots_for(&self, id: &TraderId) -> Vec<PositionSnapshot> {
        self.inner
            .read()
            .traders
            .get(id)
            .map(|e| e.snapshots.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn write_journal(&self, record: &JournalRecord) -> StoreResult<()> {
        match &self.journal {
            Some(journal) => journal.lock().append(record),
            None => Ok(()),
        }
    }

    fn apply(&self, record: JournalRecord) {
        match record {
            JournalRecord::TraderRegistered { trader } => {
                Self::apply_register(&mut self.inner.write(), trader);
            }
            JournalRecord::ActivityChanged { trader, active } => {
                Self::apply_activity(&mut self.inner.write(), &trader, active);
            }
            JournalRecord::RefreshCommitted {
                snapshot,
                events,
                at,
            } => {
                self.apply_refresh(&mut self.inner.write(), snapshot, events, at);
            }
            JournalRecord::MetricUpserted { metric } => {
                self.metrics.insert(metric.trader.clone(), metric);
            }
            JournalRecord::TraderRestored {
                trader,
                refresh_seq,
                snapshots,
                events,
            } => {
                self.apply_restore(&mut self.inner.write(), trader, refresh_seq, snapshots, events);
            }
        }
    }

    fn apply_restore(
        &self,
        inner: &mut Inner,
        trader: Trader,
        refresh_seq: u64,
        snapshots: Vec<PositionSnapshot>,
        events: Vec<ChangeEvent>,
    ) {
        if let Some(old) = inner.traders.remove(&trader.id) {
            inner.queue.remove(&old.queue_key());
        }
        inner.next_seq = inner.next_seq.max(refresh_seq);

        let mut snapshots: VecDeque<PositionSnapshot> = snapshots.into();
        if let Some(keep) = self.snapshot_retention {
            while snapshots.len() > keep {
                snapshots.pop_front();
            }
        }
        let entry = TraderEntry {
            trader,
            refresh_seq,
            snapshots,
            events,
        };
        if entry.trader.active {
            inner.queue.insert(entry.queue_key());
        }
        inner.traders.insert(entry.trader.id.clone(), entry);
    }

    fn apply_register(inner: &mut Inner, trader: Trader) {
        if inner.traders.contains_key(&trader.id) {
            return;
        }
        let entry = TraderEntry {
            trader,
            refresh_seq: 0,
            snapshots: VecDeque::new(),
            events: Vec::new(),
        };
        if entry.trader.active {
            inner.queue.insert(entry.queue_key());
        }
        inner.traders.insert(entry.trader.id.clone(), entry);
    }

    fn apply_activity(inner: &mut Inner, id: &TraderId, active: bool) -> bool {
        let Some(entry) = inner.traders.get_mut(id) else {
            return false;
        };
        if entry.trader.active == active {
            return false;
        }
        let key = entry.queue_key();
        entry.trader.active = active;
        if active {
            inner.queue.insert(key);
        } else {
            inner.queue.remove(&key);
        }
        true
    }

    fn apply_refresh(
        &self,
        inner: &mut Inner,
        snapshot: PositionSnapshot,
        events: Vec<ChangeEvent>,
        at: DateTime<Utc>,
    ) {
        inner.next_seq += 1;
        let seq = inner.next_seq;

        let Some(entry) = inner.traders.get_mut(&snapshot.trader) else {
            return;
        };
        let old_key = entry.queue_key();

        entry.trader.mark_refreshed(at);
        entry.refresh_seq = seq;
        entry.events.extend(events);
        entry.snapshots.push_back(snapshot);
        if let Some(keep) = self.snapshot_retention {
            while entry.snapshots.len() > keep {
                entry.snapshots.pop_front();
            }
        }

        let new_key = entry.queue_key();
        if entry.trader.active {
            inner.queue.remove(&old_key);
            inner.queue.insert(new_key);
        }
    }
}

impl TraderStore for MemoryStore {
    fn register_new(&self, ids: &[TraderId], now: DateTime<Utc>) -> StoreResult<usize> {
        let mut inner = self.inner.write();
        let mut seen = HashSet::with_capacity(ids.len());
        let mut created = 0;

        for id in ids {
            if !seen.insert(id) || inner.traders.contains_key(id) {
                continue;
            }
            let record = JournalRecord::TraderRegistered {
                trader: Trader::discovered(id.clone(), now),
            };
            self.write_journal(&record)?;
            if let JournalRecord::TraderRegistered { trader } = record {
                Self::apply_register(&mut inner, trader);
            }
            created += 1;
        }

        if created > 0 {
            debug!(created, total = inner.traders.len(), "Registered new traders");
        }
        Ok(created)
    }

    fn trader(&self, id: &TraderId) -> Option<Trader> {
        self.inner.read().traders.get(id).map(|e| e.trader.clone())
    }

    fn select_oldest(&self, n: usize) -> Vec<Trader> {
        let inner = self.inner.read();
        inner
            .queue
            .iter()
            .take(n)
            .filter_map(|(_, _, id)| inner.traders.get(id).map(|e| e.trader.clone()))
            .collect()
    }

    fn latest_snapshot(&self, id: &TraderId) -> Option<PositionSnapshot> {
        self.inner
            .read()
            .traders
            .get(id)
            .and_then(|e| e.snapshots.back().cloned())
    }

    fn commit_refresh(
        &self,
        snapshot: PositionSnapshot,
        events: Vec<ChangeEvent>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write();
        if !inner.traders.contains_key(&snapshot.trader) {
            return Err(StoreError::UnknownTrader(snapshot.trader));
        }

        let record = JournalRecord::RefreshCommitted {
            snapshot,
            events,
            at: now,
        };
        self.write_journal(&record)?;

        if let JournalRecord::RefreshCommitted {
            snapshot,
            events,
            at,
        } = record
        {
            self.apply_refresh(&mut inner, snapshot, events, at);
        }
        Ok(())
    }

    fn active_traders(&self) -> Vec<Trader> {
        self.inner
            .read()
            .traders
            .values()
            .filter(|e| e.trader.active)
            .map(|e| e.trader.clone())
            .collect()
    }

    fn active_count(&self) -> usize {
        self.inner.read().queue.len()
    }

    fn events_for(&self, id: &TraderId) -> Vec<ChangeEvent> {
        self.inner
            .read()
            .traders
            .get(id)
            .map(|e| e.events.clone())
            .unwrap_or_default()
    }

    fn set_active(&self, id: &TraderId, active: bool) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        match inner.traders.get(id) {
            None => return Err(StoreError::UnknownTrader(id.clone())),
            Some(entry) if entry.trader.active == active => return Ok(false),
            Some(_) => {}
        }

        self.write_journal(&JournalRecord::ActivityChanged {
            trader: id.clone(),
            active,
        })?;
        Ok(Self::apply_activity(&mut inner, id, active))
    }

    fn upsert_metric(&self, metric: RankingMetric) -> StoreResult<()> {
        // Shared with other upserts, exclusive with compaction.
        let _inner = self.inner.read();
        let record = JournalRecord::MetricUpserted { metric };
        self.write_journal(&record)?;
        if let JournalRecord::MetricUpserted { metric } = record {
            self.metrics.insert(metric.trader.clone(), metric);
        }
        Ok(())
    }

    fn metric(&self, id: &TraderId) -> Option<RankingMetric> {
        self.metrics.get(id).map(|m| m.value().clone())
    }

    fn ranking(&self) -> Vec<RankingMetric> {
        let mut all: Vec<RankingMetric> =
            self.metrics.iter().map(|m| m.value().clone()).collect();
        all.sort_by(|a, b| {
            b.trader_score
                .total_cmp(&a.trader_score)
                .then_with(|| a.trader.cmp(&b.trader))
        });
        all
    }
}

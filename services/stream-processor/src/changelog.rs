//! Durable changelog store
//!
//! `JournaledStore` keeps the working set in an `InMemoryStore` and writes
//! every mutation to a per-lane journal before applying it. Every
//! `snapshot_every` records the whole working set is written as a snapshot
//! and the journal segments it covers are deleted, so disk use and replay
//! time follow the live state rather than the full history.
//!
//! On open the newest snapshot is restored and only the journal records
//! after it are replayed, so the in-memory state (aggregates and close
//! boundaries) comes back exactly as it was at the last durable record.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use persistence::{
    decode_record, encode_record, JournalConfig, JournalReader, JournalWriter, ReaderError,
    Snapshot, SnapshotError, SnapshotInterval, SnapshotStore, SyncPolicy,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use types::ids::Symbol;

use crate::aggregate::Aggregate;
use crate::partition::LaneId;
use crate::store::{AggregateStore, InMemoryStore, StoreError, StoreFactory};
use crate::window::Window;

/// Journal records between two snapshots unless configured otherwise.
pub const DEFAULT_SNAPSHOT_EVERY: u64 = 10_000;

/// One journaled store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeRecord {
    Upserted(Aggregate),
    Closed { symbol: Symbol, closed_through: i64 },
    Evicted { symbol: Symbol, horizon: i64 },
}

impl ChangeRecord {
    /// Event-time stamp stored in the journal frame.
    fn timestamp(&self) -> i64 {
        match self {
            ChangeRecord::Upserted(agg) => agg.window.start,
            ChangeRecord::Closed { closed_through, .. } => *closed_through,
            ChangeRecord::Evicted { horizon, .. } => *horizon,
        }
    }
}

/// Full working set as captured in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StoreImage {
    aggregates: Vec<Aggregate>,
    boundaries: BTreeMap<Symbol, i64>,
}

impl StoreImage {
    fn capture(store: &InMemoryStore) -> Self {
        Self {
            aggregates: store.aggregates(),
            boundaries: store.close_boundaries(),
        }
    }

    fn restore(self) -> Result<InMemoryStore, StoreError> {
        let mut store = InMemoryStore::new();
        for aggregate in self.aggregates {
            store.upsert(aggregate)?;
        }
        for (symbol, closed_through) in self.boundaries {
            store.record_close(&symbol, closed_through)?;
        }
        Ok(store)
    }
}

/// What recovery found when the store was opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Sequence of the snapshot recovery started from.
    pub snapshot_sequence: Option<u64>,
    /// Journal records replayed on top of the snapshot.
    pub records: u64,
    pub torn_tail_bytes: u64,
}

pub struct JournaledStore {
    inner: InMemoryStore,
    journal: JournalWriter,
    snapshots: SnapshotStore,
    interval: SnapshotInterval,
    replay: ReplayStats,
}

impl JournaledStore {
    /// Open (or create) the store in `config.dir` with the default
    /// snapshot interval.
    pub fn open(config: JournalConfig) -> Result<Self, StoreError> {
        Self::open_with_snapshots(config, DEFAULT_SNAPSHOT_EVERY)
    }

    /// Open (or create) the store in `config.dir`, snapshotting every
    /// `snapshot_every` records. Zero never snapshots.
    pub fn open_with_snapshots(config: JournalConfig, snapshot_every: u64) -> Result<Self, StoreError> {
        let started = Instant::now();
        let snapshots = SnapshotStore::new(&config.dir);
        let mut replay = ReplayStats::default();

        let (mut inner, floor) = match snapshots.load_latest().map_err(snapshot_error)? {
            Some(snapshot) => {
                let image: StoreImage = snapshot.decode_state().map_err(snapshot_error)?;
                replay.snapshot_sequence = Some(snapshot.sequence);
                (image.restore()?, snapshot.sequence)
            }
            None => (InMemoryStore::new(), 0),
        };

        let mut reader = JournalReader::open(&config.dir).map_err(reader_error)?;
        while let Some(entry) = reader.next_entry().map_err(reader_error)? {
            // left behind by a crash between snapshot and prune
            if entry.sequence <= floor {
                continue;
            }
            if replay.records == 0 && entry.sequence != floor + 1 {
                return Err(StoreError::Corrupt(format!(
                    "changelog resumes at seq={} but snapshot ends at seq={}",
                    entry.sequence, floor
                )));
            }
            let record: ChangeRecord = decode_record(&entry.payload).map_err(|e| {
                StoreError::Corrupt(format!("record seq={}: {}", entry.sequence, e))
            })?;
            apply(&mut inner, record)?;
            replay.records += 1;
        }
        if let Some(torn) = reader.torn_tail() {
            warn!(
                segment = %torn.segment.display(),
                offset = torn.offset,
                bytes = torn.bytes,
                "Discarding torn changelog tail"
            );
            replay.torn_tail_bytes = torn.bytes;
        }

        let journal = JournalWriter::open_after(config, floor)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(
            dir = %journal.dir().display(),
            snapshot_sequence = floor,
            records = replay.records,
            aggregates = inner.len(),
            symbols = inner.close_boundaries().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Changelog replayed"
        );

        Ok(Self {
            inner,
            journal,
            snapshots,
            interval: SnapshotInterval::new(snapshot_every, floor),
            replay,
        })
    }

    pub fn replay_stats(&self) -> &ReplayStats {
        &self.replay
    }

    pub fn dir(&self) -> &Path {
        self.journal.dir()
    }

    /// Snapshot the working set now and prune the journal behind it.
    pub fn compact(&mut self) -> Result<(), StoreError> {
        let sequence = self.journal.next_sequence().saturating_sub(1);
        let snapshot = Snapshot::new(
            sequence,
            Utc::now().timestamp_millis(),
            &StoreImage::capture(&self.inner),
        )
        .map_err(snapshot_error)?;
        self.snapshots.write(&snapshot).map_err(snapshot_error)?;

        let segments = self
            .journal
            .prune_sealed()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let stale = self.snapshots.retain_latest(1).map_err(snapshot_error)?;
        self.interval.record(sequence);

        debug!(
            dir = %self.journal.dir().display(),
            sequence,
            aggregates = self.inner.len(),
            pruned_segments = segments,
            pruned_snapshots = stale,
            "Changelog compacted"
        );
        Ok(())
    }

    fn append(&mut self, record: &ChangeRecord) -> Result<(), StoreError> {
        let payload =
            encode_record(record).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.journal
            .append(record.timestamp(), &payload)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    /// Compact once enough records have piled up. The mutation that got us
    /// here is already durable in the journal, so a failed compaction is
    /// logged and retried after the next interval.
    fn maybe_compact(&mut self) {
        let sequence = self.journal.next_sequence().saturating_sub(1);
        if !self.interval.is_due(sequence) {
            return;
        }
        if let Err(err) = self.compact() {
            warn!(
                dir = %self.journal.dir().display(),
                sequence,
                error = %err,
                "Changelog compaction failed"
            );
            self.interval.record(sequence);
        }
    }
}

fn apply(store: &mut InMemoryStore, record: ChangeRecord) -> Result<(), StoreError> {
    match record {
        ChangeRecord::Upserted(agg) => store.upsert(agg),
        ChangeRecord::Closed {
            symbol,
            closed_through,
        } => store.record_close(&symbol, closed_through),
        ChangeRecord::Evicted { symbol, horizon } => store.evict_through(&symbol, horizon).map(|_| ()),
    }
}

fn snapshot_error(err: SnapshotError) -> StoreError {
    match err {
        SnapshotError::Io(e) => StoreError::Unavailable(e.to_string()),
        other => StoreError::Corrupt(other.to_string()),
    }
}

fn reader_error(err: ReaderError) -> StoreError {
    match err {
        ReaderError::Io(e) => StoreError::Unavailable(e.to_string()),
        other => StoreError::Corrupt(other.to_string()),
    }
}

impl AggregateStore for JournaledStore {
    fn get(&self, symbol: &Symbol, window: &Window) -> Result<Option<Aggregate>, StoreError> {
        self.inner.get(symbol, window)
    }

    fn upsert(&mut self, aggregate: Aggregate) -> Result<(), StoreError> {
        let record = ChangeRecord::Upserted(aggregate);
        self.append(&record)?;
        apply(&mut self.inner, record)?;
        self.maybe_compact();
        Ok(())
    }

    fn record_close(&mut self, symbol: &Symbol, closed_through: i64) -> Result<(), StoreError> {
        let record = ChangeRecord::Closed {
            symbol: symbol.clone(),
            closed_through,
        };
        self.append(&record)?;
        apply(&mut self.inner, record)?;
        self.maybe_compact();
        Ok(())
    }

    fn evict_through(&mut self, symbol: &Symbol, horizon: i64) -> Result<usize, StoreError> {
        let count = self.inner.evictable(symbol, horizon);
        if count == 0 {
            return Ok(0);
        }
        self.append(&ChangeRecord::Evicted {
            symbol: symbol.clone(),
            horizon,
        })?;
        let evicted = self.inner.evict_through(symbol, horizon)?;
        self.maybe_compact();
        Ok(evicted)
    }

    fn close_boundaries(&self) -> BTreeMap<Symbol, i64> {
        self.inner.close_boundaries()
    }

    fn aggregates(&self) -> Vec<Aggregate> {
        self.inner.aggregates()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn checksum(&self) -> String {
        self.inner.checksum()
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.journal
            .sync()
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Gives every lane its own journal directory under `root`.
#[derive(Debug, Clone)]
pub struct JournaledStoreFactory {
    root: PathBuf,
    sync_policy: SyncPolicy,
    snapshot_every: u64,
}

impl JournaledStoreFactory {
    pub fn new(root: impl Into<PathBuf>, sync_policy: SyncPolicy) -> Self {
        Self {
            root: root.into(),
            sync_policy,
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
        }
    }

    pub fn with_snapshot_every(mut self, snapshot_every: u64) -> Self {
        self.snapshot_every = snapshot_every;
        self
    }

    pub fn lane_dir(&self, lane: &LaneId) -> PathBuf {
        self.root.join(lane.dir_name())
    }
}

impl StoreFactory for JournaledStoreFactory {
    fn open(&self, lane: &LaneId) -> Result<Box<dyn AggregateStore>, StoreError> {
        let config = JournalConfig {
            sync_policy: self.sync_policy,
            ..JournalConfig::new(self.lane_dir(lane))
        };
        Ok(Box::new(JournaledStore::open_with_snapshots(
            config,
            self.snapshot_every,
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowSize;
    use persistence::segment::list_segments;
    use rust_decimal::Decimal;
    use std::fs;
    use tempfile::TempDir;

    const MIN: i64 = 60_000;

    fn agg(symbol: &str, ts: i64, count: u64) -> Aggregate {
        Aggregate {
            symbol: Symbol::new(symbol),
            window: Window::assign(ts, WindowSize::DEFAULT),
            count,
            total_volume: count,
            average_price: Decimal::new(12_345, 2),
        }
    }

    fn open(dir: &Path) -> JournaledStore {
        JournaledStore::open(JournalConfig::new(dir)).unwrap()
    }

    #[test]
    fn test_reopen_restores_state() {
        let tmp = TempDir::new().unwrap();
        let checksum = {
            let mut store = open(tmp.path());
            store.upsert(agg("AAPL", 0, 1)).unwrap();
            store.upsert(agg("AAPL", 0, 2)).unwrap();
            store.upsert(agg("GOOGL", 5 * MIN, 1)).unwrap();
            store.record_close(&Symbol::new("MSFT"), 10 * MIN).unwrap();
            store.sync().unwrap();
            store.checksum()
        };

        let store = open(tmp.path());
        assert_eq!(store.checksum(), checksum);
        assert_eq!(store.len(), 2);
        assert_eq!(store.replay_stats().records, 4);
        assert_eq!(store.close_boundaries()[&Symbol::new("MSFT")], 10 * MIN);
        let w0 = Window::assign(0, WindowSize::DEFAULT);
        assert_eq!(store.get(&Symbol::new("AAPL"), &w0).unwrap().unwrap().count, 2);
    }

    #[test]
    fn test_eviction_survives_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = open(tmp.path());
            store.upsert(agg("AAPL", 0, 1)).unwrap();
            store.upsert(agg("AAPL", 5 * MIN, 1)).unwrap();
            assert_eq!(store.evict_through(&Symbol::new("AAPL"), 5 * MIN).unwrap(), 1);
            // nothing left to evict: no record written
            assert_eq!(store.evict_through(&Symbol::new("AAPL"), 5 * MIN).unwrap(), 0);
            store.sync().unwrap();
        }
        let store = open(tmp.path());
        assert_eq!(store.len(), 1);
        assert_eq!(store.replay_stats().records, 3);
    }

    #[test]
    fn test_torn_tail_is_dropped_on_reopen() {
        let tmp = TempDir::new().unwrap();
        let checksum = {
            let mut store = open(tmp.path());
            store.upsert(agg("AAPL", 0, 1)).unwrap();
            store.sync().unwrap();
            store.checksum()
        };
        let (_, segment) = list_segments(tmp.path()).unwrap().pop().unwrap();
        let mut data = fs::read(&segment).unwrap();
        data.extend_from_slice(&[60, 0, 0, 0, 1, 2, 3]);
        fs::write(&segment, &data).unwrap();

        let mut store = open(tmp.path());
        assert_eq!(store.checksum(), checksum);
        assert_eq!(store.replay_stats().torn_tail_bytes, 7);

        // the writer resumed cleanly after the cut
        store.upsert(agg("AAPL", 0, 2)).unwrap();
        store.sync().unwrap();
        drop(store);
        assert_eq!(open(tmp.path()).replay_stats().records, 2);
    }

    #[test]
    fn test_corrupt_journal_is_reported() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = open(tmp.path());
            store.upsert(agg("AAPL", 0, 1)).unwrap();
            store.upsert(agg("AAPL", 0, 2)).unwrap();
            store.sync().unwrap();
        }
        let (_, segment) = list_segments(tmp.path()).unwrap().pop().unwrap();
        let mut data = fs::read(&segment).unwrap();
        data[30] ^= 0xFF;
        fs::write(&segment, &data).unwrap();

        let result = JournaledStore::open(JournalConfig::new(tmp.path()));
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_factory_separates_lanes() {
        let tmp = TempDir::new().unwrap();
        let factory = JournaledStoreFactory::new(tmp.path(), SyncPolicy::EveryWrite);
        {
            let mut lane0 = factory.open(&LaneId::Hashed(0)).unwrap();
            lane0.upsert(agg("AAPL", 0, 1)).unwrap();
            lane0.sync().unwrap();
        }
        assert_eq!(factory.open(&LaneId::Hashed(0)).unwrap().len(), 1);
        assert!(factory.open(&LaneId::Hashed(1)).unwrap().is_empty());
        assert!(factory.lane_dir(&LaneId::Hashed(1)).ends_with("lane-001"));
    }

    fn open_compacting(dir: &Path, every: u64) -> JournaledStore {
        JournaledStore::open_with_snapshots(JournalConfig::new(dir), every).unwrap()
    }

    fn journal_bytes(dir: &Path) -> u64 {
        list_segments(dir)
            .unwrap()
            .iter()
            .map(|(_, path)| fs::metadata(path).unwrap().len())
            .sum()
    }

    #[test]
    fn test_reopen_replays_only_tail_after_snapshot() {
        let tmp = TempDir::new().unwrap();
        let symbol = Symbol::new("AAPL");
        let checksum = {
            let mut store = open_compacting(tmp.path(), 100);
            // one window per record, everything older evicted right away
            for i in 0..2_000i64 {
                let aggregate = agg("AAPL", i * 5 * MIN, 1);
                let horizon = aggregate.window.start;
                store.upsert(aggregate).unwrap();
                store.evict_through(&symbol, horizon).unwrap();
            }
            store.sync().unwrap();
            store.checksum()
        };

        let store = open_compacting(tmp.path(), 100);
        assert_eq!(store.checksum(), checksum);
        assert_eq!(store.len(), 1);
        let stats = store.replay_stats();
        assert!(stats.snapshot_sequence.is_some());
        assert!(stats.records < 100, "replayed {} records", stats.records);
        assert_eq!(SnapshotStore::new(tmp.path()).list().unwrap().len(), 1);
        assert!(list_segments(tmp.path()).unwrap().len() <= 2);
        // bounded by the interval, not by 4000 records of history
        assert!(journal_bytes(tmp.path()) < 100 * 200);
    }

    #[test]
    fn test_writes_after_snapshot_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = open_compacting(tmp.path(), 0);
            store.upsert(agg("AAPL", 0, 1)).unwrap();
            store.record_close(&Symbol::new("MSFT"), 10 * MIN).unwrap();
            store.compact().unwrap();
            store.upsert(agg("AAPL", 0, 2)).unwrap();
            store.upsert(agg("GOOGL", MIN, 1)).unwrap();
            store.sync().unwrap();
        }

        let mut store = open_compacting(tmp.path(), 0);
        assert_eq!(store.replay_stats().snapshot_sequence, Some(2));
        assert_eq!(store.replay_stats().records, 2);
        assert_eq!(store.close_boundaries()[&Symbol::new("MSFT")], 10 * MIN);
        let w0 = Window::assign(0, WindowSize::DEFAULT);
        assert_eq!(store.get(&Symbol::new("AAPL"), &w0).unwrap().unwrap().count, 2);

        // numbering continues past the snapshot across a second restart
        store.upsert(agg("AAPL", 0, 3)).unwrap();
        store.sync().unwrap();
        drop(store);
        let store = open_compacting(tmp.path(), 0);
        assert_eq!(store.replay_stats().records, 3);
        assert_eq!(store.get(&Symbol::new("AAPL"), &w0).unwrap().unwrap().count, 3);
    }

    #[test]
    fn test_records_covered_by_snapshot_are_skipped() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = open_compacting(tmp.path(), 0);
            store.upsert(agg("AAPL", 0, 1)).unwrap();
            store.upsert(agg("AAPL", 0, 2)).unwrap();
            store.sync().unwrap();
            // crash after the snapshot landed but before the journal was pruned
            let snapshot = Snapshot::new(2, 0, &StoreImage::capture(&store.inner)).unwrap();
            SnapshotStore::new(tmp.path()).write(&snapshot).unwrap();
        }

        let store = open_compacting(tmp.path(), 0);
        assert_eq!(store.replay_stats().snapshot_sequence, Some(2));
        assert_eq!(store.replay_stats().records, 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_missing_records_after_snapshot_are_reported() {
        let tmp = TempDir::new().unwrap();
        {
            let mut store = open_compacting(tmp.path(), 0);
            store.upsert(agg("AAPL", 0, 1)).unwrap();
            store.compact().unwrap();
            store.upsert(agg("AAPL", 0, 2)).unwrap();
            store.upsert(agg("AAPL", 0, 3)).unwrap();
            store.sync().unwrap();
        }
        // lose the snapshot: the surviving journal starts at seq 2
        for (_, path) in SnapshotStore::new(tmp.path()).list().unwrap() {
            fs::remove_file(path).unwrap();
        }

        let result = JournaledStore::open(JournalConfig::new(tmp.path()));
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}

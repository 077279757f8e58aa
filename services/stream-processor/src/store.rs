//! Aggregate store
//!
//! Holds one aggregate per (symbol, window) plus, per symbol, the close
//! boundary that the late-arrival policy is rebuilt from after a restart.
//! Each lane owns its store exclusively; there is no locking.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use thiserror::Error;
use types::ids::Symbol;

use crate::aggregate::Aggregate;
use crate::partition::LaneId;
use crate::window::Window;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Aggregate store unavailable: {0}")]
    Unavailable(String),

    #[error("Aggregate store corrupt: {0}")]
    Corrupt(String),
}

/// Composite store key: symbol plus window start.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowKey {
    pub symbol: Symbol,
    pub window_start: i64,
}

impl WindowKey {
    pub fn new(symbol: &Symbol, window: &Window) -> Self {
        Self {
            symbol: symbol.clone(),
            window_start: window.start,
        }
    }
}

/// Keyed aggregate state behind a lane.
///
/// Implementations must apply a mutation completely or not at all: a
/// failed call leaves the visible state unchanged.
pub trait AggregateStore: Send {
    fn get(&self, symbol: &Symbol, window: &Window) -> Result<Option<Aggregate>, StoreError>;

    /// Insert or replace the aggregate for its own (symbol, window).
    ///
    /// Also raises the symbol's close boundary to the window start.
    fn upsert(&mut self, aggregate: Aggregate) -> Result<(), StoreError>;

    /// Persist an explicit close signal for `symbol` up to `closed_through`.
    fn record_close(&mut self, symbol: &Symbol, closed_through: i64) -> Result<(), StoreError>;

    /// Drop aggregates of `symbol` whose window ends at or before `horizon`.
    fn evict_through(&mut self, symbol: &Symbol, horizon: i64) -> Result<usize, StoreError>;

    /// Per-symbol close boundaries implied by the stored history.
    fn close_boundaries(&self) -> BTreeMap<Symbol, i64>;

    /// All aggregates in key order.
    fn aggregates(&self) -> Vec<Aggregate>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// SHA-256 over the full store contents in key order.
    fn checksum(&self) -> String;

    /// Make everything written so far durable.
    fn sync(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<S: AggregateStore + ?Sized> AggregateStore for Box<S> {
    fn get(&self, symbol: &Symbol, window: &Window) -> Result<Option<Aggregate>, StoreError> {
        (**self).get(symbol, window)
    }

    fn upsert(&mut self, aggregate: Aggregate) -> Result<(), StoreError> {
        (**self).upsert(aggregate)
    }

    fn record_close(&mut self, symbol: &Symbol, closed_through: i64) -> Result<(), StoreError> {
        (**self).record_close(symbol, closed_through)
    }

    fn evict_through(&mut self, symbol: &Symbol, horizon: i64) -> Result<usize, StoreError> {
        (**self).evict_through(symbol, horizon)
    }

    fn close_boundaries(&self) -> BTreeMap<Symbol, i64> {
        (**self).close_boundaries()
    }

    fn aggregates(&self) -> Vec<Aggregate> {
        (**self).aggregates()
    }

    fn len(&self) -> usize {
        (**self).len()
    }

    fn checksum(&self) -> String {
        (**self).checksum()
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        (**self).sync()
    }
}

/// Opens the store a lane will own. Called on the lane's own thread, so an
/// implementation may block on I/O while it recovers state.
pub trait StoreFactory: Send + Sync {
    fn open(&self, lane: &LaneId) -> Result<Box<dyn AggregateStore>, StoreError>;
}

/// Every lane starts cold with an empty in-memory store.
#[derive(Debug, Default, Clone, Copy)]
pub struct InMemoryStoreFactory;

impl StoreFactory for InMemoryStoreFactory {
    fn open(&self, _lane: &LaneId) -> Result<Box<dyn AggregateStore>, StoreError> {
        Ok(Box::new(InMemoryStore::new()))
    }
}

// ── In-memory store ─────────────────────────────────────────────────

/// Volatile store. A restart begins cold.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    aggregates: BTreeMap<WindowKey, Aggregate>,
    boundaries: BTreeMap<Symbol, i64>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many aggregates `evict_through(symbol, horizon)` would remove.
    pub fn evictable(&self, symbol: &Symbol, horizon: i64) -> usize {
        self.symbol_range(symbol)
            .filter(|(_, agg)| agg.window.end <= horizon)
            .count()
    }

    fn symbol_range<'a>(
        &'a self,
        symbol: &Symbol,
    ) -> impl Iterator<Item = (&'a WindowKey, &'a Aggregate)> + 'a {
        let from = WindowKey {
            symbol: symbol.clone(),
            window_start: i64::MIN,
        };
        let to = WindowKey {
            symbol: symbol.clone(),
            window_start: i64::MAX,
        };
        self.aggregates.range(from..=to)
    }

    fn raise_boundary(&mut self, symbol: &Symbol, to: i64) {
        let boundary = self.boundaries.entry(symbol.clone()).or_insert(to);
        if *boundary < to {
            *boundary = to;
        }
    }
}

impl AggregateStore for InMemoryStore {
    fn get(&self, symbol: &Symbol, window: &Window) -> Result<Option<Aggregate>, StoreError> {
        Ok(self.aggregates.get(&WindowKey::new(symbol, window)).cloned())
    }

    fn upsert(&mut self, aggregate: Aggregate) -> Result<(), StoreError> {
        self.raise_boundary(&aggregate.symbol, aggregate.window.start);
        self.aggregates
            .insert(WindowKey::new(&aggregate.symbol, &aggregate.window), aggregate);
        Ok(())
    }

    fn record_close(&mut self, symbol: &Symbol, closed_through: i64) -> Result<(), StoreError> {
        self.raise_boundary(symbol, closed_through);
        Ok(())
    }

    fn evict_through(&mut self, symbol: &Symbol, horizon: i64) -> Result<usize, StoreError> {
        let expired: Vec<WindowKey> = self
            .symbol_range(symbol)
            .filter(|(_, agg)| agg.window.end <= horizon)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.aggregates.remove(key);
        }
        Ok(expired.len())
    }

    fn close_boundaries(&self) -> BTreeMap<Symbol, i64> {
        self.boundaries.clone()
    }

    fn aggregates(&self) -> Vec<Aggregate> {
        self.aggregates.values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.aggregates.len()
    }

    fn checksum(&self) -> String {
        compute_store_checksum(&self.aggregates, &self.boundaries)
    }
}

fn compute_store_checksum(
    aggregates: &BTreeMap<WindowKey, Aggregate>,
    boundaries: &BTreeMap<Symbol, i64>,
) -> String {
    let mut hasher = Sha256::new();

    for agg in aggregates.values() {
        hasher.update(agg.symbol.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(agg.window.start.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(agg.window.end.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(agg.count.to_string().as_bytes());
        hasher.update(b",");
        hasher.update(agg.total_volume.to_string().as_bytes());
        hasher.update(b",");
        hasher.update(agg.average_price.normalize().to_string().as_bytes());
        hasher.update(b";");
    }
    hasher.update(b"===");
    for (symbol, boundary) in boundaries {
        hasher.update(symbol.as_str().as_bytes());
        hasher.update(b"@");
        hasher.update(boundary.to_string().as_bytes());
        hasher.update(b";");
    }

    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowSize;
    use rust_decimal::Decimal;

    const MIN: i64 = 60_000;

    fn agg(symbol: &str, ts: i64, count: u64) -> Aggregate {
        Aggregate {
            symbol: Symbol::new(symbol),
            window: Window::assign(ts, WindowSize::DEFAULT),
            count,
            total_volume: count * 10,
            average_price: Decimal::new(10_050, 2),
        }
    }

    #[test]
    fn test_get_absent() {
        let store = InMemoryStore::new();
        let w = Window::assign(0, WindowSize::DEFAULT);
        assert_eq!(store.get(&Symbol::new("AAPL"), &w).unwrap(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_is_last_write_wins() {
        let mut store = InMemoryStore::new();
        store.upsert(agg("AAPL", 0, 1)).unwrap();
        store.upsert(agg("AAPL", 0, 2)).unwrap();

        let got = store
            .get(&Symbol::new("AAPL"), &Window::assign(0, WindowSize::DEFAULT))
            .unwrap()
            .unwrap();
        assert_eq!(got.count, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_keys_are_isolated() {
        let mut store = InMemoryStore::new();
        store.upsert(agg("AAPL", 0, 1)).unwrap();
        store.upsert(agg("GOOGL", 0, 3)).unwrap();
        store.upsert(agg("AAPL", 5 * MIN, 7)).unwrap();

        assert_eq!(store.len(), 3);
        let w0 = Window::assign(0, WindowSize::DEFAULT);
        assert_eq!(store.get(&Symbol::new("AAPL"), &w0).unwrap().unwrap().count, 1);
        assert_eq!(store.get(&Symbol::new("GOOGL"), &w0).unwrap().unwrap().count, 3);
    }

    #[test]
    fn test_boundaries_follow_upserts_and_closes() {
        let mut store = InMemoryStore::new();
        store.upsert(agg("AAPL", 5 * MIN, 1)).unwrap();
        store.upsert(agg("AAPL", 0, 1)).unwrap();
        store.record_close(&Symbol::new("GOOGL"), 42).unwrap();
        store.record_close(&Symbol::new("GOOGL"), 7).unwrap();

        let boundaries = store.close_boundaries();
        assert_eq!(boundaries[&Symbol::new("AAPL")], 5 * MIN);
        assert_eq!(boundaries[&Symbol::new("GOOGL")], 42);
    }

    #[test]
    fn test_evict_through_only_touches_symbol_and_horizon() {
        let mut store = InMemoryStore::new();
        store.upsert(agg("AAPL", 0, 1)).unwrap();
        store.upsert(agg("AAPL", 5 * MIN, 1)).unwrap();
        store.upsert(agg("AAPL", 10 * MIN, 1)).unwrap();
        store.upsert(agg("GOOGL", 0, 1)).unwrap();

        assert_eq!(store.evictable(&Symbol::new("AAPL"), 10 * MIN), 2);
        assert_eq!(store.evict_through(&Symbol::new("AAPL"), 10 * MIN).unwrap(), 2);
        assert_eq!(store.len(), 2);
        let w0 = Window::assign(0, WindowSize::DEFAULT);
        assert!(store.get(&Symbol::new("GOOGL"), &w0).unwrap().is_some());
        assert_eq!(store.evict_through(&Symbol::new("AAPL"), 10 * MIN).unwrap(), 0);
    }

    #[test]
    fn test_checksum_tracks_contents() {
        let mut a = InMemoryStore::new();
        let mut b = InMemoryStore::new();
        assert_eq!(a.checksum(), b.checksum());

        a.upsert(agg("AAPL", 0, 1)).unwrap();
        assert_ne!(a.checksum(), b.checksum());

        b.upsert(agg("AAPL", 0, 1)).unwrap();
        assert_eq!(a.checksum(), b.checksum());
        assert_eq!(a.checksum().len(), 64);
    }

    #[test]
    fn test_aggregates_in_key_order() {
        let mut store = InMemoryStore::new();
        store.upsert(agg("MSFT", 0, 1)).unwrap();
        store.upsert(agg("AAPL", 5 * MIN, 1)).unwrap();
        store.upsert(agg("AAPL", 0, 1)).unwrap();

        let order: Vec<(String, i64)> = store
            .aggregates()
            .into_iter()
            .map(|a| (a.symbol.to_string(), a.window.start))
            .collect();
        assert_eq!(
            order,
            vec![("AAPL".into(), 0), ("AAPL".into(), 5 * MIN), ("MSFT".into(), 0)]
        );
    }

    #[test]
    fn test_boxed_store_delegates() {
        let mut store: Box<dyn AggregateStore> = Box::new(InMemoryStore::new());
        store.upsert(agg("AAPL", 0, 1)).unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.sync().is_ok());
    }
}

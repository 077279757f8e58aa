//! Aggregation engine
//!
//! Per tick: assign window → late check → store lookup → combine → store
//! upsert → snapshot. A window moves from open to closed when a tick for a
//! later window of the same symbol is accepted, or on an explicit close
//! signal. Nothing here is driven by wall-clock time.
//!
//! The engine is synchronous and owned by exactly one lane thread.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};
use types::ids::Symbol;
use types::snapshot::AveragedStockPrice;
use types::tick::StockTick;

use crate::aggregate::combine;
use crate::error::EngineError;
use crate::late::LatePolicy;
use crate::metrics::ProcessorMetrics;
use crate::store::AggregateStore;
use crate::window::{Window, WindowSize};

/// Engine parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub window_size: WindowSize,
    /// Closed windows older than this (relative to the close boundary) are
    /// evicted.
    pub retention: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_size: WindowSize::DEFAULT,
            retention: Duration::from_secs(3600),
        }
    }
}

/// Result of processing one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The tick was folded in; this is the updated snapshot to publish.
    Accepted(AveragedStockPrice),
    /// The tick's window was already closed. Nothing changed.
    Late {
        symbol: Symbol,
        window: Window,
        closed_through: i64,
    },
}

impl Outcome {
    pub fn snapshot(&self) -> Option<&AveragedStockPrice> {
        match self {
            Outcome::Accepted(snapshot) => Some(snapshot),
            Outcome::Late { .. } => None,
        }
    }

    pub fn is_late(&self) -> bool {
        matches!(self, Outcome::Late { .. })
    }
}

pub struct AggregationEngine<S> {
    store: S,
    policy: LatePolicy,
    window_size: WindowSize,
    retention_millis: i64,
    metrics: Arc<ProcessorMetrics>,
}

impl<S: AggregateStore> AggregationEngine<S> {
    /// Build an engine over `store`, restoring the late policy from it.
    pub fn new(store: S, config: EngineConfig, metrics: Arc<ProcessorMetrics>) -> Self {
        let policy = LatePolicy::from_boundaries(store.close_boundaries());
        if !store.is_empty() || !policy.boundaries().is_empty() {
            info!(
                aggregates = store.len(),
                symbols = policy.boundaries().len(),
                "Engine restored from store"
            );
        }
        Self {
            store,
            policy,
            window_size: config.window_size,
            retention_millis: i64::try_from(config.retention.as_millis()).unwrap_or(i64::MAX),
            metrics,
        }
    }

    /// Fold one tick in.
    ///
    /// The store has committed the new aggregate before this returns
    /// `Accepted`; emission is the caller's job.
    pub fn process(&mut self, tick: &StockTick) -> Result<Outcome, EngineError> {
        let started = Instant::now();
        let window = Window::assign(tick.timestamp_millis(), self.window_size);

        if !self.policy.is_acceptable(&tick.symbol, &window) {
            let closed_through = self.policy.boundary(&tick.symbol).unwrap_or(i64::MIN);
            self.metrics.record_late();
            debug!(
                symbol = %tick.symbol,
                window_start = window.start,
                closed_through,
                "Dropping late tick"
            );
            return Ok(Outcome::Late {
                symbol: tick.symbol.clone(),
                window,
                closed_through,
            });
        }

        let existing = self
            .store
            .get(&tick.symbol, &window)
            .map_err(|e| self.store_failure(e))?;
        let updated = combine(existing.as_ref(), tick, window).map_err(|e| {
            self.metrics.record_rejected();
            e
        })?;
        let snapshot = updated.to_snapshot();
        self.store.upsert(updated).map_err(|e| self.store_failure(e))?;

        if let Some(boundary) = self.policy.observe(&tick.symbol, &window) {
            self.evict_expired(&tick.symbol, boundary)?;
        }

        self.metrics
            .record_accepted(started.elapsed().as_nanos() as u64);
        debug!(
            symbol = %snapshot.symbol,
            window_start = window.start,
            count = snapshot.count,
            average_price = %snapshot.average_price,
            total_volume = snapshot.total_volume,
            "Aggregate updated"
        );
        Ok(Outcome::Accepted(snapshot))
    }

    /// Close every window of `symbol` ending at or before `instant_millis`.
    ///
    /// Returns false if those windows were already closed.
    pub fn close_through(&mut self, symbol: &Symbol, instant_millis: i64) -> Result<bool, EngineError> {
        if !self.policy.would_advance(symbol, instant_millis) {
            return Ok(false);
        }
        self.store
            .record_close(symbol, instant_millis)
            .map_err(|e| self.store_failure(e))?;
        self.policy.close_through(symbol, instant_millis);
        self.metrics.record_close_signal();
        debug!(symbol = %symbol, closed_through = instant_millis, "Windows closed by signal");

        self.evict_expired(symbol, instant_millis)?;
        Ok(true)
    }

    /// Close `window` of `symbol` and everything before it.
    pub fn close_window(&mut self, symbol: &Symbol, window: &Window) -> Result<bool, EngineError> {
        self.close_through(symbol, window.end)
    }

    pub fn sync(&mut self) -> Result<(), EngineError> {
        self.store.sync().map_err(|e| self.store_failure(e))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn policy(&self) -> &LatePolicy {
        &self.policy
    }

    pub fn window_size(&self) -> WindowSize {
        self.window_size
    }

    // Horizon never exceeds the close boundary, so only closed windows go.
    fn evict_expired(&mut self, symbol: &Symbol, boundary: i64) -> Result<(), EngineError> {
        let horizon = boundary.saturating_sub(self.retention_millis);
        let evicted = self
            .store
            .evict_through(symbol, horizon)
            .map_err(|e| self.store_failure(e))?;
        if evicted > 0 {
            self.metrics.record_evicted(evicted);
            debug!(symbol = %symbol, horizon, evicted, "Evicted expired aggregates");
        }
        Ok(())
    }

    fn store_failure(&self, err: crate::store::StoreError) -> EngineError {
        self.metrics.record_store_failure();
        EngineError::Store(err)
    }
}

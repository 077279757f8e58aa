//! Observability for the stream processor
//!
//! One `ProcessorMetrics` is shared by every lane and the pipeline front
//! end. Counters are relaxed atomics; latency samples go through a bounded
//! tracker behind a mutex.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Core metrics for the stream processor.
pub struct ProcessorMetrics {
    // Intake
    pub ticks_received: AtomicU64,
    pub ticks_malformed: AtomicU64,

    // Engine
    pub ticks_accepted: AtomicU64,
    pub ticks_late: AtomicU64,
    pub ticks_rejected: AtomicU64,
    pub close_signals: AtomicU64,
    pub aggregates_evicted: AtomicU64,
    pub store_failures: AtomicU64,
    pub processing_ns: Mutex<LatencyTracker>,

    // Emission
    pub snapshots_emitted: AtomicU64,
    pub emission_retries: AtomicU64,
    pub emission_failures: AtomicU64,

    // Lanes
    pub lanes_running: AtomicU64,
    pub lanes_failed: AtomicU64,
    pub aggregates_recovered: AtomicU64,
}

impl ProcessorMetrics {
    pub fn new() -> Self {
        Self {
            ticks_received: AtomicU64::new(0),
            ticks_malformed: AtomicU64::new(0),
            ticks_accepted: AtomicU64::new(0),
            ticks_late: AtomicU64::new(0),
            ticks_rejected: AtomicU64::new(0),
            close_signals: AtomicU64::new(0),
            aggregates_evicted: AtomicU64::new(0),
            store_failures: AtomicU64::new(0),
            processing_ns: Mutex::new(LatencyTracker::new(1000)),
            snapshots_emitted: AtomicU64::new(0),
            emission_retries: AtomicU64::new(0),
            emission_failures: AtomicU64::new(0),
            lanes_running: AtomicU64::new(0),
            lanes_failed: AtomicU64::new(0),
            aggregates_recovered: AtomicU64::new(0),
        }
    }

    pub fn record_received(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.ticks_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an accepted tick and how long the engine spent on it.
    pub fn record_accepted(&self, latency_ns: u64) {
        self.ticks_accepted.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut tracker) = self.processing_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    pub fn record_late(&self) {
        self.ticks_late.fetch_add(1, Ordering::Relaxed);
    }

    /// A tick the engine could not fold in (arithmetic overflow).
    pub fn record_rejected(&self) {
        self.ticks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_close_signal(&self) {
        self.close_signals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evicted(&self, count: usize) {
        self.aggregates_evicted.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emitted(&self) {
        self.snapshots_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emission_retry(&self) {
        self.emission_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_emission_failure(&self) {
        self.emission_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lane_started(&self, recovered_aggregates: usize) {
        self.lanes_running.fetch_add(1, Ordering::Relaxed);
        self.aggregates_recovered
            .fetch_add(recovered_aggregates as u64, Ordering::Relaxed);
    }

    pub fn record_lane_stopped(&self, failed: bool) {
        self.lanes_running.fetch_sub(1, Ordering::Relaxed);
        if failed {
            self.lanes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Processing latency percentile (0-100) over recent samples.
    pub fn processing_percentile(&self, p: usize) -> Option<u64> {
        self.processing_ns.lock().ok()?.percentile(p)
    }

    /// Export metrics as a sorted map for exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let counters = [
            ("ticks_received", &self.ticks_received),
            ("ticks_malformed", &self.ticks_malformed),
            ("ticks_accepted", &self.ticks_accepted),
            ("ticks_late", &self.ticks_late),
            ("ticks_rejected", &self.ticks_rejected),
            ("close_signals", &self.close_signals),
            ("aggregates_evicted", &self.aggregates_evicted),
            ("store_failures", &self.store_failures),
            ("snapshots_emitted", &self.snapshots_emitted),
            ("emission_retries", &self.emission_retries),
            ("emission_failures", &self.emission_failures),
            ("lanes_running", &self.lanes_running),
            ("lanes_failed", &self.lanes_failed),
            ("aggregates_recovered", &self.aggregates_recovered),
        ];
        let mut m: BTreeMap<String, u64> = counters
            .iter()
            .map(|(name, value)| (name.to_string(), value.load(Ordering::Relaxed)))
            .collect();

        if let Ok(tracker) = self.processing_ns.lock() {
            for p in [50, 99] {
                if let Some(value) = tracker.percentile(p) {
                    m.insert(format!("processing_ns_p{}", p), value);
                }
            }
        }
        m
    }
}

impl Default for ProcessorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded window of latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Nearest-rank percentile (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_export() {
        let metrics = ProcessorMetrics::new();
        metrics.record_received();
        metrics.record_received();
        metrics.record_malformed();
        metrics.record_accepted(1_000);
        metrics.record_late();
        metrics.record_evicted(3);

        let m = metrics.export();
        assert_eq!(m["ticks_received"], 2);
        assert_eq!(m["ticks_malformed"], 1);
        assert_eq!(m["ticks_accepted"], 1);
        assert_eq!(m["ticks_late"], 1);
        assert_eq!(m["aggregates_evicted"], 3);
        assert_eq!(m["processing_ns_p50"], 1_000);
    }

    #[test]
    fn test_lane_gauges() {
        let metrics = ProcessorMetrics::new();
        metrics.record_lane_started(4);
        metrics.record_lane_started(0);
        metrics.record_lane_stopped(true);

        let m = metrics.export();
        assert_eq!(m["lanes_running"], 1);
        assert_eq!(m["lanes_failed"], 1);
        assert_eq!(m["aggregates_recovered"], 4);
    }

    #[test]
    fn test_latency_tracker_percentiles() {
        let mut tracker = LatencyTracker::new(100);
        assert_eq!(tracker.percentile(50), None);
        for v in 1..=100 {
            tracker.record(v);
        }
        assert_eq!(tracker.percentile(0), Some(1));
        assert_eq!(tracker.percentile(50), Some(50));
        assert_eq!(tracker.percentile(100), Some(100));
    }

    #[test]
    fn test_latency_tracker_is_bounded() {
        let mut tracker = LatencyTracker::new(3);
        for v in [100, 1, 2, 3] {
            tracker.record(v);
        }
        assert_eq!(tracker.len(), 3);
        assert_eq!(tracker.percentile(100), Some(3));
    }
}

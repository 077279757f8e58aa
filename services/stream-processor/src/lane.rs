//! Processing lanes
//!
//! A lane is one OS thread that owns one engine and its store. It drains a
//! bounded queue in arrival order, so every symbol routed to it has a single
//! writer. Emission happens on the lane thread right after the store commit.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use types::ids::Symbol;
use types::tick::StockTick;

use crate::engine::{AggregationEngine, EngineConfig, Outcome};
use crate::error::{EngineError, LaneError};
use crate::metrics::ProcessorMetrics;
use crate::partition::LaneId;
use crate::publisher::{publish_with_retry, ChangelogPublisher, RetryPolicy};
use crate::store::{AggregateStore, StoreError, StoreFactory};

/// Work item for a lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaneCommand {
    Tick(StockTick),
    CloseThrough { symbol: Symbol, instant_millis: i64 },
}

/// Final accounting of a lane that drained and stopped cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneReport {
    pub lane: LaneId,
    pub processed: u64,
    pub accepted: u64,
    pub late: u64,
    pub rejected: u64,
    pub stored_aggregates: usize,
    pub store_checksum: String,
}

/// Everything a lane thread needs besides its store.
#[derive(Clone)]
pub struct LaneContext {
    pub engine: EngineConfig,
    pub publisher: Arc<dyn ChangelogPublisher>,
    pub retry: RetryPolicy,
    pub metrics: Arc<ProcessorMetrics>,
    pub store_factory: Arc<dyn StoreFactory>,
}

/// Pipeline-side handle of a running lane.
pub struct LaneHandle {
    pub id: LaneId,
    sender: mpsc::Sender<LaneCommand>,
    join: JoinHandle<Result<LaneReport, LaneError>>,
}

impl LaneHandle {
    pub fn sender(&self) -> &mpsc::Sender<LaneCommand> {
        &self.sender
    }

    /// Whether the lane thread has stopped taking input.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Close the queue and wait for the lane to drain it. Blocks.
    pub fn join(self) -> Result<LaneReport, LaneError> {
        let LaneHandle { id, sender, join } = self;
        drop(sender);
        join.join()
            .unwrap_or_else(|_| Err(LaneError::Panicked { lane: id }))
    }
}

/// Start a lane thread.
///
/// The returned receiver resolves once the lane has opened (and recovered)
/// its store, with the number of aggregates it recovered.
pub fn spawn_lane(
    id: LaneId,
    capacity: usize,
    ctx: LaneContext,
) -> std::io::Result<(LaneHandle, oneshot::Receiver<Result<usize, StoreError>>)> {
    let (sender, receiver) = mpsc::channel(capacity.max(1));
    let (ready_tx, ready_rx) = oneshot::channel();

    let thread_id = id.clone();
    let join = thread::Builder::new()
        .name(id.to_string())
        .spawn(move || run_lane(thread_id, ctx, receiver, ready_tx))?;

    Ok((LaneHandle { id, sender, join }, ready_rx))
}

fn run_lane(
    id: LaneId,
    ctx: LaneContext,
    receiver: mpsc::Receiver<LaneCommand>,
    ready: oneshot::Sender<Result<usize, StoreError>>,
) -> Result<LaneReport, LaneError> {
    let store = match ctx.store_factory.open(&id) {
        Ok(store) => store,
        Err(source) => {
            error!(lane = %id, error = %source, "Lane failed to open its store");
            let _ = ready.send(Err(source.clone()));
            return Err(LaneError::Open { lane: id, source });
        }
    };
    let recovered = store.len();
    ctx.metrics.record_lane_started(recovered);
    let _ = ready.send(Ok(recovered));
    info!(lane = %id, recovered, "Lane started");

    let engine = AggregationEngine::new(store, ctx.engine, ctx.metrics.clone());
    let mut worker = LaneWorker {
        id: id.clone(),
        engine,
        publisher: ctx.publisher,
        retry: ctx.retry,
        metrics: ctx.metrics.clone(),
        stats: LaneStats::default(),
    };

    let result = worker.run(receiver);
    ctx.metrics.record_lane_stopped(result.is_err());
    match &result {
        Ok(report) => info!(
            lane = %id,
            processed = report.processed,
            accepted = report.accepted,
            late = report.late,
            aggregates = report.stored_aggregates,
            "Lane stopped"
        ),
        Err(err) => error!(lane = %id, error = %err, "Lane failed"),
    }
    result
}

#[derive(Debug, Default)]
struct LaneStats {
    processed: u64,
    accepted: u64,
    late: u64,
    rejected: u64,
}

struct LaneWorker<S> {
    id: LaneId,
    engine: AggregationEngine<S>,
    publisher: Arc<dyn ChangelogPublisher>,
    retry: RetryPolicy,
    metrics: Arc<ProcessorMetrics>,
    stats: LaneStats,
}

impl<S: AggregateStore> LaneWorker<S> {
    fn run(&mut self, mut receiver: mpsc::Receiver<LaneCommand>) -> Result<LaneReport, LaneError> {
        while let Some(command) = receiver.blocking_recv() {
            // Returning drops the receiver, which the pipeline sees as a
            // failed lane on its next send.
            self.handle(command)?;
        }

        self.engine.sync().map_err(|e| self.fatal(e))?;
        let store = self.engine.store();
        Ok(LaneReport {
            lane: self.id.clone(),
            processed: self.stats.processed,
            accepted: self.stats.accepted,
            late: self.stats.late,
            rejected: self.stats.rejected,
            stored_aggregates: store.len(),
            store_checksum: store.checksum(),
        })
    }

    fn handle(&mut self, command: LaneCommand) -> Result<(), LaneError> {
        match command {
            LaneCommand::Tick(tick) => {
                self.stats.processed += 1;
                match self.engine.process(&tick) {
                    Ok(Outcome::Accepted(snapshot)) => {
                        self.stats.accepted += 1;
                        publish_with_retry(self.publisher.as_ref(), &snapshot, &self.retry, &self.metrics)
                            .map_err(|source| LaneError::Emission {
                                lane: self.id.clone(),
                                source,
                            })?;
                    }
                    Ok(Outcome::Late { .. }) => self.stats.late += 1,
                    Err(EngineError::Overflow { symbol, window, field }) => {
                        self.stats.rejected += 1;
                        warn!(lane = %self.id, symbol = %symbol, window = %window, field, "Dropping tick that overflows its aggregate");
                    }
                    Err(err) => return Err(self.fatal(err)),
                }
            }
            LaneCommand::CloseThrough {
                symbol,
                instant_millis,
            } => {
                let advanced = self
                    .engine
                    .close_through(&symbol, instant_millis)
                    .map_err(|e| self.fatal(e))?;
                debug!(lane = %self.id, symbol = %symbol, instant_millis, advanced, "Close signal handled");
            }
        }
        Ok(())
    }

    fn fatal(&self, err: EngineError) -> LaneError {
        match err {
            EngineError::Store(source) => LaneError::Store {
                lane: self.id.clone(),
                source,
            },
            // Overflow is handled per tick and never escapes as fatal
            EngineError::Overflow { symbol, .. } => LaneError::Store {
                lane: self.id.clone(),
                source: StoreError::Corrupt(format!("aggregate overflow for {}", symbol)),
            },
        }
    }
}

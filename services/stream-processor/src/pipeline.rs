//! Ingest pipeline
//!
//! Decodes raw tick payloads, routes each tick to the lane that owns its
//! symbol and coordinates startup recovery and shutdown. The pipeline never
//! touches aggregate state itself.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::oneshot;
use tracing::{info, warn};
use types::errors::TickError;
use types::ids::Symbol;
use types::tick::StockTick;

use crate::changelog::JournaledStoreFactory;
use crate::config::ProcessorConfig;
use crate::engine::EngineConfig;
use crate::error::{LaneError, PipelineError};
use crate::lane::{spawn_lane, LaneCommand, LaneContext, LaneHandle, LaneReport};
use crate::manifest::ChangelogManifest;
use crate::metrics::ProcessorMetrics;
use crate::partition::{LaneId, Partitioner};
use crate::publisher::ChangelogPublisher;
use crate::store::{InMemoryStoreFactory, StoreError, StoreFactory};

/// What happened to one submitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Decoded and queued on this lane.
    Routed(LaneId),
    /// Could not be decoded; dropped.
    Malformed(TickError),
}

/// Outcome of a shutdown.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub lanes: Vec<LaneReport>,
    pub failures: Vec<LaneError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn processed(&self) -> u64 {
        self.lanes.iter().map(|l| l.processed).sum()
    }
}

pub struct Pipeline {
    partitioner: Partitioner,
    lanes: BTreeMap<LaneId, LaneHandle>,
    ctx: LaneContext,
    queue_capacity: usize,
    metrics: Arc<ProcessorMetrics>,
}

impl Pipeline {
    /// Start with the store the configuration asks for: a journaled store
    /// per lane under `changelog_dir`, or memory only.
    pub async fn start(
        config: ProcessorConfig,
        publisher: Arc<dyn ChangelogPublisher>,
        metrics: Arc<ProcessorMetrics>,
    ) -> Result<Self, PipelineError> {
        let factory: Arc<dyn StoreFactory> = match &config.changelog_dir {
            Some(dir) => Arc::new(
                JournaledStoreFactory::new(dir, config.journal_sync)
                    .with_snapshot_every(config.snapshot_every),
            ),
            None => Arc::new(InMemoryStoreFactory),
        };
        Self::start_with_factory(config, publisher, metrics, factory).await
    }

    /// Start with a caller-supplied store factory.
    ///
    /// Returns once every fixed lane has recovered its store.
    pub async fn start_with_factory(
        config: ProcessorConfig,
        publisher: Arc<dyn ChangelogPublisher>,
        metrics: Arc<ProcessorMetrics>,
        store_factory: Arc<dyn StoreFactory>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        if let Some(dir) = &config.changelog_dir {
            ChangelogManifest::for_config(&config).check_or_write(dir)?;
        }

        let mut pipeline = Self {
            partitioner: Partitioner::new(config.symbol_partitioning),
            lanes: BTreeMap::new(),
            ctx: LaneContext {
                engine: EngineConfig {
                    window_size: config.window_size,
                    retention: config.retention,
                },
                publisher,
                retry: config.retry.clone(),
                metrics: metrics.clone(),
                store_factory,
            },
            queue_capacity: config.lane_queue_capacity,
            metrics,
        };

        let mut recovered = 0;
        for lane in pipeline.partitioner.fixed_lanes() {
            recovered += pipeline.start_lane(lane).await?;
        }

        info!(
            partitioning = %config.symbol_partitioning,
            window_ms = config.window_size.as_millis(),
            lanes = pipeline.lanes.len(),
            recovered,
            durable = config.changelog_dir.is_some(),
            "Pipeline started"
        );
        Ok(pipeline)
    }

    /// Decode one raw payload and route it.
    ///
    /// Malformed payloads are counted and dropped; they are not an error.
    pub async fn submit(&mut self, payload: &[u8]) -> Result<Submitted, PipelineError> {
        self.metrics.record_received();
        match StockTick::decode(payload) {
            Ok(tick) => self.submit_tick(tick).await.map(Submitted::Routed),
            Err(err) => {
                self.metrics.record_malformed();
                warn!(error = %err, kind = err.label(), bytes = payload.len(), "Dropping malformed tick");
                Ok(Submitted::Malformed(err))
            }
        }
    }

    /// Route an already decoded tick. Waits while the lane queue is full.
    pub async fn submit_tick(&mut self, tick: StockTick) -> Result<LaneId, PipelineError> {
        let lane = self.partitioner.lane_for(&tick.symbol);
        self.send(&lane, LaneCommand::Tick(tick)).await?;
        Ok(lane)
    }

    /// Close every window of `symbol` ending at or before `instant_millis`.
    pub async fn close_through(
        &mut self,
        symbol: &Symbol,
        instant_millis: i64,
    ) -> Result<LaneId, PipelineError> {
        let lane = self.partitioner.lane_for(symbol);
        let command = LaneCommand::CloseThrough {
            symbol: symbol.clone(),
            instant_millis,
        };
        self.send(&lane, command).await?;
        Ok(lane)
    }

    pub fn lane_ids(&self) -> Vec<LaneId> {
        self.lanes.keys().cloned().collect()
    }

    pub fn metrics(&self) -> &Arc<ProcessorMetrics> {
        &self.metrics
    }

    /// Stop accepting input, let every lane drain its queue and collect
    /// their reports.
    pub async fn shutdown(self) -> ShutdownReport {
        info!(lanes = self.lanes.len(), "Pipeline shutting down");
        let mut report = ShutdownReport::default();
        for (id, handle) in self.lanes {
            let joined = tokio::task::spawn_blocking(move || handle.join()).await;
            match joined {
                Ok(Ok(lane)) => report.lanes.push(lane),
                Ok(Err(err)) => report.failures.push(err),
                Err(_) => report.failures.push(LaneError::Panicked { lane: id }),
            }
        }
        info!(
            processed = report.processed(),
            failed = report.failures.len(),
            "Pipeline stopped"
        );
        report
    }

    async fn send(&mut self, lane: &LaneId, command: LaneCommand) -> Result<(), PipelineError> {
        if !self.lanes.contains_key(lane) {
            self.start_lane(lane.clone()).await?;
        }
        let handle = self
            .lanes
            .get(lane)
            .ok_or_else(|| PipelineError::LaneFailed { lane: lane.clone() })?;
        handle
            .sender()
            .send(command)
            .await
            .map_err(|_| PipelineError::LaneFailed { lane: lane.clone() })
    }

    async fn start_lane(&mut self, lane: LaneId) -> Result<usize, PipelineError> {
        let (handle, ready) = spawn_lane(lane.clone(), self.queue_capacity, self.ctx.clone())
            .map_err(|source| PipelineError::Spawn {
                lane: lane.clone(),
                source,
            })?;
        let recovered = await_ready(&lane, ready).await?;
        self.lanes.insert(lane, handle);
        Ok(recovered)
    }
}

async fn await_ready(
    lane: &LaneId,
    ready: oneshot::Receiver<Result<usize, StoreError>>,
) -> Result<usize, PipelineError> {
    match ready.await {
        Ok(Ok(recovered)) => Ok(recovered),
        Ok(Err(source)) => Err(PipelineError::Recovery {
            lane: lane.clone(),
            source,
        }),
        Err(_) => Err(PipelineError::Recovery {
            lane: lane.clone(),
            source: StoreError::Unavailable("lane exited before reporting readiness".to_string()),
        }),
    }
}

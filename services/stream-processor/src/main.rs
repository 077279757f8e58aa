use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_simulator::{run_source, SimulatorConfig, TickGenerator};
use stream_processor::{
    BroadcastPublisher, Pipeline, ProcessorConfig, ProcessorMetrics, StartupOffsetPolicy,
};
use tokio::sync::{broadcast, mpsc};
use tracing_subscriber::EnvFilter;
use types::snapshot::AveragedStockPrice;

const METRICS_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_thread_names(true)
        .init();

    let config = ProcessorConfig::from_env().context("loading processor configuration")?;
    let sim_config = SimulatorConfig::from_env().context("loading simulator configuration")?;
    tracing::info!(
        version = stream_processor::SERVICE_VERSION,
        window_secs = config.window_size.as_duration().as_secs(),
        partitioning = %config.symbol_partitioning,
        startup_offset = ?config.startup_offset_policy,
        "Starting stream processor"
    );

    let relay = Arc::new(BroadcastPublisher::new(config.relay_buffer_size));
    let snapshots = relay.subscribe();
    let subscriber = tokio::spawn(log_snapshots(snapshots));

    let metrics = Arc::new(ProcessorMetrics::new());
    let backlog = match config.startup_offset_policy {
        StartupOffsetPolicy::Earliest => sim_config.backlog,
        StartupOffsetPolicy::Latest => 0,
    };
    let mut pipeline = Pipeline::start(config.clone(), relay.clone(), metrics.clone())
        .await
        .context("starting pipeline")?;

    let (tick_tx, mut tick_rx) = mpsc::channel::<Vec<u8>>(config.lane_queue_capacity);
    let generator = TickGenerator::new(&sim_config)?;
    let source = tokio::spawn(run_source(generator, sim_config.tick_interval, backlog, tick_tx));

    let mut report_interval = tokio::time::interval(METRICS_INTERVAL);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            payload = tick_rx.recv() => {
                let Some(payload) = payload else {
                    tracing::warn!("Tick source ended");
                    break;
                };
                if let Err(err) = pipeline.submit(&payload).await {
                    tracing::error!(error = %err, "Pipeline rejected input, stopping");
                    break;
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Shutdown requested");
                break;
            }
            _ = report_interval.tick() => {
                tracing::info!(metrics = ?metrics.export(), "Processor metrics");
            }
        }
    }

    // Closing the receiver stops the source
    drop(tick_rx);
    match source.await {
        Ok(Ok(delivered)) => tracing::info!(delivered, "Tick source finished"),
        Ok(Err(err)) => tracing::error!(error = %err, "Tick source failed"),
        Err(err) => tracing::error!(error = %err, "Tick source task panicked"),
    }

    let report = pipeline.shutdown().await;
    tracing::info!(metrics = ?metrics.export(), "Final metrics");
    drop(relay);
    subscriber.abort();

    if !report.is_clean() {
        for failure in &report.failures {
            tracing::error!(lane = %failure.lane(), error = %failure, "Lane ended with error");
        }
        anyhow::bail!("{} lane(s) failed", report.failures.len());
    }
    Ok(())
}

async fn log_snapshots(mut snapshots: broadcast::Receiver<AveragedStockPrice>) {
    loop {
        match snapshots.recv().await {
            Ok(snapshot) => tracing::debug!(
                symbol = %snapshot.symbol,
                average_price = %snapshot.average_price,
                total_volume = snapshot.total_volume,
                count = snapshot.count,
                window_start = %snapshot.window_start,
                "Snapshot"
            ),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Snapshot subscriber lagging")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

//! Async tick emitter
//!
//! Pushes the historical backlog first, then one live tick per interval,
//! encoded in the wire format. Stops when the receiving side goes away.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::config::SimulatorError;
use crate::generator::TickGenerator;

/// Emit `backlog` historical ticks, then live ticks every `tick_interval`.
///
/// Returns the number of payloads delivered once `out` is closed.
pub async fn run_source(
    mut generator: TickGenerator,
    tick_interval: Duration,
    backlog: usize,
    out: mpsc::Sender<Vec<u8>>,
) -> Result<u64, SimulatorError> {
    let spacing_ms = i64::try_from(tick_interval.as_millis()).unwrap_or(i64::MAX);
    let mut delivered = 0u64;

    if backlog > 0 {
        let history = generator.backlog(backlog, Utc::now(), spacing_ms)?;
        for tick in history {
            if out.send(tick.to_json_bytes()?).await.is_err() {
                info!(delivered, "Tick source stopped during backlog");
                return Ok(delivered);
            }
            delivered += 1;
        }
        info!(backlog, "Backlog emitted");
    }

    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = out.closed() => break,
            _ = ticker.tick() => {
                let tick = generator.next_tick(Utc::now())?;
                debug!(symbol = %tick.symbol, price = %tick.price, volume = tick.volume, "Tick generated");
                if out.send(tick.to_json_bytes()?).await.is_err() {
                    break;
                }
                delivered += 1;
            }
        }
    }

    info!(delivered, "Tick source stopped");
    Ok(delivered)
}

//! Changelog publishing
//!
//! Every accepted tick produces one snapshot, handed to a
//! `ChangelogPublisher` after the store has committed the mutation. Retrying
//! a failed publish never touches the store again.

use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use types::snapshot::AveragedStockPrice;

use crate::metrics::ProcessorMetrics;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Worth retrying (e.g. a full queue).
    #[error("Transient publish failure: {0}")]
    Transient(String),

    /// The sink is gone for good.
    #[error("Publisher closed: {0}")]
    Closed(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmissionError {
    #[error("Emission failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: PublishError },

    #[error("Emission rejected: {0}")]
    Rejected(PublishError),
}

/// Sink for aggregate snapshots. Shared by every lane.
pub trait ChangelogPublisher: Send + Sync {
    fn publish(&self, snapshot: &AveragedStockPrice) -> Result<(), PublishError>;
}

// ── Broadcast relay ─────────────────────────────────────────────────

/// Fans snapshots out to any number of in-process subscribers.
///
/// Having no subscribers is not an error; the snapshot is simply not
/// observed. Subscribers that fall behind lose the oldest snapshots.
pub struct BroadcastPublisher {
    sender: broadcast::Sender<AveragedStockPrice>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AveragedStockPrice> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl ChangelogPublisher for BroadcastPublisher {
    fn publish(&self, snapshot: &AveragedStockPrice) -> Result<(), PublishError> {
        // Err only means nobody is listening right now
        let _ = self.sender.send(snapshot.clone());
        Ok(())
    }
}

// ── Bounded channel ─────────────────────────────────────────────────

/// Hands snapshots to a single downstream consumer over a bounded queue.
pub struct ChannelPublisher {
    sender: mpsc::Sender<AveragedStockPrice>,
}

impl ChannelPublisher {
    pub fn new(sender: mpsc::Sender<AveragedStockPrice>) -> Self {
        Self { sender }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<AveragedStockPrice>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl ChangelogPublisher for ChannelPublisher {
    fn publish(&self, snapshot: &AveragedStockPrice) -> Result<(), PublishError> {
        self.sender.try_send(snapshot.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                PublishError::Transient("downstream queue full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                PublishError::Closed("downstream receiver dropped".to_string())
            }
        })
    }
}

// ── Retry ───────────────────────────────────────────────────────────

/// Exponential backoff for transient publish failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, given `attempt` failures so far.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Publish one snapshot, retrying transient failures with backoff.
///
/// Blocks the calling thread while backing off. Returns the number of
/// attempts it took.
pub fn publish_with_retry(
    publisher: &dyn ChangelogPublisher,
    snapshot: &AveragedStockPrice,
    policy: &RetryPolicy,
    metrics: &ProcessorMetrics,
) -> Result<u32, EmissionError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match publisher.publish(snapshot) {
            Ok(()) => {
                metrics.record_emitted();
                return Ok(attempt);
            }
            Err(err @ PublishError::Closed(_)) => {
                metrics.record_emission_failure();
                return Err(EmissionError::Rejected(err));
            }
            Err(err) if attempt >= max_attempts => {
                metrics.record_emission_failure();
                return Err(EmissionError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            }
            Err(err) => {
                let delay = policy.backoff(attempt);
                warn!(
                    symbol = %snapshot.symbol,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Snapshot publish failed, retrying"
                );
                metrics.record_emission_retry();
                thread::sleep(delay);
                debug!(symbol = %snapshot.symbol, attempt = attempt + 1, "Retrying publish");
            }
        }
    }
}

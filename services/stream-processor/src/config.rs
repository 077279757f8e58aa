//! Processor configuration
//!
//! One typed structure, validated once at startup. Values come from the
//! environment in the binary and are built directly in tests.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use persistence::SyncPolicy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::changelog::DEFAULT_SNAPSHOT_EVERY;
use crate::partition::{PartitioningMode, SymbolPartitioning};
use crate::publisher::RetryPolicy;
use crate::window::WindowSize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("Changelog at {dir:?} was written with {found}, refusing to open with {configured}")]
    IncompatibleChangelog {
        dir: PathBuf,
        found: String,
        configured: String,
    },

    #[error("Changelog manifest error: {0}")]
    Manifest(String),
}

/// Where the tick source starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupOffsetPolicy {
    /// Replay everything the source still has.
    #[default]
    Earliest,
    /// Only ticks produced from now on.
    Latest,
}

impl FromStr for StartupOffsetPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "earliest" => Ok(StartupOffsetPolicy::Earliest),
            "latest" => Ok(StartupOffsetPolicy::Latest),
            other => Err(format!("expected earliest or latest, got {:?}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub window_size: WindowSize,
    pub symbol_partitioning: SymbolPartitioning,
    pub startup_offset_policy: StartupOffsetPolicy,
    /// How long a closed window is kept before eviction.
    pub retention: Duration,
    /// Bound of each lane's input queue.
    pub lane_queue_capacity: usize,
    /// Root of the durable changelog. `None` runs in memory only.
    pub changelog_dir: Option<PathBuf>,
    pub journal_sync: SyncPolicy,
    /// Journal records between changelog snapshots. Zero disables them.
    pub snapshot_every: u64,
    pub retry: RetryPolicy,
    /// Capacity of the broadcast relay in the binary.
    pub relay_buffer_size: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            window_size: WindowSize::DEFAULT,
            symbol_partitioning: SymbolPartitioning::default(),
            startup_offset_policy: StartupOffsetPolicy::Earliest,
            retention: Duration::from_secs(3600),
            lane_queue_capacity: 10_000,
            changelog_dir: None,
            journal_sync: SyncPolicy::EveryN(64),
            snapshot_every: DEFAULT_SNAPSHOT_EVERY,
            retry: RetryPolicy::default(),
            relay_buffer_size: 10_000,
        }
    }
}

impl ProcessorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let SymbolPartitioning::Hashed { lanes: 0 } = self.symbol_partitioning {
            return Err(ConfigError::Zero("LANES"));
        }
        if self.lane_queue_capacity == 0 {
            return Err(ConfigError::Zero("LANE_QUEUE_CAPACITY"));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Zero("EMIT_MAX_ATTEMPTS"));
        }
        if self.relay_buffer_size == 0 {
            return Err(ConfigError::Zero("RELAY_BUFFER_SIZE"));
        }
        if i64::try_from(self.retention.as_millis()).is_err() {
            return Err(ConfigError::Invalid {
                key: "RETENTION_SECS",
                value: self.retention.as_secs().to_string(),
                reason: "too large".to_string(),
            });
        }
        Ok(())
    }

    pub fn retention_millis(&self) -> i64 {
        i64::try_from(self.retention.as_millis()).unwrap_or(i64::MAX)
    }

    /// Load from the process environment, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let window_size = match lookup("WINDOW_SIZE_SECS") {
            Some(raw) => {
                let secs: u64 = parse("WINDOW_SIZE_SECS", &raw)?;
                WindowSize::from_secs(secs).ok_or(ConfigError::Zero("WINDOW_SIZE_SECS"))?
            }
            None => defaults.window_size,
        };

        let lanes: usize = parse_or(&lookup, "LANES", 4)?;
        let mode: PartitioningMode = parse_or(&lookup, "PARTITIONING", PartitioningMode::Hashed)?;
        let symbol_partitioning = match mode {
            PartitioningMode::Hashed => SymbolPartitioning::Hashed { lanes },
            PartitioningMode::PerSymbol => SymbolPartitioning::PerSymbol,
        };

        let journal_sync = match parse_or::<usize, _>(&lookup, "JOURNAL_SYNC_EVERY", 64)? {
            0 => SyncPolicy::Manual,
            1 => SyncPolicy::EveryWrite,
            n => SyncPolicy::EveryN(n),
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "EMIT_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
            initial_backoff: Duration::from_millis(parse_or(&lookup, "EMIT_BACKOFF_MS", 50)?),
            max_backoff: defaults.retry.max_backoff,
        };

        let config = Self {
            window_size,
            symbol_partitioning,
            startup_offset_policy: parse_or(
                &lookup,
                "STARTUP_OFFSET",
                defaults.startup_offset_policy,
            )?,
            retention: Duration::from_secs(parse_or(&lookup, "RETENTION_SECS", 3600)?),
            lane_queue_capacity: parse_or(
                &lookup,
                "LANE_QUEUE_CAPACITY",
                defaults.lane_queue_capacity,
            )?,
            changelog_dir: lookup("CHANGELOG_DIR")
                .filter(|dir| !dir.trim().is_empty())
                .map(PathBuf::from),
            journal_sync,
            snapshot_every: parse_or(&lookup, "SNAPSHOT_EVERY", defaults.snapshot_every)?,
            retry,
            relay_buffer_size: parse_or(&lookup, "RELAY_BUFFER_SIZE", defaults.relay_buffer_size)?,
        };
        config.validate()?;
        Ok(config)
    }
}

fn parse<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse(key, &raw),
        None => Ok(default),
    }
}

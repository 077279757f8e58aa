//! Simulator configuration

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use types::errors::TickError;
use types::ids::Symbol;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimulatorError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Config {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("At least one symbol is required")]
    NoSymbols,

    #[error(transparent)]
    Tick(#[from] TickError),
}

pub const DEFAULT_SYMBOLS: &[&str] = &["AAPL", "GOOGL", "MSFT", "AMZN", "TSLA", "META", "NVDA", "JPM"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub symbols: Vec<Symbol>,
    /// Spacing between live ticks, and between backlog ticks in event time.
    pub tick_interval: Duration,
    pub seed: u64,
    /// Historical ticks emitted before live ones.
    pub backlog: usize,
    /// Largest single-step price move, in basis points.
    pub max_step_bps: u32,
    pub max_volume: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            symbols: DEFAULT_SYMBOLS.iter().map(|s| Symbol::new(*s)).collect(),
            tick_interval: Duration::from_millis(500),
            seed: 42,
            backlog: 200,
            max_step_bps: 25,
            max_volume: 1_000,
        }
    }
}

impl SimulatorConfig {
    pub fn from_env() -> Result<Self, SimulatorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SimulatorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let symbols = match lookup("SYMBOLS") {
            Some(raw) => parse_symbols(&raw)?,
            None => defaults.symbols,
        };
        let interval_ms: u64 = parse_or(&lookup, "TICK_INTERVAL_MS", 500)?;
        if interval_ms == 0 {
            return Err(SimulatorError::Config {
                key: "TICK_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(Self {
            symbols,
            tick_interval: Duration::from_millis(interval_ms),
            seed: parse_or(&lookup, "SIM_SEED", defaults.seed)?,
            backlog: parse_or(&lookup, "SIM_BACKLOG", defaults.backlog)?,
            max_step_bps: defaults.max_step_bps,
            max_volume: defaults.max_volume,
        })
    }
}

/// Comma separated list; blanks are skipped, anything else must be a valid
/// symbol.
pub fn parse_symbols(raw: &str) -> Result<Vec<Symbol>, SimulatorError> {
    let mut symbols = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let symbol = Symbol::try_new(part).ok_or_else(|| SimulatorError::Config {
            key: "SYMBOLS",
            value: part.to_string(),
            reason: "not a valid symbol".to_string(),
        })?;
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        return Err(SimulatorError::NoSymbols);
    }
    Ok(symbols)
}

fn parse_or<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, SimulatorError>
where
    T: FromStr,
    T::Err: ToString,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| SimulatorError::Config {
            key,
            value: raw,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

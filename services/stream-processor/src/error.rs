//! Error types for the engine, lanes and pipeline

use thiserror::Error;
use types::ids::Symbol;

use crate::config::ConfigError;
use crate::partition::LaneId;
use crate::publisher::EmissionError;
use crate::store::StoreError;
use crate::window::Window;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Aggregate {field} overflow for {symbol} in window {window}")]
    Overflow {
        symbol: Symbol,
        window: Window,
        field: &'static str,
    },
}

/// Why a lane stopped processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaneError {
    #[error("Lane {lane} could not open its store: {source}")]
    Open { lane: LaneId, source: StoreError },

    #[error("Lane {lane} store failure: {source}")]
    Store { lane: LaneId, source: StoreError },

    #[error("Lane {lane} emission failure: {source}")]
    Emission { lane: LaneId, source: EmissionError },

    #[error("Lane {lane} panicked")]
    Panicked { lane: LaneId },
}

impl LaneError {
    pub fn lane(&self) -> &LaneId {
        match self {
            LaneError::Open { lane, .. }
            | LaneError::Store { lane, .. }
            | LaneError::Emission { lane, .. }
            | LaneError::Panicked { lane } => lane,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Lane {lane} has failed and no longer accepts input")]
    LaneFailed { lane: LaneId },

    #[error("Recovery of lane {lane} failed: {source}")]
    Recovery { lane: LaneId, source: StoreError },

    #[error("Failed to start lane {lane}: {source}")]
    Spawn {
        lane: LaneId,
        source: std::io::Error,
    },
}

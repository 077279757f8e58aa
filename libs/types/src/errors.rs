//! Error types for tick decoding and validation
//!
//! Every variant describes a malformed input message. None of them is fatal
//! to the pipeline: the offending message is dropped and counted.

use thiserror::Error;

/// A tick message that could not be turned into a valid `StockTick`
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TickError {
    #[error("Undecodable tick payload: {0}")]
    Decode(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("Invalid price: {0}")]
    InvalidPrice(String),

    #[error("Invalid volume: {0}")]
    InvalidVolume(i64),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Tick encoding failed: {0}")]
    Encode(String),
}

impl TickError {
    /// Short label for metrics and structured logs.
    pub fn label(&self) -> &'static str {
        match self {
            TickError::Decode(_) => "decode",
            TickError::MissingField(_) => "missing_field",
            TickError::InvalidSymbol(_) => "invalid_symbol",
            TickError::InvalidPrice(_) => "invalid_price",
            TickError::InvalidVolume(_) => "invalid_volume",
            TickError::InvalidTimestamp(_) => "invalid_timestamp",
            TickError::Encode(_) => "encode",
        }
    }
}

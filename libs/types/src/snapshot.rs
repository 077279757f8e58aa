//! Windowed aggregate snapshot: the pipeline's output message
//!
//! One snapshot is emitted for every accepted tick. Consumers see a
//! changelog of partial aggregates that converges on the final value once
//! the window closes.

use crate::ids::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Running statistics of one symbol over one tumbling window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AveragedStockPrice {
    pub symbol: Symbol,
    /// Mean of accepted prices, rounded to 2 dp after every update
    #[serde(with = "rust_decimal::serde::float")]
    pub average_price: Decimal,
    pub total_volume: u64,
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

impl AveragedStockPrice {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

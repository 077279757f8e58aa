//! Market tick: the pipeline's input message
//!
//! Ticks arrive as JSON objects `{symbol, price, volume, timestamp}`. The
//! decoder is deliberately lenient about how `timestamp` is written (RFC 3339
//! text or fractional epoch seconds) and strict about everything else.

use crate::errors::TickError;
use crate::ids::Symbol;
use crate::numeric::price_from_f64;
use crate::time::from_epoch_seconds_f64;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A single validated price observation for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTick")]
pub struct StockTick {
    pub symbol: Symbol,
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

impl StockTick {
    /// Build a tick, validating price and timestamp
    pub fn try_new(
        symbol: Symbol,
        price: Decimal,
        volume: u64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, TickError> {
        if price.is_sign_negative() && !price.is_zero() {
            return Err(TickError::InvalidPrice(price.to_string()));
        }
        if timestamp.timestamp_millis() < 0 {
            return Err(TickError::InvalidTimestamp(timestamp.to_rfc3339()));
        }
        Ok(Self {
            symbol,
            price,
            volume,
            timestamp,
        })
    }

    /// Decode and validate one wire message
    pub fn decode(bytes: &[u8]) -> Result<Self, TickError> {
        let raw: RawTick =
            serde_json::from_slice(bytes).map_err(|e| TickError::Decode(e.to_string()))?;
        Self::try_from(raw)
    }

    /// Encode to the wire format
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, TickError> {
        serde_json::to_vec(self).map_err(|e| TickError::Encode(e.to_string()))
    }

    /// Event time in Unix milliseconds
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

// ── Wire decoding ────────────────────────────────────────────

/// Loosely-typed view of a tick message. Every field is optional so a
/// missing field is reported as such rather than as a generic parse error.
#[derive(Debug, Deserialize)]
struct RawTick {
    symbol: Option<String>,
    price: Option<f64>,
    volume: Option<i64>,
    timestamp: Option<RawTimestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    EpochSeconds(f64),
}

impl RawTimestamp {
    fn resolve(self) -> Result<DateTime<Utc>, TickError> {
        match self {
            RawTimestamp::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| TickError::InvalidTimestamp(text)),
            RawTimestamp::EpochSeconds(seconds) => from_epoch_seconds_f64(seconds)
                .ok_or_else(|| TickError::InvalidTimestamp(seconds.to_string())),
        }
    }
}

impl TryFrom<RawTick> for StockTick {
    type Error = TickError;

    fn try_from(raw: RawTick) -> Result<Self, Self::Error> {
        let symbol = raw.symbol.ok_or(TickError::MissingField("symbol"))?;
        let price = raw.price.ok_or(TickError::MissingField("price"))?;
        let volume = raw.volume.ok_or(TickError::MissingField("volume"))?;
        let timestamp = raw.timestamp.ok_or(TickError::MissingField("timestamp"))?;

        let symbol = Symbol::try_from(symbol)?;
        if price < 0.0 {
            return Err(TickError::InvalidPrice(price.to_string()));
        }
        let price = price_from_f64(price).ok_or_else(|| TickError::InvalidPrice(price.to_string()))?;
        let volume = u64::try_from(volume).map_err(|_| TickError::InvalidVolume(volume))?;
        let timestamp = timestamp.resolve()?;

        StockTick::try_new(symbol, price, volume, timestamp)
    }
}

//! Incremental per-window aggregate
//!
//! The aggregate keeps a running mean rather than a running sum, so it is
//! emission-ready after every update. The mean is rounded to 2 dp on every
//! step, so the stored value can differ from the exact mean rounded once.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use types::ids::Symbol;
use types::numeric::round_price;
use types::snapshot::AveragedStockPrice;
use types::tick::StockTick;

use crate::error::EngineError;
use crate::window::Window;

/// Running statistics of one symbol over one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub symbol: Symbol,
    pub window: Window,
    pub count: u64,
    pub total_volume: u64,
    pub average_price: Decimal,
}

impl Aggregate {
    /// Read-only copy handed to publishers.
    pub fn to_snapshot(&self) -> AveragedStockPrice {
        AveragedStockPrice {
            symbol: self.symbol.clone(),
            average_price: self.average_price,
            total_volume: self.total_volume,
            count: self.count,
            window_start: self.window.start_time(),
            window_end: self.window.end_time(),
        }
    }
}

/// Fold one tick into the aggregate for its window.
///
/// `existing` must be the stored aggregate for `(tick.symbol, window)`, if
/// any. The first tick of a window never divides, so a zero count can't
/// reach the division.
pub fn combine(
    existing: Option<&Aggregate>,
    tick: &StockTick,
    window: Window,
) -> Result<Aggregate, EngineError> {
    let Some(existing) = existing else {
        return Ok(Aggregate {
            symbol: tick.symbol.clone(),
            window,
            count: 1,
            total_volume: tick.volume,
            average_price: round_price(tick.price),
        });
    };

    let overflow = |field: &'static str| EngineError::Overflow {
        symbol: tick.symbol.clone(),
        window,
        field,
    };

    let count = existing.count.checked_add(1).ok_or_else(|| overflow("count"))?;
    let total_volume = existing
        .total_volume
        .checked_add(tick.volume)
        .ok_or_else(|| overflow("total_volume"))?;
    let average_price = existing
        .average_price
        .checked_mul(Decimal::from(existing.count))
        .and_then(|sum| sum.checked_add(tick.price))
        .and_then(|sum| sum.checked_div(Decimal::from(count)))
        .map(round_price)
        .ok_or_else(|| overflow("average_price"))?;

    Ok(Aggregate {
        symbol: existing.symbol.clone(),
        window,
        count,
        total_volume,
        average_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowSize;
    use std::str::FromStr;
    use types::time::from_epoch_millis;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn tick(price: &str, volume: u64, ts: i64) -> StockTick {
        StockTick::try_new(Symbol::new("AAPL"), dec(price), volume, from_epoch_millis(ts)).unwrap()
    }

    fn window() -> Window {
        Window::assign(0, WindowSize::DEFAULT)
    }

    #[test]
    fn test_first_tick_creates_aggregate() {
        let agg = combine(None, &tick("100.00", 500, 0), window()).unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.total_volume, 500);
        assert_eq!(agg.average_price, dec("100.00"));
        assert_eq!(agg.window, window());
    }

    #[test]
    fn test_first_tick_price_is_rounded() {
        let agg = combine(None, &tick("10.005", 1, 0), window()).unwrap();
        assert_eq!(agg.average_price, dec("10.01"));

        // exact decimal midpoint: rounds up even though 1.005 has no exact
        // binary form and a float computation would land below it
        let agg = combine(None, &tick("1.005", 1, 0), window()).unwrap();
        assert_eq!(agg.average_price, dec("1.01"));
    }

    #[test]
    fn test_running_mean_update() {
        let first = combine(None, &tick("100.00", 500, 0), window()).unwrap();
        let second = combine(Some(&first), &tick("102.00", 300, 10_000), window()).unwrap();
        assert_eq!(second.count, 2);
        assert_eq!(second.total_volume, 800);
        assert_eq!(second.average_price, dec("101.00"));
    }

    #[test]
    fn test_rounding_applies_every_step() {
        let a = combine(None, &tick("1", 0, 0), window()).unwrap();
        let b = combine(Some(&a), &tick("2", 0, 1), window()).unwrap();
        assert_eq!(b.average_price, dec("1.50"));
        let c = combine(Some(&b), &tick("2", 0, 2), window()).unwrap();
        assert_eq!(c.average_price, dec("1.67"));

        // 0.01, 0.02, 0.01: the exact mean 0.0133.. would round to 0.01, but
        // the second step already rounded 0.015 up to 0.02 and the third
        // builds on it: (0.02*2 + 0.01)/3 = 0.0166.. -> 0.02
        let a = combine(None, &tick("0.01", 0, 0), window()).unwrap();
        let b = combine(Some(&a), &tick("0.02", 0, 1), window()).unwrap();
        assert_eq!(b.average_price, dec("0.02"));
        let c = combine(Some(&b), &tick("0.01", 0, 2), window()).unwrap();
        assert_eq!(c.average_price, dec("0.02"));
    }

    #[test]
    fn test_zero_volume_is_valid() {
        let agg = combine(None, &tick("50.00", 0, 0), window()).unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.total_volume, 0);
        assert_eq!(agg.average_price, dec("50.00"));
    }

    #[test]
    fn test_volume_overflow_is_reported() {
        let first = combine(None, &tick("1", u64::MAX, 0), window()).unwrap();
        let err = combine(Some(&first), &tick("1", 1, 1), window()).unwrap_err();
        assert!(matches!(err, EngineError::Overflow { field: "total_volume", .. }));
    }

    #[test]
    fn test_snapshot_carries_window_bounds() {
        let agg = combine(None, &tick("100.00", 500, 0), window()).unwrap();
        let snap = agg.to_snapshot();
        assert_eq!(snap.symbol, Symbol::new("AAPL"));
        assert_eq!(snap.count, 1);
        assert_eq!(snap.window_start.timestamp_millis(), 0);
        assert_eq!(snap.window_end.timestamp_millis(), 300_000);
    }
}

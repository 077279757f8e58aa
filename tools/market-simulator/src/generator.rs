//! Seeded random-walk tick generator
//!
//! Every symbol starts at a random price and moves by at most
//! `max_step_bps` per tick. Same seed, same symbols, same timestamps: same
//! ticks.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rust_decimal::Decimal;
use types::ids::Symbol;
use types::numeric::round_price;
use types::tick::StockTick;
use types::time::{from_epoch_millis, to_epoch_millis};

use crate::config::{SimulatorConfig, SimulatorError};

/// Lowest price the walk is allowed to reach.
const PRICE_FLOOR: Decimal = Decimal::from_parts(1, 0, 0, false, 2);

/// Round-robin position over a fixed symbol list.
#[derive(Debug, Clone)]
pub struct SymbolCursor {
    symbols: Vec<Symbol>,
    position: usize,
}

impl SymbolCursor {
    pub fn new(symbols: Vec<Symbol>) -> Result<Self, SimulatorError> {
        if symbols.is_empty() {
            return Err(SimulatorError::NoSymbols);
        }
        Ok(Self {
            symbols,
            position: 0,
        })
    }

    /// Current symbol, then advance.
    pub fn advance(&mut self) -> &Symbol {
        let index = self.position;
        self.position = (self.position + 1) % self.symbols.len();
        &self.symbols[index]
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }
}

pub struct TickGenerator {
    rng: ChaCha8Rng,
    cursor: SymbolCursor,
    prices: BTreeMap<Symbol, Decimal>,
    max_step_bps: u32,
    max_volume: u64,
    generated: u64,
}

impl TickGenerator {
    pub fn new(config: &SimulatorConfig) -> Result<Self, SimulatorError> {
        let cursor = SymbolCursor::new(config.symbols.clone())?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let prices = cursor
            .symbols()
            .iter()
            .map(|symbol| {
                let cents: i64 = rng.gen_range(5_000..=50_000);
                (symbol.clone(), Decimal::new(cents, 2))
            })
            .collect();
        Ok(Self {
            rng,
            cursor,
            prices,
            max_step_bps: config.max_step_bps,
            max_volume: config.max_volume.max(1),
            generated: 0,
        })
    }

    /// Next tick in round-robin order, stamped `timestamp`.
    pub fn next_tick(&mut self, timestamp: DateTime<Utc>) -> Result<StockTick, SimulatorError> {
        let symbol = self.cursor.advance().clone();
        let price = self.step_price(&symbol);
        let volume = self.rng.gen_range(1..=self.max_volume);
        self.generated += 1;
        Ok(StockTick::try_new(symbol, price, volume, timestamp)?)
    }

    /// `count` ticks spaced `spacing_ms` apart in event time, the last one
    /// stamped `end`.
    pub fn backlog(
        &mut self,
        count: usize,
        end: DateTime<Utc>,
        spacing_ms: i64,
    ) -> Result<Vec<StockTick>, SimulatorError> {
        let end_ms = to_epoch_millis(&end);
        let mut ticks = Vec::with_capacity(count);
        for i in 0..count {
            let remaining = (count - 1 - i) as i64;
            let ts = end_ms.saturating_sub(remaining.saturating_mul(spacing_ms)).max(0);
            ticks.push(self.next_tick(from_epoch_millis(ts))?);
        }
        Ok(ticks)
    }

    pub fn generated(&self) -> u64 {
        self.generated
    }

    pub fn last_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices.get(symbol).copied()
    }

    fn step_price(&mut self, symbol: &Symbol) -> Decimal {
        let max = self.max_step_bps as i64;
        let bps: i64 = if max == 0 { 0 } else { self.rng.gen_range(-max..=max) };
        let current = self.prices.get(symbol).copied().unwrap_or(Decimal::ONE_HUNDRED);
        let moved = current + current * Decimal::new(bps, 4);
        let next = round_price(moved).max(PRICE_FLOOR);
        self.prices.insert(symbol.clone(), next);
        next
    }
}

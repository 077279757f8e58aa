//! Synthetic Market Tick Source
//!
//! Deterministic stand-in for a live quote feed. Produces wire-format
//! `StockTick` messages from a seeded random walk per symbol, cycling through
//! symbols in a fixed round-robin order.
//!
//! # Modules
//! - `config`: Environment-driven simulator settings
//! - `generator`: Seeded random-walk tick generator and symbol cursor
//! - `source`: Async emitter feeding encoded ticks into a channel

pub mod config;
pub mod generator;
pub mod source;

pub use config::{SimulatorConfig, SimulatorError};
pub use generator::{SymbolCursor, TickGenerator};
pub use source::run_source;

/// Crate version constant
pub const VERSION: &str = "1.0.0";

//! Types library for the tick aggregation pipeline
//!
//! Shared, wire-level definitions used by the tick source, the stream
//! processor and downstream consumers. Everything that crosses a channel
//! boundary lives here so producers and consumers agree on one schema.
//!
//! # Modules
//! - `ids`: Symbol identifier
//! - `numeric`: Decimal price rounding
//! - `time`: Epoch-millisecond conversions
//! - `tick`: Raw market tick (input message) and its decoder
//! - `snapshot`: Windowed aggregate snapshot (output message)
//! - `errors`: Tick validation error taxonomy

pub mod errors;
pub mod ids;
pub mod numeric;
pub mod snapshot;
pub mod tick;
pub mod time;

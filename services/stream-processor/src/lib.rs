//! Stream Processor Service
//!
//! Consumes raw stock ticks and maintains, per symbol, a running average
//! price and total volume over fixed tumbling event-time windows. Every
//! accepted tick produces an updated snapshot on the changelog.
//!
//! # Architecture
//!
//! ```text
//!   raw tick payloads
//!          │
//!     ┌────▼─────┐
//!     │ Pipeline │  ← decode, drop malformed, route by symbol
//!     └────┬─────┘
//!    ┌─────┼──────────┐
//!  ┌─▼──┐┌─▼──┐    ┌──▼─┐
//!  │Lane││Lane│ …  │Lane│  ← one thread each, single writer per symbol
//!  └─┬──┘└─┬──┘    └──┬─┘
//!    │  Engine → Store (journal) → Publisher
//!    └─────┴────┬─────┘
//!          snapshots
//! ```
//!
//! # Guarantees
//! - Ticks for one symbol are processed in arrival order by one lane
//! - The store commits a mutation before its snapshot is published
//! - Late ticks for a closed window change nothing and emit nothing
//! - Journaled lanes recover aggregates and close boundaries on restart

pub mod aggregate;
pub mod changelog;
pub mod config;
pub mod engine;
pub mod error;
pub mod lane;
pub mod late;
pub mod manifest;
pub mod metrics;
pub mod partition;
pub mod pipeline;
pub mod publisher;
pub mod store;
pub mod window;

pub use aggregate::Aggregate;
pub use changelog::{JournaledStore, JournaledStoreFactory, ReplayStats, DEFAULT_SNAPSHOT_EVERY};
pub use config::{ConfigError, ProcessorConfig, StartupOffsetPolicy};
pub use engine::{AggregationEngine, EngineConfig, Outcome};
pub use error::{EngineError, LaneError, PipelineError};
pub use metrics::ProcessorMetrics;
pub use partition::{LaneId, SymbolPartitioning};
pub use pipeline::{Pipeline, ShutdownReport, Submitted};
pub use publisher::{BroadcastPublisher, ChangelogPublisher, ChannelPublisher, RetryPolicy};
pub use store::{AggregateStore, InMemoryStore, StoreError, StoreFactory};
pub use window::{Window, WindowSize};

// Service version
pub const SERVICE_VERSION: &str = "0.1.0";

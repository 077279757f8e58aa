//! Symbol → lane routing
//!
//! Every tick of one symbol goes to the same lane, so a symbol always has
//! exactly one writer. The mapping is stable across restarts, which lets a
//! lane find its own changelog again.

use std::fmt;
use std::str::FromStr;

use crc32c::crc32c;
use serde::{Deserialize, Serialize};
use types::ids::Symbol;

/// How symbols are spread over lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum SymbolPartitioning {
    /// A fixed number of lanes; symbol goes to `crc32c(symbol) % lanes`.
    Hashed { lanes: usize },
    /// One lane per symbol, started on first sight.
    PerSymbol,
}

impl Default for SymbolPartitioning {
    fn default() -> Self {
        SymbolPartitioning::Hashed { lanes: 4 }
    }
}

impl fmt::Display for SymbolPartitioning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolPartitioning::Hashed { lanes } => write!(f, "hashed({})", lanes),
            SymbolPartitioning::PerSymbol => write!(f, "per-symbol"),
        }
    }
}

/// Partitioning mode name without the lane count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitioningMode {
    Hashed,
    PerSymbol,
}

impl FromStr for PartitioningMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hashed" => Ok(PartitioningMode::Hashed),
            "per-symbol" | "per_symbol" => Ok(PartitioningMode::PerSymbol),
            other => Err(format!("unknown partitioning {:?}", other)),
        }
    }
}

/// Longest symbol prefix kept verbatim in a lane directory name.
pub const MAX_READABLE_DIR_CHARS: usize = 32;

/// Identity of one processing lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LaneId {
    Hashed(usize),
    Symbol(Symbol),
}

impl LaneId {
    /// File-system safe directory name for this lane's changelog.
    ///
    /// Symbol lanes keep the readable characters of the symbol and append a
    /// checksum of the raw symbol so that two symbols sanitizing to the same
    /// text still get distinct directories. The readable part is capped at
    /// [`MAX_READABLE_DIR_CHARS`].
    pub fn dir_name(&self) -> String {
        match self {
            LaneId::Hashed(index) => format!("lane-{:03}", index),
            LaneId::Symbol(symbol) => {
                let readable: String = symbol
                    .as_str()
                    .chars()
                    .take(MAX_READABLE_DIR_CHARS)
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect();
                format!("symbol-{}-{:08x}", readable, crc32c(symbol.as_str().as_bytes()))
            }
        }
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneId::Hashed(index) => write!(f, "lane-{:03}", index),
            LaneId::Symbol(symbol) => write!(f, "symbol-{}", symbol),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Partitioner {
    partitioning: SymbolPartitioning,
}

impl Partitioner {
    pub fn new(partitioning: SymbolPartitioning) -> Self {
        Self { partitioning }
    }

    pub fn lane_for(&self, symbol: &Symbol) -> LaneId {
        match self.partitioning {
            SymbolPartitioning::Hashed { lanes } => {
                let lanes = lanes.max(1);
                LaneId::Hashed(crc32c(symbol.as_str().as_bytes()) as usize % lanes)
            }
            SymbolPartitioning::PerSymbol => LaneId::Symbol(symbol.clone()),
        }
    }

    /// Lanes that exist from startup. Per-symbol lanes appear on demand.
    pub fn fixed_lanes(&self) -> Vec<LaneId> {
        match self.partitioning {
            SymbolPartitioning::Hashed { lanes } => (0..lanes).map(LaneId::Hashed).collect(),
            SymbolPartitioning::PerSymbol => Vec::new(),
        }
    }

    pub fn partitioning(&self) -> SymbolPartitioning {
        self.partitioning
    }
}

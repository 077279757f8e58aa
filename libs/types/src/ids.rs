//! Identifier types for pipeline entities
//!
//! A `Symbol` is the partition key of the whole pipeline: ticks are routed,
//! windowed and aggregated per symbol.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::TickError;

/// Instrument symbol (e.g. "AAPL", "BRK B")
///
/// Any non-empty string without control characters. Ordering is
/// lexicographic so maps keyed by symbol iterate deterministically.
/// Deserialization goes through the same check as [`Symbol::try_new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a new Symbol
    ///
    /// # Panics
    /// Panics if the symbol is empty or contains control characters
    pub fn new(symbol: impl Into<String>) -> Self {
        let s = symbol.into();
        assert!(Self::is_valid(&s), "Symbol must be non-empty and free of control characters");
        Self(s)
    }

    /// Try to create a Symbol, returning None if invalid
    pub fn try_new(symbol: impl Into<String>) -> Option<Self> {
        let s = symbol.into();
        if Self::is_valid(&s) {
            Some(Self(s))
        } else {
            None
        }
    }

    /// Get the symbol string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn is_valid(s: &str) -> bool {
        !s.is_empty() && !s.chars().any(char::is_control)
    }
}

impl TryFrom<String> for Symbol {
    type Error = TickError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if Self::is_valid(&value) {
            Ok(Self(value))
        } else {
            Err(TickError::InvalidSymbol(value))
        }
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

//! Late-arrival policy
//!
//! Per symbol, one boundary `closed_through`: every window whose end is at or
//! before it is closed and takes no further events. Accepting an event for
//! window W moves the boundary to W's start, which closes every earlier
//! window of that symbol. There is no grace period. Boundaries only move
//! forward.

use std::collections::BTreeMap;

use types::ids::Symbol;

use crate::window::Window;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LatePolicy {
    closed_through: BTreeMap<Symbol, i64>,
}

impl LatePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy restored from persisted boundaries.
    pub fn from_boundaries(closed_through: BTreeMap<Symbol, i64>) -> Self {
        Self { closed_through }
    }

    /// Whether `window` of `symbol` is still open.
    pub fn is_acceptable(&self, symbol: &Symbol, window: &Window) -> bool {
        match self.closed_through.get(symbol) {
            Some(boundary) => window.end > *boundary,
            None => true,
        }
    }

    /// Note an accepted event in `window`. Returns the new boundary if it moved.
    pub fn observe(&mut self, symbol: &Symbol, window: &Window) -> Option<i64> {
        self.close_through(symbol, window.start)
    }

    /// Close every window of `symbol` ending at or before `instant`.
    /// Returns the new boundary if it moved.
    pub fn close_through(&mut self, symbol: &Symbol, instant: i64) -> Option<i64> {
        match self.closed_through.get_mut(symbol) {
            Some(boundary) if *boundary >= instant => None,
            Some(boundary) => {
                *boundary = instant;
                Some(instant)
            }
            None => {
                self.closed_through.insert(symbol.clone(), instant);
                Some(instant)
            }
        }
    }

    /// Close `window` and everything before it.
    pub fn close_window(&mut self, symbol: &Symbol, window: &Window) -> Option<i64> {
        self.close_through(symbol, window.end)
    }

    /// Whether `close_through(symbol, instant)` would move the boundary.
    pub fn would_advance(&self, symbol: &Symbol, instant: i64) -> bool {
        self.closed_through
            .get(symbol)
            .map_or(true, |boundary| *boundary < instant)
    }

    pub fn boundary(&self, symbol: &Symbol) -> Option<i64> {
        self.closed_through.get(symbol).copied()
    }

    pub fn boundaries(&self) -> &BTreeMap<Symbol, i64> {
        &self.closed_through
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowSize;

    const MIN: i64 = 60_000;

    fn w(ts: i64) -> Window {
        Window::assign(ts, WindowSize::DEFAULT)
    }

    fn aapl() -> Symbol {
        Symbol::new("AAPL")
    }

    #[test]
    fn test_unknown_symbol_accepts_anything() {
        let policy = LatePolicy::new();
        assert!(policy.is_acceptable(&aapl(), &w(0)));
        assert_eq!(policy.boundary(&aapl()), None);
    }

    #[test]
    fn test_later_window_closes_earlier() {
        let mut policy = LatePolicy::new();
        assert_eq!(policy.observe(&aapl(), &w(4 * MIN + 59_000)), Some(0));
        assert!(policy.is_acceptable(&aapl(), &w(4 * MIN + 30_000)));

        assert_eq!(policy.observe(&aapl(), &w(5 * MIN + 30_000)), Some(5 * MIN));
        assert!(!policy.is_acceptable(&aapl(), &w(4 * MIN + 30_000)));
        assert!(policy.is_acceptable(&aapl(), &w(5 * MIN)));
        assert!(policy.is_acceptable(&aapl(), &w(20 * MIN)));
    }

    #[test]
    fn test_boundary_never_decreases() {
        let mut policy = LatePolicy::new();
        policy.observe(&aapl(), &w(10 * MIN));
        assert_eq!(policy.observe(&aapl(), &w(10 * MIN)), None);
        assert_eq!(policy.close_through(&aapl(), 3 * MIN), None);
        assert_eq!(policy.boundary(&aapl()), Some(10 * MIN));
    }

    #[test]
    fn test_symbols_are_independent() {
        let mut policy = LatePolicy::new();
        policy.observe(&aapl(), &w(30 * MIN));
        assert!(policy.is_acceptable(&Symbol::new("GOOGL"), &w(0)));
    }

    #[test]
    fn test_explicit_close() {
        let mut policy = LatePolicy::new();
        policy.observe(&aapl(), &w(0));
        assert!(policy.would_advance(&aapl(), 5 * MIN));
        assert_eq!(policy.close_window(&aapl(), &w(0)), Some(5 * MIN));
        assert!(!policy.is_acceptable(&aapl(), &w(0)));
        assert!(policy.is_acceptable(&aapl(), &w(5 * MIN)));
        assert!(!policy.would_advance(&aapl(), 5 * MIN));
    }

    #[test]
    fn test_restored_policy() {
        let mut boundaries = BTreeMap::new();
        boundaries.insert(aapl(), 5 * MIN);
        let policy = LatePolicy::from_boundaries(boundaries);
        assert!(!policy.is_acceptable(&aapl(), &w(0)));
        assert!(policy.is_acceptable(&aapl(), &w(5 * MIN)));
        assert_eq!(policy.boundaries().len(), 1);
    }
}

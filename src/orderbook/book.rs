//! Per-side sorted price ladders.
//!
//! Prices and sizes stay `Decimal` end to end; binary floats would break
//! exact upsert/delete semantics on the price keys.

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Side of the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Bid => "bid",
            Side::Ask => "ask",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price-level ladders for one symbol.
///
/// Bids sort descending (best = highest) by wrapping the key in `Reverse`;
/// asks sort ascending. Both maps therefore iterate best-first, which keeps
/// `top_n` and the band walks in wall detection uniform across sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedBook {
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderedBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert or remove one price level. Size zero removes the price if
    /// present (idempotent); a duplicate price overwrites.
    pub fn apply(&mut self, side: Side, price: Decimal, new_size: Decimal) {
        match side {
            Side::Bid => {
                if new_size.is_zero() {
                    self.bids.remove(&Reverse(price));
                } else {
                    self.bids.insert(Reverse(price), new_size);
                }
            }
            Side::Ask => {
                if new_size.is_zero() {
                    self.asks.remove(&price);
                } else {
                    self.asks.insert(price, new_size);
                }
            }
        }
    }

    /// Best resting level on a side: highest bid or lowest ask.
    pub fn best(&self, side: Side) -> Option<(Decimal, Decimal)> {
        match side {
            Side::Bid => self
                .bids
                .first_key_value()
                .map(|(Reverse(price), size)| (*price, *size)),
            Side::Ask => self
                .asks
                .first_key_value()
                .map(|(price, size)| (*price, *size)),
        }
    }

    /// Lazy walk of a side in sort order (best first).
    pub fn iter(&self, side: Side) -> Box<dyn Iterator<Item = (Decimal, Decimal)> + '_> {
        match side {
            Side::Bid => Box::new(
                self.bids
                    .iter()
                    .map(|(Reverse(price), size)| (*price, *size)),
            ),
            Side::Ask => Box::new(self.asks.iter().map(|(price, size)| (*price, *size))),
        }
    }

    /// Top `n` levels of a side in sort order.
    pub fn top_n(&self, side: Side, n: usize) -> Vec<(Decimal, Decimal)> {
        self.iter(side).take(n).collect()
    }

    /// Sum of the sizes on the top `max_levels` levels of a side.
    pub fn sum_volume(&self, side: Side, max_levels: usize) -> Decimal {
        self.iter(side)
            .take(max_levels)
            .map(|(_, size)| size)
            .sum()
    }

    /// Resting size at an exact price, if the level exists.
    pub fn level_size(&self, side: Side, price: Decimal) -> Option<Decimal> {
        match side {
            Side::Bid => self.bids.get(&Reverse(price)).copied(),
            Side::Ask => self.asks.get(&price).copied(),
        }
    }

    pub fn len(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids.len(),
            Side::Ask => self.asks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }

    /// True when both sides rest and the book is crossed or locked.
    pub fn is_crossed(&self) -> bool {
        match (self.best(Side::Bid), self.best(Side::Ask)) {
            (Some((bid, _)), Some((ask, _))) => bid >= ask,
            _ => false,
        }
    }
}

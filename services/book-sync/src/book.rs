//! Price level management for one side of a synchronized book
//!
//! Levels live in a `BTreeMap` keyed by price so iteration is deterministic
//! and duplicate prices are impossible. Bids iterate best-first (descending),
//! asks best-first (ascending).

use common::{Px, Qty, Side};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single `(price, quantity)` level
///
/// Serialized as a two element array of decimal strings, the shape the
/// exchanges use on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(Px, Qty)", into = "(Px, Qty)")]
pub struct Level {
    /// Level price
    pub price: Px,
    /// Total quantity resting at this price (zero means "delete" in an update)
    pub qty: Qty,
}

impl Level {
    /// Create a new level
    #[must_use]
    pub const fn new(price: Px, qty: Qty) -> Self {
        Self { price, qty }
    }
}

impl From<(Px, Qty)> for Level {
    fn from((price, qty): (Px, Qty)) -> Self {
        Self { price, qty }
    }
}

impl From<Level> for (Px, Qty) {
    fn from(level: Level) -> Self {
        (level.price, level.qty)
    }
}

/// One side of the order book (bid or ask)
///
/// Invariant: every stored quantity is strictly positive. Zero-quantity
/// changes delete the level instead of storing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceLevelBook {
    side: Side,
    levels: BTreeMap<Px, Qty>,
}

impl PriceLevelBook {
    /// Create a new empty side book
    #[must_use]
    pub const fn new(side: Side) -> Self {
        Self {
            side,
            levels: BTreeMap::new(),
        }
    }

    /// Which side this book holds
    #[must_use]
    pub const fn side(&self) -> Side {
        self.side
    }

    /// Number of price levels
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Check if side is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Quantity resting at `price`, if any
    #[must_use]
    pub fn get(&self, price: &Px) -> Option<Qty> {
        self.levels.get(price).copied()
    }

    /// Apply one level change: upsert a positive quantity, delete on zero
    ///
    /// Returns the quantity that was resting at the price before the change,
    /// which is what a caller needs to undo it. The stored key takes the
    /// scale of the latest change so checksums see the exchange's text.
    pub fn apply(&mut self, level: Level) -> Option<Qty> {
        let previous = self.levels.remove(&level.price);
        if level.qty.is_positive() {
            self.levels.insert(level.price, level.qty);
        }
        previous
    }

    /// Put a level back to a previously observed quantity
    pub fn restore(&mut self, price: Px, previous: Option<Qty>) {
        match previous {
            Some(qty) if qty.is_positive() => {
                self.levels.insert(price, qty);
            }
            _ => {
                self.levels.remove(&price);
            }
        }
    }

    /// Replace the whole side with snapshot levels
    ///
    /// Zero-quantity entries are skipped; a repeated price keeps the last
    /// quantity seen.
    pub fn replace<I>(&mut self, levels: I)
    where
        I: IntoIterator<Item = Level>,
    {
        self.levels.clear();
        for level in levels {
            if level.qty.is_positive() {
                self.levels.insert(level.price, level.qty);
            }
        }
    }

    /// Clear all levels
    pub fn clear(&mut self) {
        self.levels.clear();
    }

    /// Best level (highest bid / lowest ask)
    #[must_use]
    pub fn best(&self) -> Option<Level> {
        let entry = match self.side {
            Side::Bid => self.levels.iter().next_back(),
            Side::Ask => self.levels.iter().next(),
        };
        entry.map(|(price, qty)| Level::new(*price, *qty))
    }

    /// Iterate levels best-first
    pub fn iter(&self) -> impl Iterator<Item = Level> + '_ {
        let (ascending, descending) = match self.side {
            Side::Ask => (Some(self.levels.iter()), None),
            Side::Bid => (None, Some(self.levels.iter().rev())),
        };
        ascending
            .into_iter()
            .flatten()
            .chain(descending.into_iter().flatten())
            .map(|(price, qty)| Level::new(*price, *qty))
    }

    /// Top `depth` levels, best-first
    #[must_use]
    pub fn top(&self, depth: usize) -> Vec<Level> {
        self.iter().take(depth).collect()
    }
}

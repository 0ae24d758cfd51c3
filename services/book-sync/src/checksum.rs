//! Exchange checksum verification over the top levels of a book
//!
//! OKX sends a signed CRC32 over a string built from the top 25 levels,
//! interleaving bids and asks as `bidPx:bidSz:askPx:askSz:...`. When one
//! side runs out the remaining levels of the other side are appended alone.
//! Prices and sizes use the exchange's own decimal text, which `Px`/`Qty`
//! preserve.

use crate::book::PriceLevelBook;
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Checksum algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    /// Protocol sends no checksum
    None,
    /// Signed CRC32 over interleaved top-N levels
    Crc32Interleaved,
}

/// Verifies exchange checksums against local book state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumValidator {
    kind: ChecksumKind,
    depth: usize,
}

impl ChecksumValidator {
    /// Create a validator covering `depth` levels per side
    #[must_use]
    pub const fn new(kind: ChecksumKind, depth: usize) -> Self {
        Self { kind, depth }
    }

    /// Validator that accepts everything
    #[must_use]
    pub const fn disabled() -> Self {
        Self::new(ChecksumKind::None, 0)
    }

    /// Algorithm in use
    #[must_use]
    pub const fn kind(&self) -> ChecksumKind {
        self.kind
    }

    /// Compute the local checksum, `None` when the protocol has none
    #[must_use]
    pub fn compute(&self, bids: &PriceLevelBook, asks: &PriceLevelBook) -> Option<i64> {
        match self.kind {
            ChecksumKind::None => None,
            ChecksumKind::Crc32Interleaved => {
                let text = interleaved_text(bids, asks, self.depth);
                // Exchange publishes the CRC as a signed 32-bit integer
                #[allow(clippy::cast_possible_wrap)]
                let signed = crc32fast::hash(text.as_bytes()) as i32;
                Some(i64::from(signed))
            }
        }
    }

    /// Check the provided checksum against the current book
    ///
    /// Always true for protocols without a checksum.
    #[must_use]
    pub fn verify(&self, bids: &PriceLevelBook, asks: &PriceLevelBook, provided: i64) -> bool {
        self.compute(bids, asks)
            .is_none_or(|local| local == provided)
    }
}

/// Build the `bidPx:bidSz:askPx:askSz:...` string over the top `depth` levels
#[must_use]
pub fn interleaved_text(bids: &PriceLevelBook, asks: &PriceLevelBook, depth: usize) -> String {
    let bids = bids.top(depth);
    let asks = asks.top(depth);
    let mut text = String::with_capacity((bids.len() + asks.len()) * 24);

    for i in 0..bids.len().max(asks.len()) {
        for level in [bids.get(i), asks.get(i)].into_iter().flatten() {
            if !text.is_empty() {
                text.push(':');
            }
            let _ = write!(text, "{}:{}", level.price, level.qty);
        }
    }
    text
}

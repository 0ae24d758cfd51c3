//! Core types for the order book synchronization platform

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building domain types from exchange text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    /// Text is not a decimal number
    #[error("Invalid decimal: {0}")]
    InvalidDecimal(String),

    /// Value must not be negative
    #[error("Negative value not allowed: {0}")]
    Negative(String),
}

/// Price type (exact decimal)
///
/// Keeps the scale the exchange sent (`"100.10"` stays `100.10`), which the
/// checksum algorithms rely on. Equality and ordering ignore scale, so
/// `100.1 == 100.10` and a book never holds both as separate levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Px(Decimal);

impl Px {
    /// Zero price
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a price from a decimal
    #[must_use]
    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// Get the underlying decimal
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Check if price is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl FromStr for Px {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim())
            .map(Self)
            .map_err(|_| TypeError::InvalidDecimal(s.to_string()))
    }
}

impl From<Decimal> for Px {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl fmt::Display for Px {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Quantity type for level sizes (exact decimal, never negative)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qty(Decimal);

impl Qty {
    /// Zero quantity
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Create a quantity from a decimal
    ///
    /// # Errors
    /// Returns an error if the value is negative
    pub fn new(value: Decimal) -> Result<Self, TypeError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TypeError::Negative(value.to_string()));
        }
        Ok(Self(value))
    }

    /// Get the underlying decimal
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Check if quantity is zero
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Check if quantity is strictly positive
    #[must_use]
    pub fn is_positive(&self) -> bool {
        !self.0.is_zero() && self.0.is_sign_positive()
    }
}

impl FromStr for Qty {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value =
            Decimal::from_str(s.trim()).map_err(|_| TypeError::InvalidDecimal(s.to_string()))?;
        Self::new(value)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp in nanoseconds since UNIX epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ts(pub u64);

impl Ts {
    /// Get current timestamp
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0))
            .as_nanos() as u64;
        Self(nanos)
    }

    /// Create timestamp from nanoseconds
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    /// Create timestamp from exchange milliseconds
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis.saturating_mul(1_000_000))
    }

    /// Get timestamp as nanoseconds
    #[must_use]
    pub const fn as_nanos(&self) -> u64 {
        self.0
    }

    /// Get timestamp as milliseconds
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0 / 1_000_000
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Side of the book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Buy side
    Bid,
    /// Sell side
    Ask,
}

impl Side {
    /// Get the opposite side
    #[must_use]
    pub const fn opposite(&self) -> Self {
        match self {
            Self::Bid => Self::Ask,
            Self::Ask => Self::Bid,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bid => write!(f, "bid"),
            Self::Ask => write!(f, "ask"),
        }
    }
}

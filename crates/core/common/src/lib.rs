//! Common types shared across the order book synchronization platform

#![warn(missing_docs)]

pub mod types;

pub use types::{Px, Qty, Side, Ts, TypeError};

//! Wire decoders turning exchange payloads into normalized records

pub mod binance;
pub mod okx;

use crate::book::Level;
use crate::config::ExchangeKind;
use crate::error::DecodeError;
use crate::update::DecodedMessage;
use common::{Px, Qty};

/// Decode one raw WebSocket payload for the given exchange family
///
/// # Errors
/// Returns `DecodeError` when the payload is malformed or a book message
/// is missing required fields
pub fn decode(exchange: ExchangeKind, payload: &str) -> Result<DecodedMessage, DecodeError> {
    match exchange {
        ExchangeKind::BinanceSpot | ExchangeKind::BinanceFutures => binance::decode_stream(payload),
        ExchangeKind::Okx => okx::decode_stream(payload),
    }
}

/// Best-effort symbol extraction from a payload that failed to decode
#[must_use]
pub fn symbol_hint(exchange: ExchangeKind, payload: &str) -> Option<String> {
    match exchange {
        ExchangeKind::BinanceSpot | ExchangeKind::BinanceFutures => binance::symbol_hint(payload),
        ExchangeKind::Okx => okx::symbol_hint(payload),
    }
}

/// Parse `[price, quantity]` string pairs, keeping the exchange's text scale
pub(crate) fn parse_levels<S: AsRef<str>>(raw: &[[S; 2]]) -> Result<Vec<Level>, DecodeError> {
    raw.iter()
        .map(|[price, qty]| {
            let price = price.as_ref();
            let qty = qty.as_ref();
            let price: Px = price.parse().map_err(|_| DecodeError::InvalidNumber {
                field: "price",
                value: price.to_string(),
            })?;
            let qty: Qty = qty.parse().map_err(|_| DecodeError::InvalidNumber {
                field: "quantity",
                value: qty.to_string(),
            })?;
            Ok(Level::new(price, qty))
        })
        .collect()
}

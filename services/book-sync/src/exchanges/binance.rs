//! Binance spot and USD-M futures depth decoding
//!
//! Stream events carry `U` (first id) and `u` (last id); futures events
//! additionally carry `pu`, the previous event's `u`. REST snapshots carry
//! `lastUpdateId`.

use super::parse_levels;
use crate::error::DecodeError;
use crate::update::{DecodedMessage, DepthUpdate, Snapshot};
use common::Ts;
use serde::Deserialize;
use serde_json::{Value, json};

/// Binance depth update event
#[derive(Debug, Deserialize)]
pub struct DepthEvent {
    #[serde(rename = "e")]
    pub event_type: String,
    #[serde(rename = "E")]
    pub event_time: u64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "U")]
    pub first_update_id: u64,
    #[serde(rename = "u")]
    pub final_update_id: u64,
    /// Futures only
    #[serde(rename = "pu", default)]
    pub prev_final_update_id: Option<u64>,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

/// Binance depth snapshot (REST API)
#[derive(Debug, Deserialize)]
pub struct DepthSnapshot {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

/// Binance REST error body
#[derive(Debug, Deserialize)]
pub struct ApiError {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
}

/// Error code for an unknown symbol
pub const INVALID_SYMBOL: i64 = -1121;

impl DepthEvent {
    fn into_update(self) -> Result<DepthUpdate, DecodeError> {
        Ok(DepthUpdate {
            bids: parse_levels(&self.bids)?,
            asks: parse_levels(&self.asks)?,
            symbol: self.symbol,
            first_id: self.first_update_id,
            last_id: self.final_update_id,
            prev_id: self.prev_final_update_id,
            checksum: None,
            event_time: Ts::from_millis(self.event_time),
        })
    }
}

/// Unwrap a combined-stream envelope if present
fn event_body(value: &Value) -> &Value {
    value.get("data").unwrap_or(value)
}

/// Decode a raw or combined-stream payload
///
/// # Errors
/// Returns `DecodeError` for non-JSON payloads and malformed depth events
pub fn decode_stream(payload: &str) -> Result<DecodedMessage, DecodeError> {
    let value: Value = serde_json::from_str(payload)?;
    if !value.is_object() {
        return Err(DecodeError::Malformed("expected a JSON object".to_string()));
    }

    let body = event_body(&value);
    match body.get("e").and_then(Value::as_str) {
        Some("depthUpdate") => {
            let event = DepthEvent::deserialize(body)?;
            Ok(DecodedMessage::Update(event.into_update()?))
        }
        // Subscription acks ({"result":null,"id":1}) and other event types
        _ => Ok(DecodedMessage::Ignored),
    }
}

/// Decode a REST depth body into a snapshot
///
/// # Errors
/// Returns `DecodeError` if the body is not a depth snapshot
pub fn decode_snapshot(symbol: &str, body: &str, fetched_at: Ts) -> Result<Snapshot, DecodeError> {
    let raw: DepthSnapshot = serde_json::from_str(body)?;
    Ok(Snapshot {
        symbol: symbol.to_string(),
        bids: parse_levels(&raw.bids)?,
        asks: parse_levels(&raw.asks)?,
        snapshot_id: raw.last_update_id,
        fetched_at,
        checksum: None,
    })
}

/// Parse a REST error body, if it is one
#[must_use]
pub fn decode_api_error(body: &str) -> Option<ApiError> {
    serde_json::from_str(body).ok()
}

/// Symbol named by a payload, from `s` or the stream name
#[must_use]
pub fn symbol_hint(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    if let Some(symbol) = event_body(&value).get("s").and_then(Value::as_str) {
        return Some(symbol.to_string());
    }
    value
        .get("stream")
        .and_then(Value::as_str)
        .and_then(|stream| stream.split('@').next())
        .map(str::to_uppercase)
}

/// Stream name for a symbol's diff depth
#[must_use]
pub fn depth_stream(symbol: &str) -> String {
    format!("{}@depth@100ms", symbol.to_lowercase())
}

/// `SUBSCRIBE` request for the depth streams of `symbols`
#[must_use]
pub fn subscribe_message(symbols: &[String], id: u64) -> String {
    let params: Vec<String> = symbols.iter().map(|s| depth_stream(s)).collect();
    json!({ "method": "SUBSCRIBE", "params": params, "id": id }).to_string()
}

/// `UNSUBSCRIBE` request for the depth streams of `symbols`
#[must_use]
pub fn unsubscribe_message(symbols: &[String], id: u64) -> String {
    let params: Vec<String> = symbols.iter().map(|s| depth_stream(s)).collect();
    json!({ "method": "UNSUBSCRIBE", "params": params, "id": id }).to_string()
}

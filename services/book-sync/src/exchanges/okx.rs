//! OKX v5 `books` channel decoding
//!
//! The channel pushes one `snapshot` after subscribe and `update`s after
//! that. Every push carries `seqId`, `prevSeqId` (the previous push's
//! `seqId`, `-1` on snapshots) and a signed CRC32 `checksum`.

use super::parse_levels;
use crate::book::Level;
use crate::error::DecodeError;
use crate::update::{DecodedMessage, DepthUpdate, Snapshot};
use common::Ts;
use serde::Deserialize;
use serde_json::{Value, json};

/// Books channel name
pub const BOOKS_CHANNEL: &str = "books";

#[derive(Debug, Deserialize)]
struct BookPush {
    arg: PushArg,
    action: String,
    data: Vec<BookData>,
}

#[derive(Debug, Deserialize)]
struct PushArg {
    channel: String,
    #[serde(rename = "instId")]
    inst_id: String,
}

/// Levels are `[price, size, deprecated, order_count]`
#[derive(Debug, Deserialize)]
struct BookData {
    asks: Vec<Vec<String>>,
    bids: Vec<Vec<String>>,
    ts: String,
    checksum: Option<i64>,
    #[serde(rename = "prevSeqId")]
    prev_seq_id: i64,
    #[serde(rename = "seqId")]
    seq_id: i64,
}

fn levels(raw: &[Vec<String>]) -> Result<Vec<Level>, DecodeError> {
    let pairs = raw
        .iter()
        .map(|level| match level.as_slice() {
            [price, qty, ..] => Ok([price.as_str(), qty.as_str()]),
            _ => Err(DecodeError::Malformed(format!("short level {level:?}"))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    parse_levels(&pairs)
}

fn sequence(value: i64, field: &'static str) -> Result<u64, DecodeError> {
    u64::try_from(value).map_err(|_| DecodeError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn timestamp(ts: &str) -> Result<Ts, DecodeError> {
    ts.parse::<u64>()
        .map(Ts::from_millis)
        .map_err(|_| DecodeError::InvalidNumber {
            field: "ts",
            value: ts.to_string(),
        })
}

/// Decode one `books` push, event or pong
///
/// # Errors
/// Returns `DecodeError` for non-JSON payloads and malformed book pushes
pub fn decode_stream(payload: &str) -> Result<DecodedMessage, DecodeError> {
    let value: Value = serde_json::from_str(payload)?;
    if value.get("event").is_some() || value.get("data").is_none() {
        // subscribe/unsubscribe acks and error events
        return Ok(DecodedMessage::Ignored);
    }

    let push = BookPush::deserialize(&value)?;
    if push.arg.channel != BOOKS_CHANNEL {
        return Ok(DecodedMessage::Ignored);
    }
    let data = push
        .data
        .into_iter()
        .next()
        .ok_or(DecodeError::MissingField("data"))?;

    let seq_id = sequence(data.seq_id, "seqId")?;
    let event_time = timestamp(&data.ts)?;
    let bids = levels(&data.bids)?;
    let asks = levels(&data.asks)?;

    match push.action.as_str() {
        "snapshot" => Ok(DecodedMessage::Snapshot(Snapshot {
            symbol: push.arg.inst_id,
            bids,
            asks,
            snapshot_id: seq_id,
            fetched_at: event_time,
            checksum: data.checksum,
        })),
        "update" => Ok(DecodedMessage::Update(DepthUpdate {
            symbol: push.arg.inst_id,
            first_id: seq_id,
            last_id: seq_id,
            prev_id: Some(sequence(data.prev_seq_id, "prevSeqId")?),
            bids,
            asks,
            checksum: data.checksum,
            event_time,
        })),
        other => Err(DecodeError::Malformed(format!("unknown action {other}"))),
    }
}

/// Instrument named by a payload's `arg`
#[must_use]
pub fn symbol_hint(payload: &str) -> Option<String> {
    let value: Value = serde_json::from_str(payload).ok()?;
    value
        .get("arg")?
        .get("instId")?
        .as_str()
        .map(str::to_string)
}

fn books_args(symbols: &[String]) -> Vec<Value> {
    symbols
        .iter()
        .map(|symbol| json!({ "channel": BOOKS_CHANNEL, "instId": symbol }))
        .collect()
}

/// Subscribe request for the books channel of `symbols`
#[must_use]
pub fn subscribe_message(symbols: &[String]) -> String {
    json!({ "op": "subscribe", "args": books_args(symbols) }).to_string()
}

/// Unsubscribe request for the books channel of `symbols`
#[must_use]
pub fn unsubscribe_message(symbols: &[String]) -> String {
    json!({ "op": "unsubscribe", "args": books_args(symbols) }).to_string()
}

//! Normalized outbound records and the publisher that emits them
//!
//! Two subjects per symbol:
//! - `<stream>.<exchange>.<market_type>.<symbol>` carries [`EnhancedOrderBook`]
//! - `<delta_stream>.<exchange>.<market_type>.<symbol>` carries [`OrderBookDelta`]
//!
//! Field names and `update_type` values are a compatibility contract with
//! downstream consumers. Records are built while the symbol lock is held and
//! handed to the bus after it is released; a failed hand-off never blocks
//! reconciliation.

use crate::book::Level;
use crate::checksum::ChecksumValidator;
use crate::state::{SymbolSyncState, SyncStatus};
use crate::update::DepthUpdate;
use bus::{BusError, Message, Publisher};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Kind of published record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    /// First full book after a (re)sync
    Snapshot,
    /// Full book after an applied update
    Update,
    /// Periodic full book
    FullRefresh,
    /// Changed levels only
    Delta,
}

/// Full current book with metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnhancedOrderBook {
    pub exchange: String,
    pub market_type: String,
    pub symbol: String,
    pub update_type: UpdateType,
    /// Best-first bid levels
    pub bids: Vec<Level>,
    /// Best-first ask levels
    pub asks: Vec<Level>,
    /// Levels per side included
    pub depth: usize,
    pub last_update_id: u64,
    /// True only while the symbol is synced
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<i64>,
    /// Publish time, epoch milliseconds
    pub timestamp: i64,
}

/// Levels changed by one applied update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookDelta {
    pub exchange: String,
    pub market_type: String,
    pub symbol: String,
    pub update_type: UpdateType,
    pub first_update_id: u64,
    pub last_update_id: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub prev_update_id: Option<u64>,
    /// Changed bid levels; quantity zero means delete
    pub bids: Vec<Level>,
    /// Changed ask levels; quantity zero means delete
    pub asks: Vec<Level>,
    /// Exchange event time, epoch milliseconds
    pub event_time: u64,
    /// Publish time, epoch milliseconds
    pub timestamp: i64,
}

/// Record payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BookPayload {
    /// Full book
    Full(EnhancedOrderBook),
    /// Delta
    Delta(OrderBookDelta),
}

/// One record addressed to a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookMessage {
    pub subject: String,
    pub payload: BookPayload,
}

impl Message for BookMessage {}

impl BookMessage {
    /// Serialize as one JSON object
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Builds normalized records for one exchange/market pair and hands them to the bus
#[derive(Clone)]
pub struct NormalizedPublisher {
    exchange: String,
    market_type: String,
    stream: String,
    delta_stream: String,
    depth: usize,
    checksum: ChecksumValidator,
    bus: Arc<dyn Publisher<BookMessage>>,
}

impl std::fmt::Debug for NormalizedPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedPublisher")
            .field("exchange", &self.exchange)
            .field("market_type", &self.market_type)
            .field("stream", &self.stream)
            .field("delta_stream", &self.delta_stream)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl NormalizedPublisher {
    /// Create a publisher
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        market_type: impl Into<String>,
        stream: impl Into<String>,
        delta_stream: impl Into<String>,
        depth: usize,
        checksum: ChecksumValidator,
        bus: Arc<dyn Publisher<BookMessage>>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            market_type: market_type.into(),
            stream: stream.into(),
            delta_stream: delta_stream.into(),
            depth,
            checksum,
            bus,
        }
    }

    /// Subject for full books of `symbol`
    #[must_use]
    pub fn full_subject(&self, symbol: &str) -> String {
        format!("{}.{}.{}.{}", self.stream, self.exchange, self.market_type, symbol)
    }

    /// Subject for deltas of `symbol`
    #[must_use]
    pub fn delta_subject(&self, symbol: &str) -> String {
        format!("{}.{}.{}.{}", self.delta_stream, self.exchange, self.market_type, symbol)
    }

    /// Build the full-book record for the current state
    #[must_use]
    pub fn build_full(&self, state: &SymbolSyncState, update_type: UpdateType) -> BookMessage {
        let bids = state.bids().top(self.depth);
        let asks = state.asks().top(self.depth);
        let book = EnhancedOrderBook {
            exchange: self.exchange.clone(),
            market_type: self.market_type.clone(),
            symbol: state.symbol().to_string(),
            update_type,
            depth: bids.len().max(asks.len()),
            bids,
            asks,
            last_update_id: state.last_applied_id().unwrap_or(0),
            is_valid: state.status() == SyncStatus::Synced,
            checksum: self.checksum.compute(state.bids(), state.asks()),
            timestamp: now_millis(),
        };
        BookMessage {
            subject: self.full_subject(state.symbol()),
            payload: BookPayload::Full(book),
        }
    }

    /// Build the delta record for an applied update
    #[must_use]
    pub fn build_delta(&self, update: &DepthUpdate) -> BookMessage {
        let delta = OrderBookDelta {
            exchange: self.exchange.clone(),
            market_type: self.market_type.clone(),
            symbol: update.symbol.clone(),
            update_type: UpdateType::Delta,
            first_update_id: update.first_id,
            last_update_id: update.last_id,
            prev_update_id: update.prev_id,
            bids: update.bids.clone(),
            asks: update.asks.clone(),
            event_time: update.event_time.as_millis(),
            timestamp: now_millis(),
        };
        BookMessage {
            subject: self.delta_subject(&update.symbol),
            payload: BookPayload::Delta(delta),
        }
    }

    /// Hand a record to the bus without blocking
    ///
    /// # Errors
    /// Returns the bus error when the record was not enqueued
    pub fn send(&self, message: BookMessage) -> Result<(), BusError> {
        self.bus.publish(message)
    }

    /// Build and send the full book
    ///
    /// # Errors
    /// Returns the bus error when the record was not enqueued
    pub fn publish_full(&self, state: &SymbolSyncState, update_type: UpdateType) -> Result<(), BusError> {
        self.send(self.build_full(state, update_type))
    }

    /// Build and send the delta for an applied update
    ///
    /// # Errors
    /// Returns the bus error when the record was not enqueued
    pub fn publish_delta(&self, update: &DepthUpdate) -> Result<(), BusError> {
        self.send(self.build_delta(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::{ContinuityRule, UpdateReconciler};
    use crate::update::Snapshot;
    use bus::{Bus, Subscriber};
    use common::{Px, Qty, Ts};
    use pretty_assertions::assert_eq;

    fn level(price: &str, qty: &str) -> Level {
        Level::new(
            price.parse().unwrap_or(Px::ZERO),
            qty.parse().unwrap_or(Qty::ZERO),
        )
    }

    fn synced_state() -> SymbolSyncState {
        let mut state = SymbolSyncState::new("BTCUSDT", 10);
        state.begin_snapshot();
        let snapshot = Snapshot {
            symbol: "BTCUSDT".to_string(),
            bids: vec![level("100", "2"), level("99", "1")],
            asks: vec![level("101", "3")],
            snapshot_id: 50,
            fetched_at: Ts::from_millis(1),
            checksum: None,
        };
        UpdateReconciler::new(ContinuityRule::Range, ChecksumValidator::disabled())
            .bootstrap(&mut state, &snapshot, Ts::from_millis(2));
        state
    }

    fn publisher(bus: &Bus<BookMessage>, depth: usize) -> NormalizedPublisher {
        NormalizedPublisher::new(
            "binance",
            "spot",
            "orderbook",
            "orderbook_delta",
            depth,
            ChecksumValidator::disabled(),
            Arc::new(bus.publisher()),
        )
    }

    #[test]
    fn test_full_book_record() -> Result<(), BusError> {
        let bus = Bus::new(8);
        let rx = bus.subscriber().subscribe()?;
        let publisher = publisher(&bus, 1);

        publisher.publish_full(&synced_state(), UpdateType::Snapshot)?;
        let msg = rx.recv()?;
        assert_eq!(msg.subject, "orderbook.binance.spot.BTCUSDT");

        let BookPayload::Full(book) = msg.payload else {
            panic!("expected full book");
        };
        assert_eq!(book.update_type, UpdateType::Snapshot);
        assert_eq!(book.bids, vec![level("100", "2")]);
        assert_eq!(book.depth, 1);
        assert_eq!(book.last_update_id, 50);
        assert!(book.is_valid);
        assert_eq!(book.checksum, None);
        Ok(())
    }

    #[test]
    fn test_delta_record_json() -> Result<(), Box<dyn std::error::Error>> {
        let bus = Bus::new(8);
        let publisher = publisher(&bus, 10);
        let update = DepthUpdate {
            symbol: "BTCUSDT".to_string(),
            first_id: 51,
            last_id: 51,
            prev_id: None,
            bids: vec![level("100", "0")],
            asks: Vec::new(),
            checksum: None,
            event_time: Ts::from_millis(1_700_000_000_000),
        };

        let json: serde_json::Value = serde_json::from_str(&publisher.build_delta(&update).to_json()?)?;
        assert_eq!(json["subject"], "orderbook_delta.binance.spot.BTCUSDT");
        let payload = &json["payload"];
        assert_eq!(payload["update_type"], "delta");
        assert_eq!(payload["first_update_id"], 51);
        assert_eq!(payload["last_update_id"], 51);
        assert_eq!(payload["bids"][0], serde_json::json!(["100", "0"]));
        assert!(payload.get("prev_update_id").is_none());
        assert_eq!(payload["event_time"], 1_700_000_000_000_u64);
        Ok(())
    }

    #[test]
    fn test_full_bus_reports_error() {
        let bus = Bus::new(1);
        let publisher = publisher(&bus, 10);
        let state = synced_state();

        assert!(publisher.publish_full(&state, UpdateType::FullRefresh).is_ok());
        assert_eq!(
            publisher.publish_full(&state, UpdateType::FullRefresh),
            Err(BusError::Full)
        );
    }
}

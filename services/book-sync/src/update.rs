//! Normalized exchange records: incremental updates and snapshots

use crate::book::Level;
use common::Ts;

/// Incremental depth update decoded from the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthUpdate {
    /// Exchange symbol
    pub symbol: String,
    /// First sequence id covered by this update
    pub first_id: u64,
    /// Last sequence id covered by this update
    pub last_id: u64,
    /// Previous update's last id, for chaining protocols
    pub prev_id: Option<u64>,
    /// Bid level changes (zero quantity deletes)
    pub bids: Vec<Level>,
    /// Ask level changes (zero quantity deletes)
    pub asks: Vec<Level>,
    /// Exchange checksum over the post-update book
    pub checksum: Option<i64>,
    /// Exchange event time
    pub event_time: Ts,
}

impl DepthUpdate {
    /// Total number of level changes
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.bids.len() + self.asks.len()
    }
}

/// Full point-in-time book
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Exchange symbol
    pub symbol: String,
    /// Bid levels
    pub bids: Vec<Level>,
    /// Ask levels
    pub asks: Vec<Level>,
    /// Sequence id to resume from
    pub snapshot_id: u64,
    /// When the snapshot was obtained
    pub fetched_at: Ts,
    /// Exchange checksum over the snapshot, if the protocol sends one
    pub checksum: Option<i64>,
}

/// Result of decoding one raw feed payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedMessage {
    /// Incremental update
    Update(DepthUpdate),
    /// Snapshot pushed over the stream
    Snapshot(Snapshot),
    /// Subscription acks, events and other non-book traffic
    Ignored,
}

//! Per-symbol synchronization state
//!
//! ```text
//! Unsynced -> SnapshotPending -> Synced -> Resyncing -> SnapshotPending
//!      \____________\______________\__________\______-> Unsubscribed
//! ```
//!
//! A snapshot fetch failure retries inside `SnapshotPending`; there is no
//! direct `SnapshotPending -> Resyncing` edge.

use crate::book::PriceLevelBook;
use crate::update::{DepthUpdate, Snapshot};
use common::{Side, Ts};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Synchronization status of one symbol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Created, nothing requested yet
    Unsynced,
    /// Snapshot fetch in flight, updates are buffered
    SnapshotPending,
    /// Updates applied live
    Synced,
    /// Continuity lost, old state discarded, new fetch being scheduled
    Resyncing,
    /// Terminal
    Unsubscribed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unsynced => "unsynced",
            Self::SnapshotPending => "snapshot_pending",
            Self::Synced => "synced",
            Self::Resyncing => "resyncing",
            Self::Unsubscribed => "unsubscribed",
        };
        f.write_str(name)
    }
}

/// What happened to an update pushed into the pending buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOutcome {
    /// Queued
    Buffered,
    /// Bound exceeded: the oldest update was dropped
    Overflow,
}

/// Book replica and bookkeeping for one (exchange, market, symbol)
#[derive(Debug)]
pub struct SymbolSyncState {
    symbol: String,
    status: SyncStatus,
    bids: PriceLevelBook,
    asks: PriceLevelBook,
    last_applied_id: Option<u64>,
    pending: VecDeque<DepthUpdate>,
    pending_limit: usize,
    epoch: u64,
    applied_since_snapshot: bool,
    consecutive_error_count: u32,
    resync_count: u64,
    last_snapshot_at: Option<Ts>,
    last_synced_at: Option<Ts>,
    healthy: bool,
}

impl SymbolSyncState {
    /// Create an unsynced state with an empty book
    #[must_use]
    pub fn new(symbol: impl Into<String>, pending_limit: usize) -> Self {
        Self {
            symbol: symbol.into(),
            status: SyncStatus::Unsynced,
            bids: PriceLevelBook::new(Side::Bid),
            asks: PriceLevelBook::new(Side::Ask),
            last_applied_id: None,
            pending: VecDeque::new(),
            pending_limit: pending_limit.max(1),
            epoch: 0,
            applied_since_snapshot: false,
            consecutive_error_count: 0,
            resync_count: 0,
            last_snapshot_at: None,
            last_synced_at: None,
            healthy: true,
        }
    }

    /// Symbol name
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Current status
    #[must_use]
    pub const fn status(&self) -> SyncStatus {
        self.status
    }

    /// Bid side
    #[must_use]
    pub const fn bids(&self) -> &PriceLevelBook {
        &self.bids
    }

    /// Ask side
    #[must_use]
    pub const fn asks(&self) -> &PriceLevelBook {
        &self.asks
    }

    /// Both sides, mutably
    pub fn books_mut(&mut self) -> (&mut PriceLevelBook, &mut PriceLevelBook) {
        (&mut self.bids, &mut self.asks)
    }

    /// Sequence marker of the last applied update or seeded snapshot
    #[must_use]
    pub const fn last_applied_id(&self) -> Option<u64> {
        self.last_applied_id
    }

    /// Fetch generation; a snapshot result for an older epoch is stale
    #[must_use]
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Whether an update has been applied since the last seed
    #[must_use]
    pub const fn applied_since_snapshot(&self) -> bool {
        self.applied_since_snapshot
    }

    /// Gaps and failures since the last healthy live update
    #[must_use]
    pub const fn consecutive_error_count(&self) -> u32 {
        self.consecutive_error_count
    }

    /// Number of resyncs since subscribe
    #[must_use]
    pub const fn resync_count(&self) -> u64 {
        self.resync_count
    }

    /// When the last snapshot was seeded
    #[must_use]
    pub const fn last_snapshot_at(&self) -> Option<Ts> {
        self.last_snapshot_at
    }

    /// When the symbol last became synced
    #[must_use]
    pub const fn last_synced_at(&self) -> Option<Ts> {
        self.last_synced_at
    }

    /// Whether the symbol is still considered serviceable
    #[must_use]
    pub const fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// Number of buffered updates
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Buffered updates in arrival order
    pub fn pending(&self) -> impl Iterator<Item = &DepthUpdate> {
        self.pending.iter()
    }

    /// `Unsynced -> SnapshotPending` on subscribe; returns the fetch epoch
    pub fn begin_snapshot(&mut self) -> u64 {
        self.status = SyncStatus::SnapshotPending;
        self.epoch += 1;
        self.epoch
    }

    /// `Synced -> Resyncing`: discard the book and open a new fetch epoch
    pub fn begin_resync(&mut self) -> u64 {
        self.reset_book();
        self.pending.clear();
        self.status = SyncStatus::Resyncing;
        self.resync_count += 1;
        self.epoch += 1;
        self.epoch
    }

    /// `Resyncing -> SnapshotPending` once the fetch for `epoch` starts
    ///
    /// Returns false when `epoch` has been superseded.
    pub fn mark_snapshot_pending(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        if self.status == SyncStatus::Resyncing {
            self.status = SyncStatus::SnapshotPending;
        }
        self.status == SyncStatus::SnapshotPending
    }

    /// Start a new fetch while staying in the pending state
    pub fn schedule_refetch(&mut self) -> u64 {
        self.reset_book();
        self.epoch += 1;
        self.epoch
    }

    /// Queue an update that cannot be applied yet
    pub fn buffer(&mut self, update: DepthUpdate) -> BufferOutcome {
        self.pending.push_back(update);
        if self.pending.len() > self.pending_limit {
            self.pending.pop_front();
            BufferOutcome::Overflow
        } else {
            BufferOutcome::Buffered
        }
    }

    /// Take all buffered updates in arrival order
    pub fn take_pending(&mut self) -> Vec<DepthUpdate> {
        self.pending.drain(..).collect()
    }

    /// Replace both books with a snapshot and set the resume marker
    pub fn seed(&mut self, snapshot: &Snapshot) {
        self.bids.replace(snapshot.bids.iter().copied());
        self.asks.replace(snapshot.asks.iter().copied());
        self.last_applied_id = Some(snapshot.snapshot_id);
        self.applied_since_snapshot = false;
        self.last_snapshot_at = Some(snapshot.fetched_at);
    }

    /// Record a successfully applied update
    pub fn record_applied(&mut self, last_id: u64) {
        self.last_applied_id = Some(last_id);
        self.applied_since_snapshot = true;
        if self.status == SyncStatus::Synced {
            self.consecutive_error_count = 0;
            self.healthy = true;
        }
    }

    /// Record a detected gap: drop the buffer and count the failure
    pub fn record_gap(&mut self) {
        self.pending.clear();
        self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
    }

    /// Record a failed snapshot fetch
    pub fn record_failure(&mut self) {
        self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
    }

    /// `SnapshotPending -> Synced`
    pub fn mark_synced(&mut self, now: Ts) {
        self.status = SyncStatus::Synced;
        self.last_synced_at = Some(now);
        self.healthy = true;
    }

    /// Flag the symbol as unserviceable
    ///
    /// Cleared by the next sync or the next live update applied while synced.
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    /// Any state `-> Unsubscribed`
    pub fn unsubscribe(&mut self) {
        self.reset_book();
        self.pending.clear();
        self.status = SyncStatus::Unsubscribed;
        self.epoch += 1;
    }

    fn reset_book(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.last_applied_id = None;
        self.applied_since_snapshot = false;
    }
}

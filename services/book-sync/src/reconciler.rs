//! Update reconciliation: decides whether an incremental update is applied,
//! buffered, discarded or signals a gap
//!
//! Decision order for every update:
//! 1. No snapshot marker while not synced: buffer (bounded, overflow is a gap)
//! 2. Range entirely at or before the marker: stale
//! 3. Exchange continuity rule (range, chain, or range-then-chain)
//! 4. Apply level by level, recording an undo log
//! 5. Verify the exchange checksum; roll back and report a gap on mismatch
//!
//! Every gap clears the pending buffer and bumps the error count before
//! returning. Scheduling the new snapshot is the orchestrator's job.

use crate::book::{Level, PriceLevelBook};
use crate::checksum::ChecksumValidator;
use crate::state::{BufferOutcome, SymbolSyncState};
use crate::update::{DepthUpdate, Snapshot};
use common::{Px, Qty, Side, Ts};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// How an exchange proves that an update follows the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinuityRule {
    /// `first_id <= last + 1 <= last_id`
    Range,
    /// Range or chain for the first update after a snapshot, then `prev_id == last`
    Hybrid,
    /// `prev_id == last` always
    Chain,
}

/// Why continuity could not be proven
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapReason {
    /// Sequence ids do not follow the last applied marker
    Sequence {
        /// Marker before the update
        last_applied: u64,
        /// Update's first id
        first_id: u64,
        /// Update's last id
        last_id: u64,
        /// Update's previous id, if sent
        prev_id: Option<u64>,
    },
    /// Exchange checksum disagrees with the book after applying
    ChecksumMismatch {
        /// Checksum sent by the exchange
        provided: i64,
        /// Checksum computed locally
        computed: Option<i64>,
    },
    /// Pending buffer bound exceeded before the snapshot arrived
    BufferOverflow,
}

impl fmt::Display for GapReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequence {
                last_applied,
                first_id,
                last_id,
                prev_id,
            } => write!(
                f,
                "sequence gap: last applied {last_applied}, update {first_id}..={last_id} prev {prev_id:?}"
            ),
            Self::ChecksumMismatch { provided, computed } => {
                write!(f, "checksum mismatch: provided {provided}, computed {computed:?}")
            }
            Self::BufferOverflow => write!(f, "pending buffer overflow"),
        }
    }
}

/// Result of reconciling one update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Update applied; carries the update for delta publishing
    Applied(DepthUpdate),
    /// Queued until a snapshot is seeded
    Buffered,
    /// Already covered by the current state, nothing changed
    Stale,
    /// Continuity lost, a fresh snapshot is required
    GapDetected(GapReason),
}

/// Result of seeding a snapshot and replaying the buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// Symbol is now synced
    Synced {
        /// Buffered updates applied on top of the snapshot
        replayed: usize,
        /// Buffered updates discarded as stale
        discarded: usize,
    },
    /// Snapshot could not be joined with the buffered stream
    Gap(GapReason),
}

/// Exchange-specific reconciliation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateReconciler {
    rule: ContinuityRule,
    checksum: ChecksumValidator,
}

struct UndoEntry {
    side: Side,
    price: Px,
    previous: Option<Qty>,
}

impl UpdateReconciler {
    /// Create a reconciler for one exchange family
    #[must_use]
    pub const fn new(rule: ContinuityRule, checksum: ChecksumValidator) -> Self {
        Self { rule, checksum }
    }

    /// Continuity rule in use
    #[must_use]
    pub const fn rule(&self) -> ContinuityRule {
        self.rule
    }

    /// Checksum validator in use
    #[must_use]
    pub const fn checksum(&self) -> &ChecksumValidator {
        &self.checksum
    }

    /// Reconcile one update against the symbol state
    pub fn reconcile(&self, state: &mut SymbolSyncState, update: DepthUpdate) -> ReconcileOutcome {
        let Some(last_applied) = state.last_applied_id() else {
            return match state.buffer(update) {
                BufferOutcome::Buffered => ReconcileOutcome::Buffered,
                BufferOutcome::Overflow => {
                    warn!(symbol = %state.symbol(), "Pending buffer overflow");
                    state.record_gap();
                    ReconcileOutcome::GapDetected(GapReason::BufferOverflow)
                }
            };
        };

        if update.last_id <= last_applied {
            debug!(
                symbol = %update.symbol,
                last_id = update.last_id,
                last_applied,
                "Discarding stale update"
            );
            return ReconcileOutcome::Stale;
        }

        if !self.is_continuous(state, &update, last_applied) {
            let reason = GapReason::Sequence {
                last_applied,
                first_id: update.first_id,
                last_id: update.last_id,
                prev_id: update.prev_id,
            };
            warn!(symbol = %update.symbol, %reason, "Gap detected");
            state.record_gap();
            return ReconcileOutcome::GapDetected(reason);
        }

        let undo = apply_changes(state, &update);

        if let Some(provided) = update.checksum {
            let (bids, asks) = (state.bids(), state.asks());
            if !self.checksum.verify(bids, asks, provided) {
                let computed = self.checksum.compute(bids, asks);
                rollback(state, undo);
                let reason = GapReason::ChecksumMismatch { provided, computed };
                warn!(symbol = %update.symbol, last_id = update.last_id, %reason, "Checksum mismatch");
                state.record_gap();
                return ReconcileOutcome::GapDetected(reason);
            }
        }

        state.record_applied(update.last_id);
        debug!(
            symbol = %update.symbol,
            first_id = update.first_id,
            last_id = update.last_id,
            changes = update.change_count(),
            "Applied update"
        );
        ReconcileOutcome::Applied(update)
    }

    /// Seed a snapshot, verify its checksum, and replay buffered updates
    ///
    /// On success the state is `Synced`. On a gap the book and marker are
    /// discarded, the error is counted, and a new fetch epoch is opened.
    pub fn bootstrap(&self, state: &mut SymbolSyncState, snapshot: &Snapshot, now: Ts) -> BootstrapOutcome {
        let buffered = state.take_pending();
        state.seed(snapshot);

        if let Some(provided) = snapshot.checksum {
            if !self.checksum.verify(state.bids(), state.asks(), provided) {
                let computed = self.checksum.compute(state.bids(), state.asks());
                state.record_gap();
                state.schedule_refetch();
                return BootstrapOutcome::Gap(GapReason::ChecksumMismatch { provided, computed });
            }
        }

        let mut replayed = 0;
        let mut discarded = 0;
        for update in buffered {
            match self.reconcile(state, update) {
                ReconcileOutcome::Applied(_) => replayed += 1,
                ReconcileOutcome::Stale => discarded += 1,
                ReconcileOutcome::GapDetected(reason) => {
                    state.schedule_refetch();
                    return BootstrapOutcome::Gap(reason);
                }
                ReconcileOutcome::Buffered => {
                    // Marker was just seeded, nothing should buffer
                    state.record_gap();
                    state.schedule_refetch();
                    return BootstrapOutcome::Gap(GapReason::BufferOverflow);
                }
            }
        }

        state.mark_synced(now);
        BootstrapOutcome::Synced {
            replayed,
            discarded,
        }
    }

    fn is_continuous(&self, state: &SymbolSyncState, update: &DepthUpdate, last: u64) -> bool {
        let range_ok = || update.first_id <= last.saturating_add(1) && last < update.last_id;
        let chain_ok = || update.prev_id == Some(last);

        match self.rule {
            ContinuityRule::Range => range_ok(),
            ContinuityRule::Chain => chain_ok(),
            ContinuityRule::Hybrid => {
                if state.applied_since_snapshot() && update.prev_id.is_some() {
                    chain_ok()
                } else {
                    // Event ids are not contiguous, so the first event may
                    // chain on the snapshot id without straddling it
                    chain_ok() || range_ok()
                }
            }
        }
    }
}

fn apply_changes(state: &mut SymbolSyncState, update: &DepthUpdate) -> Vec<UndoEntry> {
    let mut undo = Vec::with_capacity(update.change_count());
    let (bids, asks) = state.books_mut();
    apply_side(bids, &update.bids, &mut undo);
    apply_side(asks, &update.asks, &mut undo);
    undo
}

fn apply_side(book: &mut PriceLevelBook, changes: &[Level], undo: &mut Vec<UndoEntry>) {
    for level in changes {
        let previous = book.apply(*level);
        undo.push(UndoEntry {
            side: book.side(),
            price: level.price,
            previous,
        });
    }
}

fn rollback(state: &mut SymbolSyncState, undo: Vec<UndoEntry>) {
    let (bids, asks) = state.books_mut();
    // Reverse order so repeated prices unwind to the original quantity
    for entry in undo.into_iter().rev() {
        match entry.side {
            Side::Bid => bids.restore(entry.price, entry.previous),
            Side::Ask => asks.restore(entry.price, entry.previous),
        }
    }
}

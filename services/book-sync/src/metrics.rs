//! Per-symbol counters and health reporting
//!
//! Counters are plain atomics so the publish path and the health endpoint
//! can read them without touching the symbol lock.

use crate::state::{SymbolSyncState, SyncStatus};
use common::Ts;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Event counters for one symbol
#[derive(Debug, Default)]
pub struct SymbolMetrics {
    updates_applied: AtomicU64,
    updates_buffered: AtomicU64,
    updates_stale: AtomicU64,
    gaps_detected: AtomicU64,
    checksum_mismatches: AtomicU64,
    buffer_overflows: AtomicU64,
    resyncs: AtomicU64,
    snapshots_loaded: AtomicU64,
    snapshot_failures: AtomicU64,
    fatal_errors: AtomicU64,
    publish_failures: AtomicU64,
}

macro_rules! counter {
    ($incr:ident, $field:ident) => {
        #[inline]
        #[doc = concat!("Increment `", stringify!($field), "`")]
        pub fn $incr(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl SymbolMetrics {
    /// Create zeroed counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    counter!(inc_applied, updates_applied);
    counter!(inc_buffered, updates_buffered);
    counter!(inc_stale, updates_stale);
    counter!(inc_gap, gaps_detected);
    counter!(inc_checksum_mismatch, checksum_mismatches);
    counter!(inc_buffer_overflow, buffer_overflows);
    counter!(inc_resync, resyncs);
    counter!(inc_snapshot_loaded, snapshots_loaded);
    counter!(inc_snapshot_failure, snapshot_failures);
    counter!(inc_fatal, fatal_errors);
    counter!(inc_publish_failure, publish_failures);

    /// Add `n` to the applied counter (buffered replay)
    pub fn add_applied(&self, n: u64) {
        self.updates_applied.fetch_add(n, Ordering::Relaxed);
    }

    /// Add `n` to the stale counter (buffered replay)
    pub fn add_stale(&self, n: u64) {
        self.updates_stale.fetch_add(n, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            updates_applied: load(&self.updates_applied),
            updates_buffered: load(&self.updates_buffered),
            updates_stale: load(&self.updates_stale),
            gaps_detected: load(&self.gaps_detected),
            checksum_mismatches: load(&self.checksum_mismatches),
            buffer_overflows: load(&self.buffer_overflows),
            resyncs: load(&self.resyncs),
            snapshots_loaded: load(&self.snapshots_loaded),
            snapshot_failures: load(&self.snapshot_failures),
            fatal_errors: load(&self.fatal_errors),
            publish_failures: load(&self.publish_failures),
        }
    }
}

/// Counter values at one instant
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub updates_applied: u64,
    pub updates_buffered: u64,
    pub updates_stale: u64,
    pub gaps_detected: u64,
    pub checksum_mismatches: u64,
    pub buffer_overflows: u64,
    pub resyncs: u64,
    pub snapshots_loaded: u64,
    pub snapshot_failures: u64,
    pub fatal_errors: u64,
    pub publish_failures: u64,
}

/// Health report for one symbol
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolHealth {
    /// Symbol name
    pub symbol: String,
    /// Current status
    pub status: SyncStatus,
    /// Serviceable (false after a fatal error or unknown symbol)
    pub healthy: bool,
    /// Failures since the last healthy live update
    pub consecutive_error_count: u32,
    /// Resyncs since subscribe
    pub resync_count: u64,
    /// Last sequence marker applied
    pub last_applied_id: Option<u64>,
    /// When the symbol last became synced
    pub last_synced_at: Option<Ts>,
    /// When the last snapshot was seeded
    pub last_snapshot_at: Option<Ts>,
    /// Bid levels held
    pub bid_levels: usize,
    /// Ask levels held
    pub ask_levels: usize,
    /// Event counters
    pub counters: MetricsSnapshot,
}

impl SymbolHealth {
    /// Build a report from state and counters
    #[must_use]
    pub fn from_state(state: &SymbolSyncState, metrics: &SymbolMetrics) -> Self {
        Self {
            symbol: state.symbol().to_string(),
            status: state.status(),
            healthy: state.is_healthy(),
            consecutive_error_count: state.consecutive_error_count(),
            resync_count: state.resync_count(),
            last_applied_id: state.last_applied_id(),
            last_synced_at: state.last_synced_at(),
            last_snapshot_at: state.last_snapshot_at(),
            bid_levels: state.bids().len(),
            ask_levels: state.asks().len(),
            counters: metrics.snapshot(),
        }
    }
}

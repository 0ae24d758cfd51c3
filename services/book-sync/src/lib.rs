//! Exchange order book synchronization engine
//!
//! Maintains a locally consistent L2 book per symbol from a REST (or pushed)
//! snapshot plus a stream of incremental updates:
//! - Snapshot/stream reconciliation with buffered replay
//! - Sequence continuity per exchange (Binance spot/futures, OKX)
//! - OKX CRC32 checksum verification with rollback
//! - Automatic resync with capped exponential backoff
//! - Normalized full-book and delta records on a non-blocking bus

#![deny(clippy::all)]
#![forbid(unsafe_code)]

pub mod book;
pub mod checksum;
pub mod config;
pub mod error;
pub mod exchanges;
pub mod feed;
pub mod metrics;
pub mod orchestrator;
pub mod publisher;
pub mod reconciler;
pub mod registry;
pub mod snapshot;
pub mod state;
pub mod update;

pub use book::{Level, PriceLevelBook};
pub use checksum::{ChecksumKind, ChecksumValidator};
pub use config::{BackoffConfig, ExchangeKind, SyncConfig};
pub use error::{DecodeError, SnapshotError, SyncError, SyncResult};
pub use feed::{FeedDriver, FeedError};
pub use metrics::{MetricsSnapshot, SymbolHealth, SymbolMetrics};
pub use orchestrator::{RawOutcome, SyncOrchestrator};
pub use publisher::{BookMessage, BookPayload, EnhancedOrderBook, NormalizedPublisher, OrderBookDelta, UpdateType};
pub use reconciler::{BootstrapOutcome, ContinuityRule, GapReason, ReconcileOutcome, UpdateReconciler};
pub use registry::SyncRegistry;
pub use snapshot::{BinanceSnapshotLoader, SnapshotLoader, StreamSnapshotLoader};
pub use state::{SymbolSyncState, SyncStatus};
pub use update::{DecodedMessage, DepthUpdate, Snapshot};

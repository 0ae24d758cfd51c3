//! Synchronization orchestrator for one exchange/market pair
//!
//! Owns every [`SymbolSyncState`] of the pair, drives snapshot bootstrap,
//! routes incoming updates through the [`UpdateReconciler`] and schedules
//! resnapshots. Each symbol has its own lock; nothing is locked across
//! symbols and no lock is held across an await. Published records are built
//! under the symbol lock and handed to the bus after it is released.

use crate::book::Level;
use crate::checksum::ChecksumValidator;
use crate::config::{ExchangeKind, SyncConfig};
use crate::error::{SnapshotError, SyncError, SyncResult};
use crate::exchanges;
use crate::metrics::{SymbolHealth, SymbolMetrics};
use crate::publisher::{BookMessage, NormalizedPublisher, UpdateType};
use crate::reconciler::{BootstrapOutcome, GapReason, ReconcileOutcome, UpdateReconciler};
use crate::snapshot::SnapshotLoader;
use crate::state::{SymbolSyncState, SyncStatus};
use crate::update::{DecodedMessage, DepthUpdate, Snapshot};
use common::Ts;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use rustc_hash::FxBuildHasher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct SymbolEntry {
    state: Mutex<SymbolSyncState>,
    metrics: SymbolMetrics,
    fetch_task: Mutex<Option<JoinHandle<()>>>,
}

impl SymbolEntry {
    fn abort_fetch(&self) {
        if let Some(handle) = self.fetch_task.lock().take() {
            handle.abort();
        }
    }
}

struct Inner {
    config: SyncConfig,
    exchange: ExchangeKind,
    reconciler: UpdateReconciler,
    loader: Arc<dyn SnapshotLoader>,
    publisher: NormalizedPublisher,
    symbols: DashMap<String, Arc<SymbolEntry>, FxBuildHasher>,
    snapshot_permits: Arc<Semaphore>,
    stopped: AtomicBool,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

/// What a raw payload turned out to be
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutcome {
    /// Incremental update and how it was reconciled
    Update(ReconcileOutcome),
    /// Stream snapshot for the named symbol, handed to the loader
    Snapshot(String),
    /// Acks, events and other non-book traffic
    Ignored,
}

/// Per exchange/market synchronization engine
///
/// Cheap to clone; clones share the same symbol set.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("exchange", &self.inner.exchange)
            .field("market_type", &self.inner.config.market_type())
            .field("symbols", &self.inner.symbols.len())
            .finish_non_exhaustive()
    }
}

impl SyncOrchestrator {
    /// Build an orchestrator from validated configuration
    ///
    /// # Errors
    /// Returns `SyncError::InvalidConfig` if the configuration is unusable
    pub fn new(
        config: SyncConfig,
        loader: Arc<dyn SnapshotLoader>,
        publisher: NormalizedPublisher,
    ) -> SyncResult<Self> {
        config.validate()?;
        let exchange = config.exchange;
        let reconciler = UpdateReconciler::new(
            exchange.continuity_rule(),
            ChecksumValidator::new(config.checksum_kind(), config.checksum_depth),
        );
        let permits = Arc::new(Semaphore::new(config.max_concurrent_snapshots));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                exchange,
                reconciler,
                loader,
                publisher,
                symbols: DashMap::with_hasher(FxBuildHasher),
                snapshot_permits: permits,
                stopped: AtomicBool::new(false),
                refresh_task: Mutex::new(None),
            }),
        })
    }

    /// Exchange family
    #[must_use]
    pub fn exchange(&self) -> ExchangeKind {
        self.inner.exchange
    }

    /// Market type label
    #[must_use]
    pub fn market_type(&self) -> &str {
        self.inner.config.market_type()
    }

    /// Configuration in effect
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Subscribed symbols, sorted
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.inner.symbols.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Subscribe `symbols` and start the periodic full refresh
    ///
    /// Bootstrap runs concurrently for every symbol, bounded by the snapshot
    /// semaphore. Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// Returns `SyncError::Stopped` after `stop`, or `AlreadySubscribed`
    pub fn start(&self, symbols: &[String]) -> SyncResult<()> {
        for symbol in symbols {
            self.subscribe(symbol)?;
        }
        self.start_refresh();
        info!(
            exchange = %self.inner.exchange,
            market_type = self.market_type(),
            symbols = symbols.len(),
            "Orchestrator started"
        );
        Ok(())
    }

    /// Begin tracking `symbol`: `Unsynced -> SnapshotPending` and fetch
    ///
    /// # Errors
    /// Returns `SyncError::Stopped` after `stop`, or `AlreadySubscribed`
    pub fn subscribe(&self, symbol: &str) -> SyncResult<()> {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(SyncError::Stopped);
        }

        let entry = Arc::new(SymbolEntry {
            state: Mutex::new(SymbolSyncState::new(symbol, self.inner.config.pending_buffer_limit)),
            metrics: SymbolMetrics::new(),
            fetch_task: Mutex::new(None),
        });
        let epoch = entry.state.lock().begin_snapshot();

        match self.inner.symbols.entry(symbol.to_string()) {
            Entry::Occupied(_) => return Err(SyncError::AlreadySubscribed(symbol.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }

        info!(exchange = %self.inner.exchange, symbol, "Subscribed");
        Inner::spawn_bootstrap(&self.inner, &entry, symbol, epoch);
        Ok(())
    }

    /// Stop tracking `symbol`; cancels its in-flight fetch
    ///
    /// # Errors
    /// Returns `SyncError::UnknownSymbol` if the symbol is not subscribed
    pub fn unsubscribe(&self, symbol: &str) -> SyncResult<()> {
        let (_, entry) = self
            .inner
            .symbols
            .remove(symbol)
            .ok_or_else(|| SyncError::UnknownSymbol(symbol.to_string()))?;
        entry.abort_fetch();
        entry.state.lock().unsubscribe();
        info!(exchange = %self.inner.exchange, symbol, "Unsubscribed");
        Ok(())
    }

    /// Reconcile one decoded update and publish what it produced
    ///
    /// # Errors
    /// Returns `SyncError::UnknownSymbol` for symbols that are not subscribed
    pub fn handle_update(&self, update: DepthUpdate) -> SyncResult<ReconcileOutcome> {
        let entry = self.inner.entry(&update.symbol)?;
        let symbol = update.symbol.clone();
        let mut outgoing: Vec<BookMessage> = Vec::new();
        let mut refetch = None;

        let outcome = {
            let mut state = entry.state.lock();
            if state.status() == SyncStatus::Unsubscribed {
                return Err(SyncError::UnknownSymbol(symbol));
            }
            let was_synced = state.status() == SyncStatus::Synced;
            let outcome = self.inner.reconciler.reconcile(&mut state, update);

            match &outcome {
                ReconcileOutcome::Applied(applied) => {
                    entry.metrics.inc_applied();
                    outgoing.push(self.inner.publisher.build_delta(applied));
                    if self.inner.config.publish_full_on_update {
                        outgoing.push(self.inner.publisher.build_full(&state, UpdateType::Update));
                    }
                }
                ReconcileOutcome::Buffered => entry.metrics.inc_buffered(),
                ReconcileOutcome::Stale => entry.metrics.inc_stale(),
                ReconcileOutcome::GapDetected(reason) => {
                    count_gap(&entry.metrics, reason);
                    let epoch = if was_synced {
                        entry.metrics.inc_resync();
                        state.begin_resync()
                    } else {
                        state.schedule_refetch()
                    };
                    warn!(
                        exchange = %self.inner.exchange,
                        symbol = %symbol,
                        %reason,
                        epoch,
                        consecutive_errors = state.consecutive_error_count(),
                        "Scheduling resnapshot"
                    );
                    refetch = Some(epoch);
                }
            }
            outcome
        };

        self.inner.send_all(&entry, outgoing);
        if let Some(epoch) = refetch {
            Inner::spawn_bootstrap(&self.inner, &entry, &symbol, epoch);
        }
        Ok(outcome)
    }

    /// Decode a raw feed payload and route it
    ///
    /// A payload that fails to decode is fatal for the symbol it names: the
    /// symbol is marked unhealthy, others continue.
    ///
    /// # Errors
    /// Returns `SyncError::Decode` for malformed payloads and
    /// `SyncError::UnknownSymbol` for symbols that are not subscribed
    pub fn handle_raw(&self, payload: &str) -> SyncResult<RawOutcome> {
        match exchanges::decode(self.inner.exchange, payload) {
            Ok(DecodedMessage::Update(update)) => self.handle_update(update).map(RawOutcome::Update),
            Ok(DecodedMessage::Snapshot(snapshot)) => {
                let symbol = snapshot.symbol.clone();
                self.handle_stream_snapshot(snapshot)?;
                Ok(RawOutcome::Snapshot(symbol))
            }
            Ok(DecodedMessage::Ignored) => Ok(RawOutcome::Ignored),
            Err(err) => {
                let symbol = exchanges::symbol_hint(self.inner.exchange, payload);
                match symbol.as_deref().map(|s| (s, self.inner.entry(s))) {
                    Some((symbol, Ok(entry))) => {
                        entry.metrics.inc_fatal();
                        entry.state.lock().mark_unhealthy();
                        error!(exchange = %self.inner.exchange, symbol, error = %err, "Malformed payload");
                    }
                    _ => error!(exchange = %self.inner.exchange, error = %err, "Malformed payload"),
                }
                Err(err.into())
            }
        }
    }

    /// Route a snapshot pushed over the stream to the loader
    ///
    /// A pushed snapshot restarts the exchange's sequence chain, so a synced
    /// symbol is resynced from it.
    ///
    /// # Errors
    /// Returns `SyncError::UnknownSymbol` for symbols that are not subscribed
    pub fn handle_stream_snapshot(&self, snapshot: Snapshot) -> SyncResult<()> {
        let entry = self.inner.entry(&snapshot.symbol)?;
        let symbol = snapshot.symbol.clone();

        let refetch = {
            let mut state = entry.state.lock();
            match state.status() {
                SyncStatus::Synced => {
                    entry.metrics.inc_resync();
                    Some(state.begin_resync())
                }
                SyncStatus::Unsubscribed => return Err(SyncError::UnknownSymbol(symbol)),
                _ => None,
            }
        };

        if !self.inner.loader.offer_stream_snapshot(snapshot) {
            debug!(symbol = %symbol, "Loader does not take stream snapshots");
        }
        if let Some(epoch) = refetch {
            info!(symbol = %symbol, "Stream snapshot on synced symbol, resyncing");
            Inner::spawn_bootstrap(&self.inner, &entry, &symbol, epoch);
        }
        Ok(())
    }

    /// The transport reconnected: every symbol goes back through resync
    pub fn on_reconnect(&self) {
        let entries: Vec<(String, Arc<SymbolEntry>)> = self
            .inner
            .symbols
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        for (symbol, entry) in entries {
            let epoch = {
                let mut state = entry.state.lock();
                match state.status() {
                    SyncStatus::Unsubscribed => continue,
                    SyncStatus::Synced => {
                        entry.metrics.inc_resync();
                        state.begin_resync()
                    }
                    _ => state.schedule_refetch(),
                }
            };
            Inner::spawn_bootstrap(&self.inner, &entry, &symbol, epoch);
        }
        info!(exchange = %self.inner.exchange, "Reconnected, resyncing all symbols");
    }

    /// Publish a `full_refresh` book for every synced symbol
    pub fn publish_full_refresh(&self) {
        self.inner.publish_full_refresh();
    }

    /// Cancel every task and discard all state
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.snapshot_permits.close();
        if let Some(handle) = self.inner.refresh_task.lock().take() {
            handle.abort();
        }

        let symbols: Vec<String> = self.inner.symbols.iter().map(|e| e.key().clone()).collect();
        for symbol in symbols {
            if let Some((_, entry)) = self.inner.symbols.remove(&symbol) {
                entry.abort_fetch();
                entry.state.lock().unsubscribe();
            }
        }
        info!(exchange = %self.inner.exchange, "Orchestrator stopped");
    }

    /// Whether `stop` has been called
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Health of every symbol, sorted by symbol
    #[must_use]
    pub fn health(&self) -> Vec<SymbolHealth> {
        let mut report: Vec<SymbolHealth> = self
            .inner
            .symbols
            .iter()
            .map(|e| SymbolHealth::from_state(&e.value().state.lock(), &e.value().metrics))
            .collect();
        report.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        report
    }

    /// Health of one symbol
    #[must_use]
    pub fn symbol_health(&self, symbol: &str) -> Option<SymbolHealth> {
        let entry = self.inner.entry(symbol).ok()?;
        let state = entry.state.lock();
        Some(SymbolHealth::from_state(&state, &entry.metrics))
    }

    /// Status of one symbol
    #[must_use]
    pub fn status(&self, symbol: &str) -> Option<SyncStatus> {
        let entry = self.inner.entry(symbol).ok()?;
        let status = entry.state.lock().status();
        Some(status)
    }

    /// Top `depth` levels of both sides, best-first
    ///
    /// # Errors
    /// Returns `SyncError::UnknownSymbol` if the symbol is not subscribed
    pub fn top_levels(&self, symbol: &str, depth: usize) -> SyncResult<(Vec<Level>, Vec<Level>)> {
        let entry = self.inner.entry(symbol)?;
        let state = entry.state.lock();
        Ok((state.bids().top(depth), state.asks().top(depth)))
    }

    fn start_refresh(&self) {
        let Some(period) = self.inner.config.refresh_interval() else {
            return;
        };
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.stopped.load(Ordering::Acquire) {
                    break;
                }
                inner.publish_full_refresh();
            }
        });
        if let Some(old) = self.inner.refresh_task.lock().replace(handle) {
            old.abort();
        }
    }
}

fn count_gap(metrics: &SymbolMetrics, reason: &GapReason) {
    metrics.inc_gap();
    match reason {
        GapReason::ChecksumMismatch { .. } => metrics.inc_checksum_mismatch(),
        GapReason::BufferOverflow => metrics.inc_buffer_overflow(),
        GapReason::Sequence { .. } => {}
    }
}

impl Inner {
    fn entry(&self, symbol: &str) -> SyncResult<Arc<SymbolEntry>> {
        self.symbols
            .get(symbol)
            .map(|e| e.value().clone())
            .ok_or_else(|| SyncError::UnknownSymbol(symbol.to_string()))
    }

    fn send_all(&self, entry: &SymbolEntry, messages: Vec<BookMessage>) {
        for message in messages {
            let subject = message.subject.clone();
            if let Err(err) = self.publisher.send(message) {
                entry.metrics.inc_publish_failure();
                warn!(subject = %subject, error = %err, "Publish failed");
            }
        }
    }

    fn publish_full_refresh(&self) {
        let entries: Vec<Arc<SymbolEntry>> = self.symbols.iter().map(|e| e.value().clone()).collect();
        for entry in entries {
            let message = {
                let state = entry.state.lock();
                if state.status() != SyncStatus::Synced {
                    continue;
                }
                self.publisher.build_full(&state, UpdateType::FullRefresh)
            };
            self.send_all(&entry, vec![message]);
        }
    }

    /// Replace the symbol's fetch task with a new one for `epoch`
    ///
    /// The epoch is rechecked under the task slot lock so a caller holding an
    /// older epoch can never abort the task of a newer one.
    fn spawn_bootstrap(inner: &Arc<Self>, entry: &Arc<SymbolEntry>, symbol: &str, epoch: u64) {
        if inner.stopped.load(Ordering::Acquire) {
            return;
        }
        let mut slot = entry.fetch_task.lock();
        let current = entry.state.lock().epoch();
        if current != epoch {
            debug!(symbol, epoch, current, "Skipping superseded bootstrap");
            return;
        }
        let task = Self::bootstrap(inner.clone(), entry.clone(), symbol.to_string(), epoch);
        if let Some(old) = slot.replace(tokio::spawn(task)) {
            old.abort();
        }
    }

    /// Fetch, seed and replay until synced, superseded or the symbol is unknown
    async fn bootstrap(inner: Arc<Self>, entry: Arc<SymbolEntry>, symbol: String, mut epoch: u64) {
        let mut attempt: u32 = 0;
        loop {
            if !entry.state.lock().mark_snapshot_pending(epoch) {
                debug!(symbol = %symbol, epoch, "Bootstrap superseded");
                return;
            }

            let Some(result) = inner.fetch(&symbol).await else {
                return;
            };

            let snapshot = match result {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    entry.metrics.inc_snapshot_failure();
                    entry.state.lock().record_failure();
                    if !err.is_retryable() {
                        entry.state.lock().mark_unhealthy();
                        error!(exchange = %inner.exchange, symbol = %symbol, error = %err, "Snapshot not available, giving up");
                        return;
                    }
                    let delay = inner.config.backoff.delay_with_hint(attempt, err.retry_hint());
                    warn!(
                        symbol = %symbol,
                        error = %err,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Snapshot fetch failed, retrying"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(delay).await;
                    continue;
                }
            };

            let snapshot_id = snapshot.snapshot_id;
            let (outcome, message) = {
                let mut state = entry.state.lock();
                if state.epoch() != epoch || state.status() != SyncStatus::SnapshotPending {
                    debug!(symbol = %symbol, epoch, "Discarding superseded snapshot");
                    return;
                }
                let outcome = inner.reconciler.bootstrap(&mut state, &snapshot, Ts::now());
                let message = match outcome {
                    BootstrapOutcome::Synced { .. } => {
                        Some(inner.publisher.build_full(&state, UpdateType::Snapshot))
                    }
                    BootstrapOutcome::Gap(_) => {
                        epoch = state.epoch();
                        None
                    }
                };
                (outcome, message)
            };
            entry.metrics.inc_snapshot_loaded();

            match outcome {
                BootstrapOutcome::Synced { replayed, discarded } => {
                    entry.metrics.add_applied(replayed as u64);
                    entry.metrics.add_stale(discarded as u64);
                    info!(
                        exchange = %inner.exchange,
                        symbol = %symbol,
                        snapshot_id,
                        replayed,
                        discarded,
                        "Book synchronized"
                    );
                    inner.send_all(&entry, message.into_iter().collect());
                    return;
                }
                BootstrapOutcome::Gap(reason) => {
                    count_gap(&entry.metrics, &reason);
                    let delay = inner.config.backoff.delay(attempt);
                    warn!(symbol = %symbol, snapshot_id, %reason, "Snapshot does not join the stream, refetching");
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One fetch attempt under the rate-limit semaphore and hard timeout
    ///
    /// `None` means the orchestrator is stopping.
    async fn fetch(&self, symbol: &str) -> Option<Result<Snapshot, SnapshotError>> {
        let _permit = self.snapshot_permits.acquire().await.ok()?;
        let depth = self.config.depth_limit().min(self.loader.max_depth());
        let result = tokio::time::timeout(
            self.config.snapshot_timeout(),
            self.loader.fetch_snapshot(symbol, depth),
        )
        .await
        .unwrap_or(Err(SnapshotError::Timeout));
        Some(result)
    }
}

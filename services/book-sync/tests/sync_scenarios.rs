//! End-to-end synchronization scenarios through the orchestrator
//!
//! Snapshots come from a scripted loader; records are read back from the bus.

use async_trait::async_trait;
use book_sync::{
    BookMessage, BookPayload, ChecksumKind, ChecksumValidator, ContinuityRule, DepthUpdate,
    ExchangeKind, GapReason, Level, NormalizedPublisher, RawOutcome, ReconcileOutcome, Snapshot,
    SnapshotError, SnapshotLoader, StreamSnapshotLoader, SymbolSyncState, SyncConfig,
    SyncOrchestrator, SyncStatus, UpdateReconciler, UpdateType,
};
use bus::{Bus, Receiver, Subscriber};
use common::{Px, Qty, Ts};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn level(price: &str, qty: &str) -> Level {
    Level::new(
        price.parse().unwrap_or(Px::ZERO),
        qty.parse().unwrap_or(Qty::ZERO),
    )
}

fn snapshot(symbol: &str, snapshot_id: u64) -> Snapshot {
    Snapshot {
        symbol: symbol.to_string(),
        bids: vec![level("100", "2")],
        asks: vec![level("101", "3")],
        snapshot_id,
        fetched_at: Ts::from_millis(1),
        checksum: None,
    }
}

fn snapshot_with(symbol: &str, snapshot_id: u64, bids: Vec<Level>, asks: Vec<Level>) -> Snapshot {
    Snapshot {
        bids,
        asks,
        ..snapshot(symbol, snapshot_id)
    }
}

fn update(first_id: u64, last_id: u64, bids: Vec<Level>) -> DepthUpdate {
    DepthUpdate {
        symbol: "BTCUSDT".to_string(),
        first_id,
        last_id,
        prev_id: None,
        bids,
        asks: Vec::new(),
        checksum: None,
        event_time: Ts::from_millis(1_700_000_000_000),
    }
}

/// Serves queued responses in order, repeating the last one
///
/// Fetches wait on `gate` until the test releases a permit.
struct ScriptedLoader {
    responses: Mutex<VecDeque<Result<Snapshot, SnapshotError>>>,
    gate: Option<Semaphore>,
    calls: AtomicUsize,
}

impl ScriptedLoader {
    fn new(responses: Vec<Result<Snapshot, SnapshotError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn gated(responses: Vec<Result<Snapshot, SnapshotError>>) -> Self {
        Self {
            gate: Some(Semaphore::new(0)),
            ..Self::new(responses)
        }
    }

    fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotLoader for ScriptedLoader {
    fn max_depth(&self) -> usize {
        1000
    }

    async fn fetch_snapshot(&self, _symbol: &str, _depth: usize) -> Result<Snapshot, SnapshotError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| SnapshotError::Transient("gate closed".to_string()))?
                .forget();
        }
        let mut responses = self.responses.lock();
        match responses.len() {
            0 => Err(SnapshotError::Transient("script exhausted".to_string())),
            1 => responses
                .front()
                .cloned()
                .unwrap_or_else(|| Err(SnapshotError::Transient("script exhausted".to_string()))),
            _ => responses
                .pop_front()
                .unwrap_or_else(|| Err(SnapshotError::Transient("script exhausted".to_string()))),
        }
    }
}

struct Harness {
    orchestrator: SyncOrchestrator,
    loader: Arc<ScriptedLoader>,
    rx: Receiver<BookMessage>,
    _bus: Bus<BookMessage>,
}

fn publisher_for(config: &SyncConfig, bus: &Bus<BookMessage>) -> NormalizedPublisher {
    NormalizedPublisher::new(
        config.exchange.exchange_name(),
        config.market_type(),
        &config.stream,
        &config.delta_stream,
        config.depth_limit(),
        ChecksumValidator::disabled(),
        Arc::new(bus.publisher()),
    )
}

fn harness(exchange: ExchangeKind, loader: ScriptedLoader) -> Result<Harness, Box<dyn std::error::Error>> {
    harness_with(SyncConfig::for_exchange(exchange), loader)
}

fn harness_with(config: SyncConfig, loader: ScriptedLoader) -> Result<Harness, Box<dyn std::error::Error>> {
    let bus = Bus::new(256);
    let rx = bus.subscriber().subscribe()?;
    let publisher = publisher_for(&config, &bus);
    let loader = Arc::new(loader);
    let orchestrator = SyncOrchestrator::new(config, loader.clone(), publisher)?;
    Ok(Harness {
        orchestrator,
        loader,
        rx,
        _bus: bus,
    })
}

async fn wait_for(orchestrator: &SyncOrchestrator, symbol: &str, status: SyncStatus) -> bool {
    for _ in 0..2000 {
        if orchestrator.status(symbol) == Some(status) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

async fn synced_harness() -> Result<Harness, Box<dyn std::error::Error>> {
    let h = harness(
        ExchangeKind::BinanceSpot,
        ScriptedLoader::new(vec![Ok(snapshot("BTCUSDT", 50)), Ok(snapshot("BTCUSDT", 70))]),
    )?;
    h.orchestrator.start(&["BTCUSDT".to_string()])?;
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    let _ = h.rx.drain();
    Ok(h)
}

#[tokio::test]
async fn test_clean_bootstrap_then_apply() -> TestResult {
    let h = synced_harness().await?;

    let outcome = h.orchestrator.handle_update(update(51, 51, vec![level("100", "1")]))?;
    assert!(matches!(outcome, ReconcileOutcome::Applied(_)));

    let (bids, asks) = h.orchestrator.top_levels("BTCUSDT", 10)?;
    assert_eq!(bids, vec![level("100", "1")]);
    assert_eq!(asks, vec![level("101", "3")]);

    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert_eq!(health.last_applied_id, Some(51));
    assert_eq!(health.counters.updates_applied, 1);

    let records = h.rx.drain();
    assert_eq!(records.len(), 1);
    let BookPayload::Delta(delta) = &records[0].payload else {
        return Err("expected a delta".into());
    };
    assert_eq!((delta.first_update_id, delta.last_update_id), (51, 51));
    assert_eq!(records[0].subject, "orderbook_delta.binance.spot.BTCUSDT");

    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_zero_quantity_removes_level() -> TestResult {
    let h = synced_harness().await?;
    h.orchestrator.handle_update(update(51, 51, vec![level("100", "1")]))?;
    h.orchestrator.handle_update(update(52, 52, vec![level("100", "0")]))?;

    let (bids, _) = h.orchestrator.top_levels("BTCUSDT", 10)?;
    assert!(bids.is_empty());
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_range_gap_triggers_resync() -> TestResult {
    let h = harness(
        ExchangeKind::BinanceSpot,
        ScriptedLoader::new(vec![
            Ok(snapshot("BTCUSDT", 50)),
            Ok(snapshot_with("BTCUSDT", 70, vec![level("98", "4")], vec![level("102", "1")])),
        ]),
    )?;
    h.orchestrator.start(&["BTCUSDT".to_string()])?;
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    h.orchestrator.handle_update(update(51, 51, vec![level("100", "1"), level("97", "6")]))?;

    let outcome = h.orchestrator.handle_update(update(60, 61, vec![level("99", "1")]))?;
    assert!(matches!(
        outcome,
        ReconcileOutcome::GapDetected(GapReason::Sequence { last_applied: 51, first_id: 60, .. })
    ));
    assert_eq!(h.orchestrator.status("BTCUSDT"), Some(SyncStatus::Resyncing));

    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert_eq!(health.last_applied_id, Some(70));
    assert_eq!(health.resync_count, 1);
    assert_eq!(health.counters.gaps_detected, 1);
    assert_eq!(health.counters.resyncs, 1);
    assert_eq!(h.loader.calls(), 2);

    // Nothing from the pre-gap book survives the resync
    let (bids, asks) = h.orchestrator.top_levels("BTCUSDT", 10)?;
    assert_eq!(bids, vec![level("98", "4")]);
    assert_eq!(asks, vec![level("102", "1")]);

    let snapshots = h
        .rx
        .drain()
        .into_iter()
        .filter(|m| matches!(&m.payload, BookPayload::Full(b) if b.update_type == UpdateType::Snapshot))
        .count();
    assert_eq!(snapshots, 2);
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_updates_buffered_until_snapshot() -> TestResult {
    let h = harness(
        ExchangeKind::BinanceSpot,
        ScriptedLoader::gated(vec![Ok(snapshot("BTCUSDT", 50))]),
    )?;
    h.orchestrator.subscribe("BTCUSDT")?;
    assert_eq!(h.orchestrator.status("BTCUSDT"), Some(SyncStatus::SnapshotPending));

    for u in [
        update(45, 48, vec![level("98", "9")]),
        update(49, 52, vec![level("100", "5")]),
        update(53, 55, vec![level("99", "4")]),
    ] {
        assert_eq!(h.orchestrator.handle_update(u)?, ReconcileOutcome::Buffered);
    }

    h.loader.release();
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);

    let (bids, _) = h.orchestrator.top_levels("BTCUSDT", 10)?;
    assert_eq!(bids, vec![level("100", "5"), level("99", "4")]);

    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert_eq!(health.last_applied_id, Some(55));
    assert_eq!(health.counters.updates_buffered, 3);
    assert_eq!(health.counters.updates_applied, 2);
    assert_eq!(health.counters.updates_stale, 1);
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_buffer_overflow_restarts_fetch() -> TestResult {
    let config = SyncConfig {
        pending_buffer_limit: 2,
        ..SyncConfig::for_exchange(ExchangeKind::BinanceSpot)
    };
    let h = harness_with(config, ScriptedLoader::gated(vec![Ok(snapshot("BTCUSDT", 50))]))?;
    h.orchestrator.subscribe("BTCUSDT")?;
    for _ in 0..400 {
        if h.loader.calls() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.loader.calls(), 1);

    for id in [51, 52] {
        assert_eq!(h.orchestrator.handle_update(update(id, id, Vec::new()))?, ReconcileOutcome::Buffered);
    }
    assert_eq!(
        h.orchestrator.handle_update(update(53, 53, vec![level("99", "1")]))?,
        ReconcileOutcome::GapDetected(GapReason::BufferOverflow)
    );
    assert_eq!(h.orchestrator.status("BTCUSDT"), Some(SyncStatus::SnapshotPending));

    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert_eq!(health.counters.buffer_overflows, 1);
    assert_eq!(health.counters.gaps_detected, 1);
    assert_eq!(health.consecutive_error_count, 1);

    // The parked fetch is replaced by one for the new epoch
    for _ in 0..400 {
        if h.loader.calls() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(h.loader.calls(), 2);

    h.loader.release();
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert_eq!(health.last_applied_id, Some(50));
    assert_eq!(health.counters.snapshots_loaded, 1);
    let (bids, _) = h.orchestrator.top_levels("BTCUSDT", 10)?;
    assert_eq!(bids, vec![level("100", "2")]);
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_futures_first_event_chains_on_snapshot() -> TestResult {
    let h = harness(
        ExchangeKind::BinanceFutures,
        ScriptedLoader::new(vec![Ok(snapshot("BTCUSDT", 100))]),
    )?;
    h.orchestrator.subscribe("BTCUSDT")?;
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);

    let first = DepthUpdate {
        prev_id: Some(100),
        ..update(150, 160, vec![level("100", "4")])
    };
    assert!(matches!(h.orchestrator.handle_update(first)?, ReconcileOutcome::Applied(_)));

    let chained = DepthUpdate {
        prev_id: Some(160),
        ..update(175, 180, vec![level("99", "1")])
    };
    assert!(matches!(h.orchestrator.handle_update(chained)?, ReconcileOutcome::Applied(_)));

    let (bids, _) = h.orchestrator.top_levels("BTCUSDT", 10)?;
    assert_eq!(bids, vec![level("100", "4"), level("99", "1")]);

    // Range fits but pu does not chain: a gap once the first event is in
    let broken = DepthUpdate {
        prev_id: Some(179),
        ..update(181, 185, Vec::new())
    };
    assert!(matches!(
        h.orchestrator.handle_update(broken)?,
        ReconcileOutcome::GapDetected(GapReason::Sequence { last_applied: 180, .. })
    ));
    assert_eq!(h.orchestrator.status("BTCUSDT"), Some(SyncStatus::Resyncing));
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_stale_updates_do_not_publish() -> TestResult {
    let h = synced_harness().await?;
    assert_eq!(
        h.orchestrator.handle_update(update(40, 50, vec![level("1", "1")]))?,
        ReconcileOutcome::Stale
    );
    assert!(h.rx.drain().is_empty());
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_rate_limited_fetch_is_retried() -> TestResult {
    let h = harness(
        ExchangeKind::BinanceSpot,
        ScriptedLoader::new(vec![
            Err(SnapshotError::RateLimited {
                retry_after: Some(Duration::from_secs(5)),
            }),
            Err(SnapshotError::Transient("HTTP 502".to_string())),
            Ok(snapshot("BTCUSDT", 50)),
        ]),
    )?;
    h.orchestrator.subscribe("BTCUSDT")?;

    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    assert_eq!(h.loader.calls(), 3);
    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert_eq!(health.counters.snapshot_failures, 2);
    assert_eq!(health.counters.snapshots_loaded, 1);
    assert!(health.healthy);
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_unknown_symbol_marks_unhealthy() -> TestResult {
    let h = harness(
        ExchangeKind::BinanceSpot,
        ScriptedLoader::new(vec![Err(SnapshotError::NotFound("NOPEUSDT".to_string()))]),
    )?;
    h.orchestrator.subscribe("NOPEUSDT")?;

    for _ in 0..400 {
        if h.orchestrator.symbol_health("NOPEUSDT").is_some_and(|s| !s.healthy) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let health = h.orchestrator.symbol_health("NOPEUSDT").ok_or("no health")?;
    assert!(!health.healthy);
    assert_eq!(health.status, SyncStatus::SnapshotPending);
    assert_eq!(h.loader.calls(), 1);
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_reconnect_resyncs_every_symbol() -> TestResult {
    let h = harness(
        ExchangeKind::BinanceSpot,
        ScriptedLoader::new(vec![Ok(snapshot("BTCUSDT", 50))]),
    )?;
    h.orchestrator.start(&["BTCUSDT".to_string(), "ETHUSDT".to_string()])?;
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    assert!(wait_for(&h.orchestrator, "ETHUSDT", SyncStatus::Synced).await);

    h.orchestrator.on_reconnect();
    assert_eq!(h.orchestrator.status("BTCUSDT"), Some(SyncStatus::Resyncing));
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    assert!(wait_for(&h.orchestrator, "ETHUSDT", SyncStatus::Synced).await);

    assert!(h.orchestrator.health().iter().all(|s| s.resync_count == 1));
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_raw_binance_payload_routed() -> TestResult {
    let h = synced_harness().await?;
    let payload = r#"{"stream":"btcusdt@depth@100ms","data":{"e":"depthUpdate","E":1700000000000,"s":"BTCUSDT","U":51,"u":53,"b":[["100.0","7"]],"a":[]}}"#;

    let outcome = h.orchestrator.handle_raw(payload)?;
    assert!(matches!(outcome, RawOutcome::Update(ReconcileOutcome::Applied(_))));
    let (bids, _) = h.orchestrator.top_levels("BTCUSDT", 1)?;
    assert_eq!(bids, vec![level("100", "7")]);

    assert!(h.orchestrator.handle_raw("not json").is_err());
    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert!(health.healthy);

    let bad = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":54,"u":54,"b":[["abc","1"]],"a":[]}"#;
    assert!(h.orchestrator.handle_raw(bad).is_err());
    let health = h.orchestrator.symbol_health("BTCUSDT").ok_or("no health")?;
    assert!(!health.healthy);
    assert_eq!(health.counters.fatal_errors, 1);
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_full_refresh_only_for_synced() -> TestResult {
    let h = harness(
        ExchangeKind::BinanceSpot,
        ScriptedLoader::gated(vec![Ok(snapshot("BTCUSDT", 50))]),
    )?;
    h.orchestrator.subscribe("BTCUSDT")?;
    h.orchestrator.publish_full_refresh();
    assert!(h.rx.drain().is_empty());

    h.loader.release();
    assert!(wait_for(&h.orchestrator, "BTCUSDT", SyncStatus::Synced).await);
    let _ = h.rx.drain();

    h.orchestrator.publish_full_refresh();
    let records = h.rx.drain();
    assert_eq!(records.len(), 1);
    assert!(matches!(
        &records[0].payload,
        BookPayload::Full(b) if b.update_type == UpdateType::FullRefresh && b.is_valid
    ));
    h.orchestrator.stop();
    Ok(())
}

#[tokio::test]
async fn test_unsubscribe_drops_state() -> TestResult {
    let h = synced_harness().await?;
    h.orchestrator.unsubscribe("BTCUSDT")?;
    assert_eq!(h.orchestrator.status("BTCUSDT"), None);
    assert!(h.orchestrator.handle_update(update(51, 51, Vec::new())).is_err());
    h.orchestrator.stop();
    Ok(())
}

fn okx_push(action: &str, seq_id: i64, prev_seq_id: i64, bids: &str, asks: &str) -> String {
    format!(
        r#"{{"arg":{{"channel":"books","instId":"BTC-USDT"}},"action":"{action}","data":[{{"asks":{asks},"bids":{bids},"ts":"1700000000000","prevSeqId":{prev_seq_id},"seqId":{seq_id}}}]}}"#
    )
}

#[tokio::test]
async fn test_okx_stream_snapshots_drive_sync() -> TestResult {
    let bus = Bus::new(256);
    let rx = bus.subscriber().subscribe()?;
    let config = SyncConfig::for_exchange(ExchangeKind::Okx);
    let publisher = publisher_for(&config, &bus);
    let (loader, mut requests) = StreamSnapshotLoader::new(ExchangeKind::Okx.max_snapshot_depth());
    let orchestrator = SyncOrchestrator::new(config, Arc::new(loader), publisher)?;

    orchestrator.subscribe("BTC-USDT")?;
    // The fetch task has not run yet: updates buffer and the snapshot parks
    let older = okx_push("update", 99, 98, r#"[["100","9","0","1"]]"#, "[]");
    let newer = okx_push("update", 101, 100, r#"[["100","5","0","1"]]"#, "[]");
    for payload in [&older, &newer] {
        assert_eq!(
            orchestrator.handle_raw(payload)?,
            RawOutcome::Update(ReconcileOutcome::Buffered)
        );
    }
    let first = okx_push("snapshot", 100, -1, r#"[["100","2","0","1"]]"#, r#"[["101","3","0","1"]]"#);
    assert_eq!(orchestrator.handle_raw(&first)?, RawOutcome::Snapshot("BTC-USDT".to_string()));

    assert!(wait_for(&orchestrator, "BTC-USDT", SyncStatus::Synced).await);
    let health = orchestrator.symbol_health("BTC-USDT").ok_or("no health")?;
    assert_eq!(health.last_applied_id, Some(101));
    assert_eq!(health.counters.updates_applied, 1);
    assert_eq!(health.counters.updates_stale, 1);
    let (bids, _) = orchestrator.top_levels("BTC-USDT", 10)?;
    assert_eq!(bids, vec![level("100", "5")]);
    // Served from the parked snapshot, no resubscribe needed
    assert!(requests.try_recv().is_err());

    // A new push on a synced symbol restarts the chain from it
    let second = okx_push("snapshot", 200, -1, r#"[["99","7","0","1"]]"#, r#"[["102","1","0","1"]]"#);
    assert_eq!(orchestrator.handle_raw(&second)?, RawOutcome::Snapshot("BTC-USDT".to_string()));
    assert_eq!(orchestrator.status("BTC-USDT"), Some(SyncStatus::Resyncing));

    assert!(wait_for(&orchestrator, "BTC-USDT", SyncStatus::Synced).await);
    let health = orchestrator.symbol_health("BTC-USDT").ok_or("no health")?;
    assert_eq!(health.last_applied_id, Some(200));
    assert_eq!(health.resync_count, 1);
    let (bids, asks) = orchestrator.top_levels("BTC-USDT", 10)?;
    assert_eq!(bids, vec![level("99", "7")]);
    assert_eq!(asks, vec![level("102", "1")]);
    assert!(requests.try_recv().is_err());

    let snapshots = rx
        .drain()
        .into_iter()
        .filter(|m| matches!(&m.payload, BookPayload::Full(b) if b.update_type == UpdateType::Snapshot))
        .count();
    assert_eq!(snapshots, 2);
    orchestrator.stop();
    Ok(())
}

fn okx_state(snapshot_id: u64) -> SymbolSyncState {
    let mut state = SymbolSyncState::new("BTC-USDT", 100);
    state.begin_snapshot();
    let reconciler = UpdateReconciler::new(ContinuityRule::Chain, ChecksumValidator::new(ChecksumKind::Crc32Interleaved, 25));
    let mut snap = snapshot("BTC-USDT", snapshot_id);
    snap.checksum = Some(-1_727_274_624);
    reconciler.bootstrap(&mut state, &snap, Ts::from_millis(2));
    state
}

fn okx_update(prev_id: u64, last_id: u64, bids: Vec<Level>, checksum: Option<i64>) -> DepthUpdate {
    DepthUpdate {
        symbol: "BTC-USDT".to_string(),
        first_id: last_id,
        last_id,
        prev_id: Some(prev_id),
        bids,
        asks: Vec::new(),
        checksum,
        event_time: Ts::from_millis(1),
    }
}

#[test]
fn test_chain_gap_detected() {
    let reconciler = UpdateReconciler::new(ContinuityRule::Chain, ChecksumValidator::disabled());
    let mut state = okx_state(51);
    assert_eq!(state.status(), SyncStatus::Synced);

    let outcome = reconciler.reconcile(&mut state, okx_update(55, 56, Vec::new(), None));
    assert!(matches!(
        outcome,
        ReconcileOutcome::GapDetected(GapReason::Sequence { last_applied: 51, prev_id: Some(55), .. })
    ));
    assert_eq!(state.consecutive_error_count(), 1);
}

#[test]
fn test_checksum_mismatch_rolls_back() {
    let reconciler = UpdateReconciler::new(
        ContinuityRule::Chain,
        ChecksumValidator::new(ChecksumKind::Crc32Interleaved, 25),
    );
    let mut state = okx_state(51);

    // Checksum of the book before the change
    let outcome = reconciler.reconcile(
        &mut state,
        okx_update(51, 52, vec![level("100", "1")], Some(-1_727_274_624)),
    );
    assert_eq!(
        outcome,
        ReconcileOutcome::GapDetected(GapReason::ChecksumMismatch {
            provided: -1_727_274_624,
            computed: Some(-1_461_454_051),
        })
    );
    assert_eq!(state.bids().top(5), vec![level("100", "2")]);
    assert_eq!(state.last_applied_id(), Some(51));

    let outcome = reconciler.reconcile(
        &mut state,
        okx_update(51, 52, vec![level("100", "1")], Some(-1_461_454_051)),
    );
    assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
    assert_eq!(state.bids().top(5), vec![level("100", "1")]);
}

//! Snapshot loaders
//!
//! A loader only talks to the exchange; it never touches symbol state.
//! Retries, backoff, timeouts and the rate-limiting semaphore belong to the
//! orchestrator.

use crate::config::ExchangeKind;
use crate::error::SnapshotError;
use crate::exchanges::binance;
use crate::update::Snapshot;
use async_trait::async_trait;
use common::Ts;
use parking_lot::Mutex;
use reqwest::StatusCode;
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Source of full point-in-time books
#[async_trait]
pub trait SnapshotLoader: Send + Sync {
    /// Largest depth this loader can serve
    fn max_depth(&self) -> usize;

    /// Fetch a snapshot of at most `depth` levels per side
    ///
    /// # Errors
    /// `RateLimited`, `NotFound` or `Transient` as reported by the exchange
    async fn fetch_snapshot(&self, symbol: &str, depth: usize) -> Result<Snapshot, SnapshotError>;

    /// Hand over a snapshot that arrived on the stream
    ///
    /// Returns true when the loader consumed it.
    fn offer_stream_snapshot(&self, _snapshot: Snapshot) -> bool {
        false
    }
}

/// Futures REST depth only accepts these limits
const FUTURES_LIMITS: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];

/// Binance REST depth loader (spot `/api/v3/depth`, futures `/fapi/v1/depth`)
#[derive(Debug, Clone)]
pub struct BinanceSnapshotLoader {
    client: reqwest::Client,
    base_url: String,
    exchange: ExchangeKind,
}

impl BinanceSnapshotLoader {
    /// Create a loader against `base_url`
    #[must_use]
    pub fn new(exchange: ExchangeKind, base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            exchange,
        }
    }

    fn depth_path(&self) -> &'static str {
        match self.exchange {
            ExchangeKind::BinanceFutures => "/fapi/v1/depth",
            ExchangeKind::BinanceSpot | ExchangeKind::Okx => "/api/v3/depth",
        }
    }

    /// Limit parameter actually sent for a requested depth
    #[must_use]
    pub fn request_limit(&self, depth: usize) -> usize {
        let depth = depth.clamp(1, self.max_depth());
        match self.exchange {
            ExchangeKind::BinanceFutures => FUTURES_LIMITS
                .iter()
                .copied()
                .find(|limit| *limit >= depth)
                .unwrap_or(1000),
            ExchangeKind::BinanceSpot | ExchangeKind::Okx => depth,
        }
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl SnapshotLoader for BinanceSnapshotLoader {
    fn max_depth(&self) -> usize {
        self.exchange.max_snapshot_depth()
    }

    async fn fetch_snapshot(&self, symbol: &str, depth: usize) -> Result<Snapshot, SnapshotError> {
        let url = format!("{}{}", self.base_url, self.depth_path());
        let limit = self.request_limit(depth);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_uppercase()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            return Err(SnapshotError::RateLimited {
                retry_after: retry_after(response.headers()),
            });
        }

        let body = response.text().await?;
        if !status.is_success() {
            let invalid_symbol = binance::decode_api_error(&body)
                .is_some_and(|err| err.code == binance::INVALID_SYMBOL);
            if invalid_symbol || status == StatusCode::NOT_FOUND {
                return Err(SnapshotError::NotFound(symbol.to_string()));
            }
            return Err(SnapshotError::Transient(format!("HTTP {status}: {body}")));
        }

        let snapshot = binance::decode_snapshot(symbol, &body, Ts::now())
            .map_err(|e| SnapshotError::Transient(e.to_string()))?;
        debug!(
            symbol,
            snapshot_id = snapshot.snapshot_id,
            bids = snapshot.bids.len(),
            asks = snapshot.asks.len(),
            "Fetched REST snapshot"
        );
        Ok(snapshot)
    }
}

/// Loader for exchanges that push snapshots over the stream (OKX)
///
/// A fetch asks the feed to resubscribe the symbol's book channel and waits
/// for the pushed snapshot. A snapshot nobody is waiting for is parked and
/// served by the next fetch of that symbol.
pub struct StreamSnapshotLoader {
    max_depth: usize,
    resubscribe: mpsc::UnboundedSender<String>,
    waiters: Mutex<FxHashMap<String, oneshot::Sender<Snapshot>>>,
    parked: Mutex<FxHashMap<String, Snapshot>>,
}

impl StreamSnapshotLoader {
    /// Create a loader and the receiver of resubscribe requests for the feed
    #[must_use]
    pub fn new(max_depth: usize) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let loader = Self {
            max_depth,
            resubscribe: tx,
            waiters: Mutex::new(FxHashMap::default()),
            parked: Mutex::new(FxHashMap::default()),
        };
        (loader, rx)
    }

    /// Number of fetches waiting for a pushed snapshot
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Forget a parked snapshot, e.g. after the connection dropped
    pub fn discard_parked(&self) {
        self.parked.lock().clear();
    }
}

#[async_trait]
impl SnapshotLoader for StreamSnapshotLoader {
    fn max_depth(&self) -> usize {
        self.max_depth
    }

    async fn fetch_snapshot(&self, symbol: &str, _depth: usize) -> Result<Snapshot, SnapshotError> {
        let parked = self.parked.lock().remove(symbol);
        if let Some(snapshot) = parked {
            debug!(symbol, snapshot_id = snapshot.snapshot_id, "Using parked stream snapshot");
            return Ok(snapshot);
        }

        let (tx, rx) = oneshot::channel();
        self.waiters.lock().insert(symbol.to_string(), tx);
        if self.resubscribe.send(symbol.to_string()).is_err() {
            self.waiters.lock().remove(symbol);
            return Err(SnapshotError::Transient("feed is not running".to_string()));
        }

        rx.await
            .map_err(|_| SnapshotError::Transient("snapshot request superseded".to_string()))
    }

    fn offer_stream_snapshot(&self, snapshot: Snapshot) -> bool {
        let waiter = self.waiters.lock().remove(&snapshot.symbol);
        match waiter {
            Some(tx) => match tx.send(snapshot) {
                Ok(()) => true,
                Err(snapshot) => {
                    self.parked.lock().insert(snapshot.symbol.clone(), snapshot);
                    true
                }
            },
            None => {
                self.parked.lock().insert(snapshot.symbol.clone(), snapshot);
                true
            }
        }
    }
}

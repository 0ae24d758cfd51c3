//! Static configuration consumed by the synchronization engine

use crate::checksum::ChecksumKind;
use crate::error::SyncError;
use crate::reconciler::ContinuityRule;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Exchange protocol family
///
/// Selects the continuity rule, checksum algorithm and depth cap once at
/// construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Binance spot: `U`/`u` id ranges
    BinanceSpot,
    /// Binance USD-M futures: ranges, then `pu` chaining
    BinanceFutures,
    /// OKX v5: `seqId`/`prevSeqId` chaining plus CRC32 checksum
    Okx,
}

impl ExchangeKind {
    /// Exchange name used in published subjects
    #[must_use]
    pub const fn exchange_name(&self) -> &'static str {
        match self {
            Self::BinanceSpot | Self::BinanceFutures => "binance",
            Self::Okx => "okx",
        }
    }

    /// Market type used when the config does not name one
    #[must_use]
    pub const fn default_market_type(&self) -> &'static str {
        match self {
            Self::BinanceSpot | Self::Okx => "spot",
            Self::BinanceFutures => "futures",
        }
    }

    /// Continuity rule for this protocol
    #[must_use]
    pub const fn continuity_rule(&self) -> ContinuityRule {
        match self {
            Self::BinanceSpot => ContinuityRule::Range,
            Self::BinanceFutures => ContinuityRule::Hybrid,
            Self::Okx => ContinuityRule::Chain,
        }
    }

    /// Checksum algorithm for this protocol
    #[must_use]
    pub const fn checksum_kind(&self) -> ChecksumKind {
        match self {
            Self::BinanceSpot | Self::BinanceFutures => ChecksumKind::None,
            Self::Okx => ChecksumKind::Crc32Interleaved,
        }
    }

    /// Largest snapshot depth the exchange serves
    #[must_use]
    pub const fn max_snapshot_depth(&self) -> usize {
        match self {
            Self::BinanceSpot => 5000,
            Self::BinanceFutures => 1000,
            Self::Okx => 400,
        }
    }

    /// Depth requested when the config does not set one
    #[must_use]
    pub const fn default_depth(&self) -> usize {
        match self {
            Self::BinanceSpot | Self::BinanceFutures => 1000,
            Self::Okx => 400,
        }
    }

    /// Default REST base URL
    #[must_use]
    pub const fn default_rest_url(&self) -> &'static str {
        match self {
            Self::BinanceSpot => "https://api.binance.com",
            Self::BinanceFutures => "https://fapi.binance.com",
            Self::Okx => "https://www.okx.com",
        }
    }

    /// Default WebSocket URL
    #[must_use]
    pub const fn default_ws_url(&self) -> &'static str {
        match self {
            Self::BinanceSpot => "wss://stream.binance.com:9443/stream",
            Self::BinanceFutures => "wss://fstream.binance.com/stream",
            Self::Okx => "wss://ws.okx.com:8443/ws/v5/public",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BinanceSpot => write!(f, "binance_spot"),
            Self::BinanceFutures => write!(f, "binance_futures"),
            Self::Okx => write!(f, "okx"),
        }
    }
}

/// Exponential backoff for snapshot retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// First retry delay in milliseconds
    pub base_ms: u64,
    /// Multiplier applied per attempt
    pub factor: u32,
    /// Upper bound on any single delay in milliseconds
    pub cap_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            factor: 2,
            cap_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (0-based), capped
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let multiplier = u64::from(self.factor).saturating_pow(attempt);
        Duration::from_millis(self.base_ms.saturating_mul(multiplier).min(self.cap_ms))
    }

    /// Delay honoring a server hint: never shorter than the hint
    #[must_use]
    pub fn delay_with_hint(&self, attempt: u32, hint: Option<Duration>) -> Duration {
        let computed = self.delay(attempt);
        hint.map_or(computed, |hint| computed.max(hint))
    }
}

/// Synchronization engine configuration for one exchange/market pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Exchange protocol family
    pub exchange: ExchangeKind,
    /// Market type label (`spot`, `futures`, `swap`, ...)
    pub market_type: Option<String>,
    /// Snapshot depth to request (capped per exchange)
    pub depth_limit: Option<usize>,
    /// Full refresh publish interval in seconds (0 disables)
    pub snapshot_refresh_interval_secs: u64,
    /// Maximum updates held while a snapshot is pending
    pub pending_buffer_limit: usize,
    /// Concurrent snapshot fetches allowed
    pub max_concurrent_snapshots: usize,
    /// Hard timeout for one snapshot fetch in milliseconds
    pub snapshot_timeout_ms: u64,
    /// Retry backoff
    pub backoff: BackoffConfig,
    /// Levels per side covered by the checksum
    pub checksum_depth: usize,
    /// Subject prefix for full books
    pub stream: String,
    /// Subject prefix for deltas
    pub delta_stream: String,
    /// Also publish the full book after every applied update
    pub publish_full_on_update: bool,
    /// REST base URL override
    pub rest_url: Option<String>,
    /// WebSocket URL override
    pub ws_url: Option<String>,
    /// Symbols to subscribe at start
    pub symbols: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeKind::BinanceSpot,
            market_type: None,
            depth_limit: None,
            snapshot_refresh_interval_secs: 0,
            pending_buffer_limit: 1_000,
            max_concurrent_snapshots: 10,
            snapshot_timeout_ms: 10_000,
            backoff: BackoffConfig::default(),
            checksum_depth: 25,
            stream: "orderbook".to_string(),
            delta_stream: "orderbook_delta".to_string(),
            publish_full_on_update: false,
            rest_url: None,
            ws_url: None,
            symbols: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Default configuration for an exchange family
    #[must_use]
    pub fn for_exchange(exchange: ExchangeKind) -> Self {
        Self {
            exchange,
            ..Self::default()
        }
    }

    /// Load configuration from file, then `BOOK_SYNC_*` environment variables
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or does not deserialize
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("BOOK_SYNC").separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Reject configurations the engine cannot run with
    ///
    /// # Errors
    /// Returns `SyncError::InvalidConfig` naming the first bad field
    pub fn validate(&self) -> Result<(), SyncError> {
        let invalid = |msg: String| Err(SyncError::InvalidConfig(msg));

        let depth = self.depth_limit();
        if depth == 0 {
            return invalid("depth_limit must be positive".to_string());
        }
        if depth > self.exchange.max_snapshot_depth() {
            return invalid(format!(
                "depth_limit {} exceeds {} cap of {}",
                depth,
                self.exchange,
                self.exchange.max_snapshot_depth()
            ));
        }
        if self.pending_buffer_limit == 0 {
            return invalid("pending_buffer_limit must be positive".to_string());
        }
        if self.max_concurrent_snapshots == 0 {
            return invalid("max_concurrent_snapshots must be positive".to_string());
        }
        if self.snapshot_timeout_ms == 0 {
            return invalid("snapshot_timeout_ms must be positive".to_string());
        }
        if self.backoff.base_ms == 0 || self.backoff.factor == 0 {
            return invalid("backoff base_ms and factor must be positive".to_string());
        }
        if self.backoff.cap_ms < self.backoff.base_ms {
            return invalid("backoff cap_ms must not be below base_ms".to_string());
        }
        if self.checksum_kind() != ChecksumKind::None && self.checksum_depth == 0 {
            return invalid("checksum_depth must be positive".to_string());
        }
        if self.stream.is_empty() || self.delta_stream.is_empty() {
            return invalid("stream names must not be empty".to_string());
        }
        check_url("rest_url", self.rest_url(), &["http", "https"])?;
        check_url("ws_url", self.ws_url(), &["ws", "wss"])?;
        Ok(())
    }

    /// Market type label
    #[must_use]
    pub fn market_type(&self) -> &str {
        self.market_type
            .as_deref()
            .unwrap_or_else(|| self.exchange.default_market_type())
    }

    /// Snapshot depth to request
    #[must_use]
    pub fn depth_limit(&self) -> usize {
        self.depth_limit
            .unwrap_or_else(|| self.exchange.default_depth())
    }

    /// Checksum algorithm in effect
    #[must_use]
    pub const fn checksum_kind(&self) -> ChecksumKind {
        self.exchange.checksum_kind()
    }

    /// REST base URL
    #[must_use]
    pub fn rest_url(&self) -> &str {
        self.rest_url
            .as_deref()
            .unwrap_or_else(|| self.exchange.default_rest_url())
    }

    /// WebSocket URL
    #[must_use]
    pub fn ws_url(&self) -> &str {
        self.ws_url
            .as_deref()
            .unwrap_or_else(|| self.exchange.default_ws_url())
    }

    /// Snapshot fetch timeout
    #[must_use]
    pub const fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }

    /// Full refresh interval, `None` when disabled
    #[must_use]
    pub const fn refresh_interval(&self) -> Option<Duration> {
        if self.snapshot_refresh_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.snapshot_refresh_interval_secs))
        }
    }
}

fn check_url(field: &str, raw: &str, schemes: &[&str]) -> Result<(), SyncError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| SyncError::InvalidConfig(format!("{field} {raw:?}: {e}")))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(SyncError::InvalidConfig(format!(
            "{field} scheme {} not one of {schemes:?}",
            parsed.scheme()
        )));
    }
    Ok(())
}

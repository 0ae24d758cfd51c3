//! WebSocket feed driver
//!
//! Connects to the exchange, subscribes the book channels and hands every
//! text frame to [`SyncOrchestrator::handle_raw`]. Reconnects with the same
//! backoff policy as snapshot retries; every reconnect forces a resync of all
//! symbols since the transport guarantees nothing across connections.

use crate::config::{BackoffConfig, ExchangeKind};
use crate::error::SyncError;
use crate::exchanges::{binance, okx};
use crate::orchestrator::{RawOutcome, SyncOrchestrator};
use crate::snapshot::StreamSnapshotLoader;
use futures_util::{SinkExt, StreamExt};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

/// OKX drops connections idle for 30 seconds
const OKX_PING_INTERVAL: Duration = Duration::from_secs(20);

/// Feed session errors
#[derive(Debug, Error)]
pub enum FeedError {
    /// Transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Orchestrator refused to start
    #[error(transparent)]
    Sync(#[from] SyncError),
}

enum SessionEnd {
    Shutdown,
    Disconnected,
}

/// Subscribe requests to send right after connecting
#[must_use]
pub fn subscribe_messages(exchange: ExchangeKind, symbols: &[String]) -> Vec<String> {
    if symbols.is_empty() {
        return Vec::new();
    }
    match exchange {
        ExchangeKind::BinanceSpot | ExchangeKind::BinanceFutures => {
            vec![binance::subscribe_message(symbols, 1)]
        }
        ExchangeKind::Okx => vec![okx::subscribe_message(symbols)],
    }
}

/// Unsubscribe-then-subscribe requests that make the exchange push a fresh snapshot
#[must_use]
pub fn resubscribe_messages(exchange: ExchangeKind, symbol: &str) -> Vec<String> {
    let symbols = [symbol.to_string()];
    match exchange {
        ExchangeKind::BinanceSpot | ExchangeKind::BinanceFutures => vec![
            binance::unsubscribe_message(&symbols, 2),
            binance::subscribe_message(&symbols, 3),
        ],
        ExchangeKind::Okx => vec![
            okx::unsubscribe_message(&symbols),
            okx::subscribe_message(&symbols),
        ],
    }
}

/// Snapshots requested from the exchange and not yet pushed back
///
/// A request older than the snapshot timeout is treated as lost so the next
/// loader request sends the resubscribe again.
#[derive(Debug)]
struct AwaitingSnapshots {
    sent: FxHashMap<String, Instant>,
    timeout: Duration,
}

impl AwaitingSnapshots {
    fn new(timeout: Duration) -> Self {
        Self {
            sent: FxHashMap::default(),
            timeout,
        }
    }

    /// Record a request sent at `now` for every symbol
    fn requested<'a>(&mut self, symbols: impl IntoIterator<Item = &'a String>, now: Instant) {
        for symbol in symbols {
            self.sent.insert(symbol.clone(), now);
        }
    }

    /// Whether a resubscribe should go out for `symbol`; records it if so
    fn should_send(&mut self, symbol: &str, now: Instant) -> bool {
        match self.sent.get(symbol) {
            Some(at) if now.saturating_duration_since(*at) < self.timeout => false,
            _ => {
                self.sent.insert(symbol.to_string(), now);
                true
            }
        }
    }

    fn arrived(&mut self, symbol: &str) {
        self.sent.remove(symbol);
    }
}

async fn next_request(requests: &mut Option<mpsc::UnboundedReceiver<String>>) -> Option<String> {
    match requests {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Drives one exchange connection for one orchestrator
pub struct FeedDriver {
    orchestrator: SyncOrchestrator,
    symbols: Vec<String>,
    ws_url: String,
    backoff: BackoffConfig,
    stream_loader: Option<Arc<StreamSnapshotLoader>>,
    requests: Option<mpsc::UnboundedReceiver<String>>,
    started: bool,
}

impl FeedDriver {
    /// Create a driver for `orchestrator`, subscribing `symbols`
    #[must_use]
    pub fn new(orchestrator: SyncOrchestrator, symbols: Vec<String>) -> Self {
        let ws_url = orchestrator.config().ws_url().to_string();
        let backoff = orchestrator.config().backoff;
        Self {
            orchestrator,
            symbols,
            ws_url,
            backoff,
            stream_loader: None,
            requests: None,
            started: false,
        }
    }

    /// Serve resubscribe requests from a stream snapshot loader
    #[must_use]
    pub fn with_stream_loader(
        mut self,
        loader: Arc<StreamSnapshotLoader>,
        requests: mpsc::UnboundedReceiver<String>,
    ) -> Self {
        self.stream_loader = Some(loader);
        self.requests = Some(requests);
        self
    }

    /// Run until `shutdown` flips to true
    ///
    /// # Errors
    /// Returns an error only if the orchestrator cannot be started; transport
    /// errors are retried
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), FeedError> {
        let exchange = self.orchestrator.exchange();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.session(&mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Disconnected) => {
                    attempt = 0;
                    warn!(%exchange, "Feed disconnected");
                }
                Err(FeedError::Sync(err)) => return Err(FeedError::Sync(err)),
                Err(err) => warn!(%exchange, error = %err, attempt, "Feed connection failed"),
            }

            let delay = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(%exchange, "Feed stopped");
        Ok(())
    }

    async fn session(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<SessionEnd, FeedError> {
        let exchange = self.orchestrator.exchange();
        info!(%exchange, url = %self.ws_url, "Connecting");
        let (ws_stream, _) = connect_async(self.ws_url.as_str()).await?;
        let (mut write, mut read) = ws_stream.split();
        info!(%exchange, "Connected");

        if let Some(loader) = &self.stream_loader {
            loader.discard_parked();
        }

        let symbols = if self.started {
            self.orchestrator.symbols()
        } else {
            self.symbols.clone()
        };
        for message in subscribe_messages(exchange, &symbols) {
            write.send(Message::Text(message)).await?;
        }

        // Snapshots already requested by the subscribe above
        let mut awaiting = AwaitingSnapshots::new(self.orchestrator.config().snapshot_timeout());
        if exchange == ExchangeKind::Okx {
            awaiting.requested(&symbols, Instant::now());
        }

        if self.started {
            self.orchestrator.on_reconnect();
        } else {
            self.orchestrator.start(&symbols)?;
            self.started = true;
        }

        let mut ping = tokio::time::interval_at(
            Instant::now() + OKX_PING_INTERVAL,
            OKX_PING_INTERVAL,
        );
        let keepalive = exchange == ExchangeKind::Okx;

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.on_text(&text, &mut awaiting),
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        info!(%exchange, "WebSocket closed by server");
                        return Ok(SessionEnd::Disconnected);
                    }
                    Some(Err(e)) => return Err(e.into()),
                    Some(Ok(_)) => {}
                },
                Some(symbol) = next_request(&mut self.requests) => {
                    if awaiting.should_send(&symbol, Instant::now()) {
                        debug!(%exchange, symbol = %symbol, "Resubscribing for snapshot");
                        for message in resubscribe_messages(exchange, &symbol) {
                            write.send(Message::Text(message)).await?;
                        }
                    } else {
                        debug!(%exchange, symbol = %symbol, "Snapshot already on its way");
                    }
                },
                _ = ping.tick(), if keepalive => {
                    write.send(Message::Text("ping".to_string())).await?;
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                },
            }
        }
    }

    fn on_text(&self, text: &str, awaiting: &mut AwaitingSnapshots) {
        if text == "pong" {
            return;
        }
        match self.orchestrator.handle_raw(text) {
            Ok(RawOutcome::Snapshot(symbol)) => {
                awaiting.arrived(&symbol);
            }
            Ok(RawOutcome::Update(_) | RawOutcome::Ignored) => {}
            Err(SyncError::UnknownSymbol(symbol)) => {
                debug!(symbol = %symbol, "Message for unsubscribed symbol");
            }
            // Already logged and counted by the orchestrator
            Err(_) => {}
        }
    }
}

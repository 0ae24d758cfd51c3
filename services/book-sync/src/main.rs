//! Book sync service
//!
//! One orchestrator and one feed per configuration file. Normalized records
//! are written to stdout as JSON lines by the bus forwarder.

use anyhow::{Context, Result};
use book_sync::{
    BinanceSnapshotLoader, BookMessage, ChecksumValidator, ExchangeKind, FeedDriver,
    NormalizedPublisher, SnapshotLoader, StreamSnapshotLoader, SyncConfig, SyncOrchestrator,
    SyncRegistry, SyncStatus,
};
use bus::{Bus, Subscriber};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Exchange order book synchronization service
#[derive(Parser, Debug)]
#[command(name = "book-sync", version, about)]
struct Args {
    /// Configuration file, one per exchange/market pair (repeatable)
    #[arg(long = "config", required = true)]
    configs: Vec<String>,

    /// Capacity of the outbound bus
    #[arg(long, default_value_t = 65_536)]
    bus_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "book_sync=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!("Starting book sync service");

    let bus: Bus<BookMessage> = Bus::new(args.bus_capacity);
    let receiver = bus.subscriber().subscribe()?;
    let forwarding = Arc::new(AtomicBool::new(true));
    let forwarder = {
        let forwarding = forwarding.clone();
        tokio::task::spawn_blocking(move || {
            let stdout = std::io::stdout();
            while forwarding.load(Ordering::Acquire) {
                let message = match receiver.recv_timeout(Duration::from_millis(200)) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(_) => break,
                };
                match message.to_json() {
                    Ok(line) => {
                        if writeln!(stdout.lock(), "{line}").is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(subject = %message.subject, error = %e, "Failed to encode record"),
                }
            }
        })
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut registry = SyncRegistry::new();
    let mut feeds = Vec::new();

    for path in &args.configs {
        let config = SyncConfig::from_file(path).with_context(|| format!("loading {path}"))?;
        let symbols = config.symbols.clone();
        let exchange = config.exchange;

        let publisher = NormalizedPublisher::new(
            exchange.exchange_name(),
            config.market_type(),
            &config.stream,
            &config.delta_stream,
            config.depth_limit(),
            ChecksumValidator::new(config.checksum_kind(), config.checksum_depth),
            Arc::new(bus.publisher()),
        );

        let (loader, stream_loader) = match exchange {
            ExchangeKind::BinanceSpot | ExchangeKind::BinanceFutures => (
                Arc::new(BinanceSnapshotLoader::new(exchange, config.rest_url())) as Arc<dyn SnapshotLoader>,
                None,
            ),
            ExchangeKind::Okx => {
                let (loader, requests) = StreamSnapshotLoader::new(exchange.max_snapshot_depth());
                let loader = Arc::new(loader);
                (loader.clone() as Arc<dyn SnapshotLoader>, Some((loader, requests)))
            }
        };

        let orchestrator = SyncOrchestrator::new(config, loader, publisher)?;
        registry.register(orchestrator.clone())?;
        info!(
            %exchange,
            market_type = orchestrator.market_type(),
            symbols = symbols.len(),
            "Configured"
        );

        let mut driver = FeedDriver::new(orchestrator, symbols);
        if let Some((loader, requests)) = stream_loader {
            driver = driver.with_stream_loader(loader, requests);
        }
        feeds.push(tokio::spawn(driver.run(shutdown_rx.clone())));
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(true);
    for feed in feeds {
        match feed.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Feed terminated with error"),
            Err(e) => error!(error = %e, "Feed task panicked"),
        }
    }

    for (key, health) in registry.health() {
        let synced = health.iter().filter(|h| h.status == SyncStatus::Synced).count();
        info!(exchange = %key.0, market_type = %key.1, symbols = health.len(), synced, "Final state");
    }
    registry.stop_all();

    forwarding.store(false, Ordering::Release);
    forwarder.await?;
    Ok(())
}

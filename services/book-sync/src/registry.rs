//! Registry of orchestrators keyed by exchange and market type
//!
//! Created by the composition root and passed by reference; there is no
//! process-wide instance.

use crate::error::{SyncError, SyncResult};
use crate::metrics::SymbolHealth;
use crate::orchestrator::SyncOrchestrator;
use rustc_hash::FxHashMap;

/// `(exchange, market_type)` key
pub type RegistryKey = (String, String);

/// Owns every orchestrator of the process
#[derive(Debug, Default)]
pub struct SyncRegistry {
    orchestrators: FxHashMap<RegistryKey, SyncOrchestrator>,
}

impl SyncRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an orchestrator under its exchange and market type
    ///
    /// # Errors
    /// Returns `SyncError::InvalidConfig` if the pair is already registered
    pub fn register(&mut self, orchestrator: SyncOrchestrator) -> SyncResult<()> {
        let key = (
            orchestrator.exchange().exchange_name().to_string(),
            orchestrator.market_type().to_string(),
        );
        if self.orchestrators.contains_key(&key) {
            return Err(SyncError::InvalidConfig(format!(
                "duplicate orchestrator for {}.{}",
                key.0, key.1
            )));
        }
        self.orchestrators.insert(key, orchestrator);
        Ok(())
    }

    /// Look up the orchestrator for a pair
    #[must_use]
    pub fn get(&self, exchange: &str, market_type: &str) -> Option<&SyncOrchestrator> {
        self.orchestrators
            .get(&(exchange.to_string(), market_type.to_string()))
    }

    /// Registered pairs, sorted
    #[must_use]
    pub fn keys(&self) -> Vec<RegistryKey> {
        let mut keys: Vec<RegistryKey> = self.orchestrators.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Number of registered orchestrators
    #[must_use]
    pub fn len(&self) -> usize {
        self.orchestrators.len()
    }

    /// Check if nothing is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orchestrators.is_empty()
    }

    /// Iterate orchestrators
    pub fn iter(&self) -> impl Iterator<Item = &SyncOrchestrator> {
        self.orchestrators.values()
    }

    /// Health of every symbol of every pair, keyed by pair
    #[must_use]
    pub fn health(&self) -> Vec<(RegistryKey, Vec<SymbolHealth>)> {
        self.keys()
            .into_iter()
            .filter_map(|key| {
                let health = self.orchestrators.get(&key)?.health();
                Some((key, health))
            })
            .collect()
    }

    /// Stop every orchestrator
    pub fn stop_all(&self) {
        for orchestrator in self.orchestrators.values() {
            orchestrator.stop();
        }
    }
}

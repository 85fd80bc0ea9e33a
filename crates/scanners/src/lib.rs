pub mod http;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use curbside_common::config::ScannerEndpoint;
use curbside_common::error::AppError;
use curbside_common::types::{Chain, Store, Timeslot};

pub use http::HttpStoreScanner;

/// Trait that every chain-specific availability scanner must implement.
#[async_trait]
pub trait StoreScanner: Send + Sync {
    /// Fetch the currently available timeslots for the given stores.
    ///
    /// Must be safe to call repeatedly. Any failure aborts the calling run.
    async fn scan(&self, stores: &[Store]) -> Result<Vec<Timeslot>, AppError>;

    /// Human-readable name for this scanner (e.g., "http").
    fn name(&self) -> &'static str;
}

/// Registry of store scanners keyed by chain slug.
#[derive(Default, Clone)]
pub struct ScannerRegistry {
    scanners: HashMap<String, Arc<dyn StoreScanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry with one HTTP scanner per configured endpoint.
    pub fn from_endpoints(endpoints: &[ScannerEndpoint]) -> Result<Self, AppError> {
        let mut registry = Self::new();
        for endpoint in endpoints {
            let scanner = HttpStoreScanner::new(&endpoint.base_url)?;
            registry.register(&endpoint.slug, Arc::new(scanner));
        }
        Ok(registry)
    }

    /// Register (or replace) the scanner for a chain slug.
    pub fn register(&mut self, slug: &str, scanner: Arc<dyn StoreScanner>) {
        tracing::debug!(slug, scanner = scanner.name(), "Registered store scanner");
        self.scanners.insert(slug.to_string(), scanner);
    }

    /// Look up the scanner for a chain.
    pub fn scanner_for(&self, chain: &Chain) -> Result<Arc<dyn StoreScanner>, AppError> {
        self.scanners.get(&chain.slug).cloned().ok_or_else(|| {
            AppError::Config(format!(
                "No store scanner registered for chain '{}' ({})",
                chain.name, chain.slug
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

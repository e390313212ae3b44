//! Reference prices.
//!
//! The cache is last-write-wins per symbol. Freshness is the feed's
//! business: a stale entry just means fewer matches.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;

use crate::error::FeedError;
use crate::types::Ticker;

#[derive(Debug, Default)]
pub struct TickerCache {
    entries: DashMap<String, Ticker>,
}

impl TickerCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, symbol: &str) -> Option<Ticker> {
        self.entries.get(symbol).map(|t| *t)
    }

    pub fn set(&self, symbol: impl Into<String>, ticker: Ticker) {
        self.entries.insert(symbol.into(), ticker);
    }

    /// Replaces each entry in `snapshot`; symbols not in it keep their price.
    pub fn update(&self, snapshot: HashMap<String, Ticker>) {
        for (symbol, ticker) in snapshot {
            self.entries.insert(symbol, ticker);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source of reference prices, polled by the ticker refresh task.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    /// Latest prices for `symbols`. Symbols the feed does not know are
    /// simply absent from the result.
    async fn snapshot(&self, symbols: &[String]) -> Result<HashMap<String, Ticker>, FeedError>;
}

/// Feed backed by an in-process map, for simulation and tests.
#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    prices: DashMap<String, Ticker>,
    offline: std::sync::atomic::AtomicBool,
}

impl StaticPriceFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&self, symbol: impl Into<String>, ticker: Ticker) {
        self.prices.insert(symbol.into(), ticker);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline
            .store(offline, std::sync::atomic::Ordering::SeqCst);
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn snapshot(&self, symbols: &[String]) -> Result<HashMap<String, Ticker>, FeedError> {
        if self.offline.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(FeedError::Unavailable("static feed offline".to_string()));
        }
        Ok(symbols
            .iter()
            .filter_map(|s| self.prices.get(s).map(|t| (s.clone(), *t)))
            .collect())
    }
}

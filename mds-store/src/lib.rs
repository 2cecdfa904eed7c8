//! Hot key/value storage for latest market state and bounded histories.

use anyhow::Result;
use mds_core::{Kline, Interval, OrderBook, Ticker, Trade};

pub mod memory;

pub use memory::MemoryStore;

/// Storage contract used by the aggregator service (writes) and the gateway
/// snapshot endpoints (reads). Key layout and TTLs:
///
/// | key                        | shape      | ttl |
/// |----------------------------|------------|-----|
/// | `ticker:{symbol}`          | flat hash  | 1 h |
/// | `depth:{symbol}`           | JSON book  | 1 h |
/// | `trade:{symbol}`           | list ≤ 100 | 1 h |
/// | `kline:{symbol}:{interval}`| list ≤ 1000| 7 d |
///
/// Lists are newest-first, so a length-N range read returns the N most
/// recent entries in descending time.
#[async_trait::async_trait]
pub trait MarketStore: Send + Sync {
    async fn save_ticker(&self, ticker: &Ticker) -> Result<()>;
    async fn save_depth(&self, depth: &OrderBook) -> Result<()>;
    async fn save_trade(&self, trade: &Trade) -> Result<()>;
    async fn save_kline(&self, kline: &Kline) -> Result<()>;

    async fn get_ticker(&self, symbol: &str) -> Result<Option<Ticker>>;
    async fn get_depth(&self, symbol: &str) -> Result<Option<OrderBook>>;
    async fn get_trades(&self, symbol: &str, limit: usize) -> Result<Vec<Trade>>;
    async fn get_klines(&self, symbol: &str, interval: Interval, limit: usize)
        -> Result<Vec<Kline>>;
}

pub struct RedisStore {
    // TODO: Redis-backed MarketStore implementation
}
